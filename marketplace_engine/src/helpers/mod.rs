//! Small pure helpers shared across the engine.

use mp_common::Money;
use rand::Rng;

/// Splits `amount` into `(platform_fee, seller_payout)` at the given fee rate in basis points.
///
/// The fee is rounded down, the payout takes the remainder, so the two always sum back to `amount`
/// exactly. There is deliberately no other fee computation anywhere in the engine.
pub fn fee_split(amount: Money, fee_bps: i64) -> (Money, Money) {
    let fee = Money::from_cents(amount.value() * fee_bps / 10_000);
    let payout = amount - fee;
    (fee, payout)
}

/// Generates a reference id like `ord-1f60ad2c90b77bd3`. Collision-resistant enough for a few thousand
/// concurrent entities; uniqueness is still enforced by the database.
pub fn new_reference(prefix: &str) -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!("{prefix}-{nonce:016x}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fee_split_is_exact() {
        let (fee, payout) = fee_split(Money::from_units(100), 1000);
        assert_eq!(fee, Money::from_units(10));
        assert_eq!(payout, Money::from_units(90));
        // An amount that doesn't divide evenly: 10% of $0.99 rounds down to $0.09
        let (fee, payout) = fee_split(Money::from_cents(99), 1000);
        assert_eq!(fee, Money::from_cents(9));
        assert_eq!(payout, Money::from_cents(90));
        assert_eq!(fee + payout, Money::from_cents(99));
        // Zero-rate platforms take nothing
        let (fee, payout) = fee_split(Money::from_units(42), 0);
        assert_eq!(fee, Money::default());
        assert_eq!(payout, Money::from_units(42));
    }

    #[test]
    fn references_carry_their_prefix() {
        let r = new_reference("off");
        assert!(r.starts_with("off-"));
        assert_ne!(new_reference("off"), new_reference("off"));
    }
}
