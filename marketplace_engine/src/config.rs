use std::env;

use chrono::Duration;
use log::*;
use mp_common::{Money, Secret};

const DEFAULT_PLATFORM_FEE_BPS: i64 = 1000; // 10%
const DEFAULT_MIN_OFFER_CENTS: i64 = 100; // $1.00
const DEFAULT_MIN_WITHDRAWAL_CENTS: i64 = 2000; // $20.00
const DEFAULT_RESERVATION_TTL_HOURS: i64 = 24;
const DEFAULT_MAX_REVISIONS: i64 = 3;

/// Engine configuration. The platform fee rate lives here and nowhere else; every fee computation in
/// the engine goes through this single value.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Platform fee, in basis points of the order amount.
    pub platform_fee_bps: i64,
    /// The smallest amount an offer may carry (the processor's minimum payable unit).
    pub min_offer_amount: Money,
    /// The smallest withdrawal a seller may request.
    pub min_withdrawal: Money,
    /// How long a listing stays reserved once a payment is confirmed against it.
    pub reservation_ttl: Duration,
    /// The revision budget given to new orders.
    pub default_max_revisions: i64,
    pub gateway: GatewayConfig,
}

#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    /// Base URL of the escrow payment processor's REST API.
    pub base_url: String,
    pub api_key: Secret<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: DEFAULT_PLATFORM_FEE_BPS,
            min_offer_amount: Money::from_cents(DEFAULT_MIN_OFFER_CENTS),
            min_withdrawal: Money::from_cents(DEFAULT_MIN_WITHDRAWAL_CENTS),
            reservation_ttl: Duration::hours(DEFAULT_RESERVATION_TTL_HOURS),
            default_max_revisions: DEFAULT_MAX_REVISIONS,
            gateway: GatewayConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env_or_default() -> Self {
        let platform_fee_bps = env_i64("MPE_PLATFORM_FEE_BPS", DEFAULT_PLATFORM_FEE_BPS);
        let min_offer_amount = Money::from_cents(env_i64("MPE_MIN_OFFER_CENTS", DEFAULT_MIN_OFFER_CENTS));
        let min_withdrawal = Money::from_cents(env_i64("MPE_MIN_WITHDRAWAL_CENTS", DEFAULT_MIN_WITHDRAWAL_CENTS));
        let reservation_ttl = Duration::hours(env_i64("MPE_RESERVATION_TTL_HOURS", DEFAULT_RESERVATION_TTL_HOURS));
        let default_max_revisions = env_i64("MPE_MAX_REVISIONS", DEFAULT_MAX_REVISIONS);
        let gateway = GatewayConfig {
            base_url: env::var("MPE_GATEWAY_URL").ok().unwrap_or_default(),
            api_key: Secret::new(env::var("MPE_GATEWAY_API_KEY").ok().unwrap_or_default()),
        };
        if gateway.base_url.is_empty() {
            warn!("🪛️ MPE_GATEWAY_URL is not set. The REST gateway adapter will not be usable.");
        }
        Self { platform_fee_bps, min_offer_amount, min_withdrawal, reservation_ttl, default_max_revisions, gateway }
    }
}

fn env_i64(var: &str, default: i64) -> i64 {
    match env::var(var) {
        Ok(s) => s.parse::<i64>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {var}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.platform_fee_bps, 1000);
        assert_eq!(config.reservation_ttl, Duration::hours(24));
        assert_eq!(config.default_max_revisions, 3);
        assert_eq!(config.min_withdrawal, Money::from_units(20));
    }
}
