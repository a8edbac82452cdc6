//! Shared scaffolding for the scenario tests: a throwaway sqlite store, the mock processor, and the
//! full set of flow APIs wired together the way a server would.
#![allow(dead_code)]

use log::*;
use marketplace_engine::{
    config::EngineConfig,
    db_types::{Listing, NewListing, Offer, Order, OrderStatusType, Role},
    events::EventProducers,
    gateway::MockGateway,
    traits::{NullChatProvider, PaymentConfirmation},
    DeliveryApi,
    LedgerApi,
    ListingApi,
    OfferFlowApi,
    OrderFlowApi,
    SqliteDatabase,
};
use mp_common::Money;
use sqlx::{migrate, migrate::MigrateDatabase, Sqlite};

pub const SELLER: i64 = 101;
pub const BUYER: i64 = 201;
pub const OTHER_BUYER: i64 = 202;

pub struct Marketplace {
    pub db: SqliteDatabase,
    pub gateway: MockGateway,
    pub config: EngineConfig,
    pub listings: ListingApi<SqliteDatabase>,
    pub offers: OfferFlowApi<SqliteDatabase, MockGateway, NullChatProvider>,
    pub orders: OrderFlowApi<SqliteDatabase, MockGateway>,
    pub deliveries: DeliveryApi<SqliteDatabase>,
    pub ledger: LedgerApi<SqliteDatabase, MockGateway>,
}

pub async fn new_marketplace() -> Marketplace {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating connection to database");
    let gateway = MockGateway::new();
    let config = EngineConfig::default();
    let producers = EventProducers::default();
    Marketplace {
        listings: ListingApi::new(db.clone()),
        offers: OfferFlowApi::new(db.clone(), gateway.clone(), NullChatProvider, config.clone(), producers.clone()),
        orders: OrderFlowApi::new(db.clone(), gateway.clone(), config.clone(), producers.clone()),
        deliveries: DeliveryApi::new(db.clone(), producers),
        ledger: LedgerApi::new(db.clone(), gateway.clone(), config.clone()),
        db,
        gateway,
        config,
    }
}

pub async fn prepare_test_env(url: &str) {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    debug!("🚀️ Logging initialised");
    let _ = Sqlite::drop_database(url).await;
    Sqlite::create_database(url).await.expect("Error creating database");
    run_migrations(url).await;
}

pub fn random_db_path() -> String {
    let dir = std::env::temp_dir();
    format!("sqlite://{}/marketplace_test_{}.db", dir.display(), rand::random::<u64>())
}

async fn run_migrations(url: &str) {
    let db = SqliteDatabase::new_with_url(url, 5).await.expect("Error creating connection to database");
    migrate!("./src/sqlite/migrations").run(db.pool()).await.expect("Error running DB migrations");
    info!("🚀️ Migrations complete");
}

/// A published single-unit listing at the given price.
pub async fn live_listing(m: &Marketplace, price: Money) -> Listing {
    let listing = m
        .listings
        .create_listing(NewListing::new(SELLER, "Vintage synth restoration", price))
        .await
        .expect("Error creating listing");
    m.listings.publish(SELLER, listing.id).await.expect("Error publishing listing")
}

/// Drives `buyer` through offer → payment confirmation on `listing_id`, returning the confirmation.
pub async fn paid_offer(m: &Marketplace, buyer: i64, listing_id: i64, amount: Money) -> PaymentConfirmation {
    let offer = m.offers.make_offer(buyer, listing_id, amount, None).await.expect("Error making offer");
    m.offers.confirm_offer_payment(&offer.offer_id).await.expect("Error confirming offer payment")
}

/// A fully accepted order, moved along to `InProgress` so deliveries can be submitted.
pub async fn order_in_progress(m: &Marketplace, amount: Money) -> (Offer, Order) {
    let listing = live_listing(m, amount).await;
    let confirmation = paid_offer(m, BUYER, listing.id, amount).await;
    let result = m.offers.accept_offer(SELLER, &confirmation.offer.offer_id).await.expect("Error accepting offer");
    let order = m
        .orders
        .update_status(SELLER, Role::Seller, &result.order.order_id, OrderStatusType::Processing)
        .await
        .expect("Error moving order to Processing");
    let order = m
        .orders
        .update_status(SELLER, Role::Seller, &order.order_id, OrderStatusType::InProgress)
        .await
        .expect("Error moving order to InProgress");
    (result.offer, order)
}
