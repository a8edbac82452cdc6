//! # SQLite database methods
//!
//! This module contains the "low-level" SQLite interactions, one file per table.
//!
//! All of these are plain functions (rather than stateful structs) that accept a
//! `&mut SqliteConnection` argument. Callers can obtain a connection from a pool, or create an atomic
//! transaction as the need arises and pass `&mut *tx` without any other changes — the composite
//! lifecycle operations in [`super::SqliteDatabase`] do exactly that.
use std::{env, str::FromStr};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod deliveries;
pub mod ledger;
pub mod listings;
pub mod offers;
pub mod orders;
pub mod withdrawals;

const SQLITE_DB_URL: &str = "sqlite://data/marketplace.db";

pub fn db_url() -> String {
    let result = env::var("MPE_DATABASE_URL").unwrap_or_else(|_| {
        info!("MPE_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    // WAL (sqlx's default) needs coherent shared mmap for its -shm index, and cross-connection
    // reads need coherent file caching; some sandboxed filesystems provide neither. A rollback
    // journal plus a process-wide shared page cache keeps pooled connections consistent everywhere.
    let options =
        SqliteConnectOptions::from_str(url)?.journal_mode(SqliteJournalMode::Delete).shared_cache(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}
