//! Deferred delivery for courier.
//!
//! The [`MessageStore`](store::MessageStore) is the source of truth for every
//! message. [`DeliveryScheduler`](service::DeliveryScheduler) keeps one
//! in-memory timer per upcoming `scheduled` message, rebuilds that set from the
//! store on start, and sweeps the store periodically for anything overdue.
//! Completed dispatches are announced through a
//! [`DeliveryNotifier`](notify::DeliveryNotifier).

pub mod error;
pub mod notify;
pub mod service;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    notify::{BroadcastNotifier, DeliveryNotifier, NoopNotifier},
    service::DeliveryScheduler,
    store::MessageStore,
    store_memory::InMemoryStore,
    store_sqlite::SqliteStore,
    types::{ScheduleRequest, SchedulerConfig, SchedulerStatus},
};

/// Run database migrations for the message store.
///
/// Creates the `messages` table. Call at startup before
/// [`SqliteStore::with_pool`] when the pool is shared.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
