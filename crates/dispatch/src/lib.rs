//! Caller-facing surface of courier.
//!
//! [`DispatchService`] ties the message store, the adapter registry, the
//! metrics aggregator and the delivery scheduler together. [`wiring`] builds
//! all of them from a [`courier_config::CourierConfig`].

pub mod error;
pub mod service;
pub mod types;
pub mod wiring;

pub use {
    error::{Error, Result},
    service::DispatchService,
    types::{Analysis, ChannelInfo, IngestOutcome, ScheduledSummary, SendNowRequest, SendNowResult},
    wiring::{MEMORY_STORE_URL, build_registry, build_service, open_store, scheduler_config},
};
