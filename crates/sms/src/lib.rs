//! SMS channel adapter for courier.
//!
//! Sends through a Twilio-compatible Messages REST resource and normalizes its
//! incoming-message and status-callback webhooks.

pub mod adapter;
pub mod config;
pub mod inbound;
pub mod outbound;

pub use {adapter::SmsAdapter, config::SmsConfig};
