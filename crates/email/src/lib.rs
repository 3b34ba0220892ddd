//! Email channel adapter for courier.
//!
//! Sends through a SendGrid-compatible `v3/mail/send` endpoint and normalizes
//! inbound-parse mail and event webhooks (delivered, open, bounce, ...).

pub mod adapter;
pub mod config;
pub mod inbound;
pub mod outbound;

pub use {adapter::EmailAdapter, config::EmailConfig};
