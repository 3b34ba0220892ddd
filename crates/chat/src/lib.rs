//! Chat channel adapter for courier.
//!
//! Talks to a WhatsApp Cloud-compatible Graph API: text sends over
//! `/{phone_number_id}/messages`, inbound messages and delivery/read receipts
//! via the business account webhook.

pub mod adapter;
pub mod config;
pub mod inbound;
pub mod outbound;

pub use {adapter::ChatAdapter, config::ChatConfig};
