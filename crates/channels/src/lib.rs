//! Channel adapter contract.
//!
//! Each delivery channel (SMS, chat, email) implements [`ChannelAdapter`] in its
//! own crate. The [`AdapterRegistry`] owns one lazily built adapter per channel
//! and is the only place that actually transmits.

pub mod adapter;
pub mod error;
pub mod inbound;
pub mod registry;

pub use {
    adapter::{
        Accepted, ChannelAdapter, ChannelCapabilities, InboundKind, LatencyClass,
        NormalizedMessage, SendOutcome, SendRequest,
    },
    error::{Error, Result},
    inbound::{FieldRule, StatusMap},
    registry::{AdapterFactory, AdapterRegistry},
};
