use {
    async_trait::async_trait,
    courier_common::{ChannelType, EXTERNAL_ID_KEY, Message, MessageStatus, Metadata},
    serde::{Deserialize, Serialize},
};

use crate::error::Result;

/// Rough delivery speed of a channel, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyClass {
    /// Sub-second push (chat apps).
    Realtime,
    /// Carrier hops, typically a few seconds.
    Seconds,
    /// Queued relays, can take minutes.
    Minutes,
}

/// Static description of what a channel offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCapabilities {
    pub display_name: String,
    pub cost_per_unit: f64,
    pub reliability_pct: f64,
    pub latency_class: LatencyClass,
    /// Whether the vendor reports read receipts.
    pub supports_read: bool,
}

/// A single outbound transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub channel: ChannelType,
    pub to: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SendRequest {
    pub fn new(channel: ChannelType, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel,
            to: to.into(),
            content: content.into(),
            from: None,
            metadata: Metadata::new(),
        }
    }

    /// String value from the request metadata, if present and non-empty.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

impl From<&Message> for SendRequest {
    fn from(message: &Message) -> Self {
        Self {
            channel: message.channel,
            to: message.to.clone(),
            content: message.content.clone(),
            from: message.from.clone(),
            metadata: message.metadata.clone(),
        }
    }
}

/// Successful vendor acceptance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accepted {
    /// Vendor-assigned id, when the API returns one.
    pub message_id: Option<String>,
    pub metadata: Metadata,
}

/// Result of one `send`. Transport failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SendOutcome {
    pub fn sent(accepted: Accepted) -> Self {
        let mut metadata = accepted.metadata;
        if let Some(id) = &accepted.message_id {
            metadata.insert(EXTERNAL_ID_KEY.into(), id.clone().into());
        }
        Self {
            success: true,
            message_id: accepted.message_id,
            error: None,
            metadata,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
            metadata: Metadata::new(),
        }
    }
}

impl From<Result<Accepted>> for SendOutcome {
    fn from(result: Result<Accepted>) -> Self {
        match result {
            Ok(accepted) => Self::sent(accepted),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// What an inbound payload turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundKind {
    /// A new message sent by a contact.
    Message,
    /// A status update for a message we sent earlier.
    Receipt,
}

/// Vendor payload mapped onto the internal message shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub channel: ChannelType,
    pub kind: InboundKind,
    /// Vendor message id. For receipts this identifies the original outbound message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub content: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One delivery channel.
///
/// Instances are shared across tasks after construction and must be safe for
/// concurrent `send` and `normalize_inbound` calls.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> ChannelType;

    /// True when the adapter validated its configuration. An unconfigured
    /// adapter must never touch the network.
    fn is_configured(&self) -> bool;

    fn capabilities(&self) -> ChannelCapabilities;

    /// Transmit one message. Never panics or errors on transport problems.
    async fn send(&self, request: &SendRequest) -> SendOutcome;

    /// Parse a webhook payload. `None` when the payload is not recognized.
    fn normalize_inbound(&self, payload: &serde_json::Value) -> Option<NormalizedMessage>;
}
