//! Message model shared by the scheduler, the adapters, and the dispatch service.

use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::Error;

/// Opaque message identifier assigned by the message store.
pub type MessageId = String;

/// Channel-specific artifacts (vendor message id, media references, raw payload).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key holding the vendor-assigned message id.
pub const EXTERNAL_ID_KEY: &str = "externalId";

/// Delivery channel. Each variant is served by exactly one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Sms,
    Chat,
    Email,
}

impl ChannelType {
    pub const ALL: [ChannelType; 3] = [Self::Sms, Self::Chat, Self::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Chat => "chat",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(Self::Sms),
            "chat" => Ok(Self::Chat),
            "email" => Ok(Self::Email),
            other => Err(Error::UnknownChannel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(Error::message(format!("unknown direction: {other}"))),
        }
    }
}

/// Lifecycle status of a message.
///
/// ```text
/// scheduled ──► sent ──► delivered ──► read
///     │          │
/// pending ───────┴──► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Scheduled,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses never move back into `pending` or `scheduled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Read | Self::Failed)
    }

    /// Whether `self → next` is an edge of the lifecycle graph.
    ///
    /// Rewriting the current status is always accepted so repeated receipts
    /// and racing writers stay harmless.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Scheduled, Self::Sent | Self::Failed)
                | (Self::Pending, Self::Sent | Self::Failed)
                | (Self::Sent, Self::Delivered | Self::Failed)
                | (Self::Delivered, Self::Read)
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "scheduled" => Ok(Self::Scheduled),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            other => Err(Error::UnknownStatus(other.to_string())),
        }
    }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub channel: ChannelType,
    pub direction: Direction,
    pub status: MessageStatus,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    /// Vendor message id recorded after a successful send or an inbound receipt.
    pub fn external_id(&self) -> Option<&str> {
        self.metadata.get(EXTERNAL_ID_KEY).and_then(|v| v.as_str())
    }
}

/// Input for persisting a new message. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub content: String,
    pub channel: ChannelType,
    pub direction: Direction,
    pub status: MessageStatus,
    pub to: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewMessage {
    pub fn into_message(self, id: MessageId, created_at: DateTime<Utc>) -> Message {
        Message {
            id,
            content: self.content,
            channel: self.channel,
            direction: self.direction,
            status: self.status,
            to: self.to,
            from: self.from,
            scheduled_at: self.scheduled_at,
            created_at,
            contact_id: self.contact_id,
            user_id: self.user_id,
            team_id: self.team_id,
            metadata: self.metadata,
        }
    }
}

/// Filters for listing scheduled messages. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledFilter {
    pub contact_id: Option<String>,
    pub user_id: Option<String>,
    pub team_id: Option<String>,
}

impl ScheduledFilter {
    pub fn matches(&self, message: &Message) -> bool {
        fn field_matches(want: &Option<String>, have: &Option<String>) -> bool {
            want.as_ref().is_none_or(|w| have.as_deref() == Some(w.as_str()))
        }
        field_matches(&self.contact_id, &message.contact_id)
            && field_matches(&self.user_id, &message.user_id)
            && field_matches(&self.team_id, &message.team_id)
    }
}

/// Notification published after every completed dispatch, scheduled or immediate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryEvent {
    pub message_id: MessageId,
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    pub channel: ChannelType,
    pub direction: Direction,
    pub content: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryEvent {
    pub fn for_message(message: &Message, status: MessageStatus) -> Self {
        Self {
            message_id: message.id.clone(),
            recipient: message.to.clone(),
            contact_id: message.contact_id.clone(),
            channel: message.channel,
            direction: message.direction,
            content: message.content.clone(),
            status,
            timestamp: Utc::now(),
        }
    }
}
