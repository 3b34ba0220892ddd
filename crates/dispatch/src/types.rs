use {
    chrono::{DateTime, Utc},
    courier_channels::ChannelCapabilities,
    courier_common::{
        ChannelType, Direction, Message, MessageId, MessageStatus, Metadata, NewMessage,
    },
    courier_metrics::{ChannelComparison, ChannelMetrics, CostBreakdown, OverallMetrics},
    serde::{Deserialize, Serialize},
};

/// Input for an immediate send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNowRequest {
    pub channel: ChannelType,
    pub to: String,
    pub content: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SendNowRequest {
    pub fn new(channel: ChannelType, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel,
            to: to.into(),
            content: content.into(),
            from: None,
            contact_id: None,
            user_id: None,
            team_id: None,
            metadata: Metadata::new(),
        }
    }

    pub(crate) fn into_new_message(self) -> NewMessage {
        NewMessage {
            content: self.content,
            channel: self.channel,
            direction: Direction::Outbound,
            status: MessageStatus::Pending,
            to: self.to.trim().to_string(),
            from: self.from,
            scheduled_at: None,
            contact_id: self.contact_id,
            user_id: self.user_id,
            team_id: self.team_id,
            metadata: self.metadata,
        }
    }
}

/// Result of [`DispatchService::send_now`](crate::DispatchService::send_now).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNowResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendNowResult {
    pub(crate) fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// One pending scheduled message, as listed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSummary {
    pub id: MessageId,
    pub channel: ChannelType,
    pub to: String,
    pub content: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    /// Whether this process holds an armed timer for the message.
    pub armed: bool,
}

impl ScheduledSummary {
    pub(crate) fn new(message: Message, armed: bool) -> Self {
        Self {
            id: message.id,
            channel: message.channel,
            to: message.to,
            content: message.content,
            scheduled_at: message.scheduled_at,
            contact_id: message.contact_id,
            user_id: message.user_id,
            team_id: message.team_id,
            armed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub channel: ChannelType,
    pub enabled: bool,
    pub capabilities: Option<ChannelCapabilities>,
    pub metrics: Option<ChannelMetrics>,
}

/// Operational report over everything recorded so far.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub overview: OverallMetrics,
    pub comparison: Vec<ChannelComparison>,
    pub recommendations: Vec<String>,
    pub cost_breakdown: Vec<CostBreakdown>,
}

/// What an inbound webhook payload did to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IngestOutcome {
    /// A receipt moved a stored message along the lifecycle.
    #[serde(rename_all = "camelCase")]
    StatusUpdated {
        message_id: MessageId,
        previous: MessageStatus,
        status: MessageStatus,
    },
    /// A receipt for a known message that would not be a legal transition
    /// (late or duplicate receipts).
    #[serde(rename_all = "camelCase")]
    StatusIgnored {
        message_id: MessageId,
        current: MessageStatus,
        reported: MessageStatus,
    },
    /// A receipt whose vendor id matches no stored message.
    #[serde(rename_all = "camelCase")]
    UnknownReceipt { external_id: Option<String> },
    /// A new inbound message, now persisted.
    #[serde(rename_all = "camelCase")]
    Received { message_id: MessageId },
}
