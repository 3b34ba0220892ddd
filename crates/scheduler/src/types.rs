use std::time::Duration;

use {
    chrono::{DateTime, Utc},
    courier_common::{ChannelType, Direction, MessageId, MessageStatus, Metadata, NewMessage},
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result};

/// Input for a deferred send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub channel: ChannelType,
    pub to: String,
    pub content: String,
    #[serde(default)]
    pub from: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ScheduleRequest {
    pub fn new(
        channel: ChannelType,
        to: impl Into<String>,
        content: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            channel,
            to: to.into(),
            content: content.into(),
            from: None,
            scheduled_at,
            contact_id: None,
            user_id: None,
            team_id: None,
            metadata: Metadata::new(),
        }
    }

    /// A scheduled send needs somewhere to go and a due time after `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.to.trim().is_empty() {
            return Err(Error::validation("recipient must not be empty"));
        }
        if self.scheduled_at <= now {
            return Err(Error::validation(format!(
                "scheduled_at {} is not in the future",
                self.scheduled_at.to_rfc3339()
            )));
        }
        Ok(())
    }

    pub fn into_new_message(self) -> NewMessage {
        NewMessage {
            content: self.content,
            channel: self.channel,
            direction: Direction::Outbound,
            status: MessageStatus::Scheduled,
            to: self.to.trim().to_string(),
            from: self.from,
            scheduled_at: Some(self.scheduled_at),
            contact_id: self.contact_id,
            user_id: self.user_id,
            team_id: self.team_id,
            metadata: self.metadata,
        }
    }
}

/// Timing knobs for [`DeliveryScheduler`](crate::DeliveryScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How often the store is swept for overdue `scheduled` messages.
    pub reconcile_interval: Duration,
    /// How far ahead timers are armed. Messages further out are picked up by a
    /// later sweep once they come into range.
    pub lookahead: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30),
            lookahead: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Snapshot of the scheduler's in-memory state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub armed_timers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_fire_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_message_id: Option<MessageId>,
}
