//! Persistence trait for messages.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    courier_common::{ChannelType, Message, MessageStatus, Metadata, NewMessage, ScheduledFilter},
};

use crate::Result;

/// Durable record of every message and its lifecycle status.
///
/// Status writes are last-write-wins. Callers that must respect the lifecycle
/// graph check [`MessageStatus::can_transition_to`] before writing.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message, assigning its id and creation time.
    async fn create(&self, message: NewMessage) -> Result<Message>;

    /// Fails with [`Error::MessageNotFound`](crate::Error::MessageNotFound) for unknown ids.
    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>>;

    /// Messages in `status` whose `scheduled_at` is at or before `before`,
    /// earliest first.
    async fn find_by_status_and_scheduled_before(
        &self,
        status: MessageStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Message>>;

    /// `scheduled` messages matching `filter`, earliest first.
    async fn find_scheduled_by_filters(&self, filter: &ScheduledFilter) -> Result<Vec<Message>>;

    /// Shallow-merge `patch` into the message's metadata.
    async fn merge_metadata(&self, id: &str, patch: Metadata) -> Result<()>;

    /// Look a message up by the vendor id recorded under `externalId`.
    async fn find_by_external_id(
        &self,
        channel: ChannelType,
        external_id: &str,
    ) -> Result<Option<Message>>;
}
