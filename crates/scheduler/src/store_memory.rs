//! In-memory message store for tests and ephemeral runs.

use std::{collections::HashMap, sync::Mutex};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    courier_common::{ChannelType, Message, MessageStatus, Metadata, NewMessage, ScheduledFilter},
};

use crate::{Error, Result, store::MessageStore};

/// In-memory store backed by `HashMap`. Nothing survives the process.
pub struct InMemoryStore {
    messages: Mutex<HashMap<String, Message>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a fully formed message, bypassing id assignment.
    pub fn insert(&self, message: Message) {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        messages.insert(message.id.clone(), message);
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn by_schedule(mut found: Vec<Message>) -> Vec<Message> {
    found.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then_with(|| a.id.cmp(&b.id)));
    found
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn create(&self, message: NewMessage) -> Result<Message> {
        let message = message.into_message(uuid::Uuid::new_v4().to_string(), Utc::now());
        self.insert(message.clone());
        Ok(message)
    }

    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<()> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let message = messages
            .get_mut(id)
            .ok_or_else(|| Error::message_not_found(id))?;
        message.status = status;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        Ok(messages.get(id).cloned())
    }

    async fn find_by_status_and_scheduled_before(
        &self,
        status: MessageStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let found = messages
            .values()
            .filter(|m| m.status == status && m.scheduled_at.is_some_and(|at| at <= before))
            .cloned()
            .collect();
        Ok(by_schedule(found))
    }

    async fn find_scheduled_by_filters(&self, filter: &ScheduledFilter) -> Result<Vec<Message>> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let found = messages
            .values()
            .filter(|m| m.status == MessageStatus::Scheduled && filter.matches(m))
            .cloned()
            .collect();
        Ok(by_schedule(found))
    }

    async fn merge_metadata(&self, id: &str, patch: Metadata) -> Result<()> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let message = messages
            .get_mut(id)
            .ok_or_else(|| Error::message_not_found(id))?;
        message.metadata.extend(patch);
        Ok(())
    }

    async fn find_by_external_id(
        &self,
        channel: ChannelType,
        external_id: &str,
    ) -> Result<Option<Message>> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        Ok(messages
            .values()
            .find(|m| m.channel == channel && m.external_id() == Some(external_id))
            .cloned())
    }
}
