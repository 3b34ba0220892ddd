use std::sync::Arc;

use {
    courier_channels::{AdapterRegistry, InboundKind, NormalizedMessage, SendOutcome, SendRequest},
    courier_common::{
        ChannelType, DeliveryEvent, Direction, EXTERNAL_ID_KEY, MessageId, MessageStatus,
        Metadata, NewMessage, ScheduledFilter,
    },
    courier_metrics::MetricsAggregator,
    courier_scheduler::{
        DeliveryNotifier, DeliveryScheduler, MessageStore, ScheduleRequest, SchedulerConfig,
        SchedulerStatus, service::measured_send,
    },
    tracing::{debug, error, info, warn},
};

use crate::{
    Result,
    types::{Analysis, ChannelInfo, IngestOutcome, ScheduledSummary, SendNowRequest, SendNowResult},
};

/// Entry point for callers: immediate and scheduled sends, listing,
/// per-channel reporting, and inbound webhook handling.
pub struct DispatchService {
    store: Arc<dyn MessageStore>,
    registry: Arc<AdapterRegistry>,
    metrics: Arc<MetricsAggregator>,
    notifier: Arc<dyn DeliveryNotifier>,
    scheduler: Arc<DeliveryScheduler>,
}

impl DispatchService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<AdapterRegistry>,
        metrics: Arc<MetricsAggregator>,
        notifier: Arc<dyn DeliveryNotifier>,
        config: SchedulerConfig,
    ) -> Self {
        let scheduler = DeliveryScheduler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&metrics),
            Arc::clone(&notifier),
            config,
        );
        Self {
            store,
            registry,
            metrics,
            notifier,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Arc<DeliveryScheduler> {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        Ok(())
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    pub async fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status().await
    }

    /// Persist and transmit a message right away.
    ///
    /// A disabled channel or a blank recipient is rejected before anything is
    /// stored or measured. Every other failure comes back in the result with
    /// the message id, and the stored message ends up `sent` or `failed`. A
    /// send whose status could not be written is reported as a failure.
    pub async fn send_now(&self, request: SendNowRequest) -> SendNowResult {
        let channel = request.channel;
        if request.to.trim().is_empty() {
            return SendNowResult::rejected("recipient must not be empty");
        }
        if !self.registry.is_enabled(channel) {
            debug!(%channel, "send rejected, channel not enabled");
            return SendNowResult::rejected(format!("channel not enabled: {channel}"));
        }

        let message = match self.store.create(request.into_new_message()).await {
            Ok(message) => message,
            Err(e) => {
                error!(%channel, error = %e, "could not persist outbound message");
                return SendNowResult::rejected(format!("could not persist message: {e}"));
            },
        };

        let outcome =
            measured_send(&self.registry, &self.metrics, &SendRequest::from(&message)).await;
        let status = if outcome.success {
            MessageStatus::Sent
        } else {
            MessageStatus::Failed
        };

        match &outcome.error {
            Some(reason) => warn!(message_id = %message.id, %channel, error = %reason, "send failed"),
            None => info!(message_id = %message.id, %channel, "message sent"),
        }

        let SendOutcome { error, metadata, .. } = outcome;
        let (status, error) = match self.record_outcome(&message.id, status, metadata).await {
            Ok(()) => (status, error),
            Err(e) => {
                error!(message_id = %message.id, %status, error = %e, "could not record send status");
                (
                    MessageStatus::Failed,
                    Some(format!("could not record send status: {e}")),
                )
            },
        };

        self.notifier
            .publish(DeliveryEvent::for_message(&message, status))
            .await;

        SendNowResult {
            success: status == MessageStatus::Sent,
            message_id: Some(message.id),
            error,
        }
    }

    async fn record_outcome(
        &self,
        message_id: &str,
        status: MessageStatus,
        metadata: Metadata,
    ) -> Result<()> {
        if status == MessageStatus::Sent && !metadata.is_empty() {
            self.store.merge_metadata(message_id, metadata).await?;
        }
        self.store.update_status(message_id, status).await?;
        Ok(())
    }

    pub async fn schedule(&self, request: ScheduleRequest) -> Result<MessageId> {
        Ok(self.scheduler.schedule(request).await?)
    }

    pub async fn cancel_scheduled(&self, message_id: &str) -> Result<bool> {
        Ok(self.scheduler.cancel(message_id).await?)
    }

    /// Pending scheduled messages matching `filter`, soonest first.
    pub async fn list_scheduled(&self, filter: &ScheduledFilter) -> Result<Vec<ScheduledSummary>> {
        let messages = self.store.find_scheduled_by_filters(filter).await?;
        Ok(messages
            .into_iter()
            .map(|message| {
                let armed = self.scheduler.is_armed(&message.id);
                ScheduledSummary::new(message, armed)
            })
            .collect())
    }

    /// One entry per known channel, enabled or not.
    pub fn channel_info(&self) -> Vec<ChannelInfo> {
        ChannelType::ALL
            .into_iter()
            .map(|channel| {
                let adapter = self.registry.get_adapter(channel);
                ChannelInfo {
                    channel,
                    enabled: adapter.as_ref().is_some_and(|a| a.is_configured()),
                    capabilities: adapter.map(|a| a.capabilities()),
                    metrics: self.metrics.channel_metrics(channel),
                }
            })
            .collect()
    }

    pub fn analysis(&self) -> Analysis {
        Analysis {
            overview: self.metrics.overall_metrics(),
            comparison: self.metrics.comparison(),
            recommendations: self.metrics.recommendations(),
            cost_breakdown: self.metrics.cost_breakdown(),
        }
    }

    /// Apply an inbound webhook payload.
    ///
    /// `Ok(None)` when the channel's adapter does not recognize the payload.
    pub async fn ingest(
        &self,
        channel: ChannelType,
        payload: &serde_json::Value,
    ) -> Result<Option<IngestOutcome>> {
        let Some(normalized) = self.registry.ingest(channel, payload) else {
            return Ok(None);
        };
        let outcome = match normalized.kind {
            InboundKind::Receipt => self.apply_receipt(normalized).await?,
            InboundKind::Message => self.store_inbound(normalized).await?,
        };
        Ok(Some(outcome))
    }

    async fn apply_receipt(&self, receipt: NormalizedMessage) -> Result<IngestOutcome> {
        let Some(external_id) = receipt.external_id.as_deref() else {
            return Ok(IngestOutcome::UnknownReceipt { external_id: None });
        };
        let Some(message) = self
            .store
            .find_by_external_id(receipt.channel, external_id)
            .await?
        else {
            debug!(channel = %receipt.channel, external_id, "receipt for unknown message");
            return Ok(IngestOutcome::UnknownReceipt {
                external_id: Some(external_id.to_string()),
            });
        };

        let current = message.status;
        let reported = receipt.status;
        if current == reported || !current.can_transition_to(reported) {
            debug!(
                message_id = %message.id,
                %current,
                %reported,
                "receipt does not advance message"
            );
            return Ok(IngestOutcome::StatusIgnored {
                message_id: message.id,
                current,
                reported,
            });
        }

        if !receipt.metadata.is_empty() {
            self.store
                .merge_metadata(&message.id, receipt.metadata)
                .await?;
        }
        self.store.update_status(&message.id, reported).await?;
        info!(message_id = %message.id, from = %current, to = %reported, "receipt applied");

        self.notifier
            .publish(DeliveryEvent::for_message(&message, reported))
            .await;
        Ok(IngestOutcome::StatusUpdated {
            message_id: message.id,
            previous: current,
            status: reported,
        })
    }

    async fn store_inbound(&self, inbound: NormalizedMessage) -> Result<IngestOutcome> {
        let mut metadata = inbound.metadata;
        if let Some(external_id) = inbound.external_id {
            metadata.insert(EXTERNAL_ID_KEY.into(), external_id.into());
        }
        let message = self
            .store
            .create(NewMessage {
                content: inbound.content,
                channel: inbound.channel,
                direction: Direction::Inbound,
                status: inbound.status,
                to: inbound.to.unwrap_or_default(),
                from: inbound.from,
                scheduled_at: None,
                contact_id: None,
                user_id: None,
                team_id: None,
                metadata,
            })
            .await?;
        info!(message_id = %message.id, channel = %message.channel, "inbound message stored");

        self.notifier
            .publish(DeliveryEvent::for_message(&message, message.status))
            .await;
        Ok(IngestOutcome::Received {
            message_id: message.id,
        })
    }
}
