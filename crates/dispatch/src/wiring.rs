//! Build the runtime graph from configuration.

use std::sync::Arc;

use {
    courier_channels::{AdapterRegistry, ChannelAdapter},
    courier_chat::ChatAdapter,
    courier_common::ChannelType,
    courier_config::{ChannelsConfig, CourierConfig, StorageConfig},
    courier_email::EmailAdapter,
    courier_metrics::MetricsAggregator,
    courier_scheduler::{
        DeliveryNotifier, InMemoryStore, MessageStore, SchedulerConfig, SqliteStore,
    },
    courier_sms::SmsAdapter,
    tracing::info,
};

use crate::{DispatchService, Result};

/// `storage.database_url` value selecting the non-persistent store.
pub const MEMORY_STORE_URL: &str = "memory";

/// Register one adapter factory per channel.
///
/// Each adapter parses its own section on first use. A missing or invalid
/// section leaves that channel disabled without affecting the others.
pub fn build_registry(channels: &ChannelsConfig) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();

    let sms = channels.section(ChannelType::Sms).cloned();
    registry.register(ChannelType::Sms, move || -> Arc<dyn ChannelAdapter> {
        Arc::new(SmsAdapter::from_section(sms.as_ref()))
    });

    let chat = channels.section(ChannelType::Chat).cloned();
    registry.register(ChannelType::Chat, move || -> Arc<dyn ChannelAdapter> {
        Arc::new(ChatAdapter::from_section(chat.as_ref()))
    });

    let email = channels.section(ChannelType::Email).cloned();
    registry.register(ChannelType::Email, move || -> Arc<dyn ChannelAdapter> {
        Arc::new(EmailAdapter::from_section(email.as_ref()))
    });

    registry
}

pub fn scheduler_config(config: &courier_config::SchedulerConfig) -> SchedulerConfig {
    SchedulerConfig {
        reconcile_interval: config.reconcile_interval(),
        lookahead: config.lookahead(),
    }
}

/// Open the configured message store, running migrations for SQLite.
pub async fn open_store(storage: &StorageConfig) -> Result<Arc<dyn MessageStore>> {
    let url = storage.database_url.trim();
    if url == MEMORY_STORE_URL {
        info!("using in-memory message store");
        return Ok(Arc::new(InMemoryStore::new()));
    }
    let store = SqliteStore::new(url).await?;
    info!(database_url = url, "message store ready");
    Ok(Arc::new(store))
}

/// Build a [`DispatchService`] with a fresh registry and metrics aggregator.
/// The scheduler is not started.
pub async fn build_service(
    config: &CourierConfig,
    notifier: Arc<dyn DeliveryNotifier>,
) -> Result<DispatchService> {
    let store = open_store(&config.storage).await?;
    let registry = Arc::new(build_registry(&config.channels));
    let enabled: Vec<_> = registry
        .channels()
        .into_iter()
        .filter(|channel| registry.is_enabled(*channel))
        .map(|channel| channel.as_str())
        .collect();
    info!(enabled = ?enabled, "channels initialized");

    Ok(DispatchService::new(
        store,
        registry,
        Arc::new(MetricsAggregator::new()),
        notifier,
        scheduler_config(&config.scheduler),
    ))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, courier_scheduler::NoopNotifier, serde_json::json};

    #[test]
    fn empty_config_disables_every_channel() {
        let registry = build_registry(&ChannelsConfig::default());
        assert_eq!(registry.channels(), ChannelType::ALL.to_vec());
        for channel in ChannelType::ALL {
            assert!(!registry.is_enabled(channel), "{channel}");
        }
    }

    #[test]
    fn broken_section_only_disables_its_channel() {
        let channels = ChannelsConfig {
            sms: Some(json!({
                "account_sid": "AC123",
                "auth_token": "secret",
                "from_number": "+15550000000",
            })),
            chat: Some(json!({ "access_token": "" })),
            email: None,
        };
        let registry = build_registry(&channels);
        assert!(registry.is_enabled(ChannelType::Sms));
        assert!(!registry.is_enabled(ChannelType::Chat));
        assert!(!registry.is_enabled(ChannelType::Email));
    }

    #[test]
    fn scheduler_timing_follows_config() {
        let cfg = courier_config::SchedulerConfig {
            reconcile_interval_secs: 5,
            lookahead_hours: 2,
        };
        let sched = scheduler_config(&cfg);
        assert_eq!(sched.reconcile_interval.as_secs(), 5);
        assert_eq!(sched.lookahead.as_secs(), 7200);
    }

    #[tokio::test]
    async fn builds_with_memory_store() {
        let mut config = CourierConfig::default();
        config.storage.database_url = MEMORY_STORE_URL.into();
        let service = build_service(&config, Arc::new(NoopNotifier))
            .await
            .unwrap();
        assert_eq!(service.channel_info().len(), 3);
        assert!(!service.scheduler_status().await.running);
    }

    #[tokio::test]
    async fn builds_with_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            database_url: format!("sqlite://{}?mode=rwc", dir.path().join("c.db").display()),
        };
        let store = open_store(&storage).await.unwrap();
        assert!(
            store
                .find_by_id("nothing")
                .await
                .unwrap()
                .is_none()
        );
    }
}
