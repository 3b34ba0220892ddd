use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {courier_common::ChannelType, tracing::debug};

#[cfg(feature = "metrics")]
use courier_metrics::{channels as ch_metrics, counter, gauge, labels};

use crate::adapter::{ChannelAdapter, NormalizedMessage, SendOutcome, SendRequest};

/// Builds the adapter for one channel. Called at most once per registry.
pub type AdapterFactory = Box<dyn Fn() -> Arc<dyn ChannelAdapter> + Send + Sync>;

/// Per-channel adapter cache and the single transmit call site.
///
/// Factories are registered up front; adapters are built lazily on first use
/// and reused afterwards.
pub struct AdapterRegistry {
    factories: HashMap<ChannelType, AdapterFactory>,
    adapters: RwLock<HashMap<ChannelType, Arc<dyn ChannelAdapter>>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the factory for `channel`.
    pub fn register(
        &mut self,
        channel: ChannelType,
        factory: impl Fn() -> Arc<dyn ChannelAdapter> + Send + Sync + 'static,
    ) {
        self.factories.insert(channel, Box::new(factory));
        self.adapters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&channel);
    }

    /// Register an already-built adapter under its own channel.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let channel = adapter.channel();
        self.register(channel, move || Arc::clone(&adapter));
    }

    /// Adapter for `channel`, building it on first request.
    pub fn get_adapter(&self, channel: ChannelType) -> Option<Arc<dyn ChannelAdapter>> {
        if let Some(adapter) = self
            .adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&channel)
        {
            return Some(Arc::clone(adapter));
        }

        let factory = self.factories.get(&channel)?;
        let mut adapters = self.adapters.write().unwrap_or_else(|e| e.into_inner());
        // Another caller may have built it while we waited for the write lock.
        if let Some(adapter) = adapters.get(&channel) {
            return Some(Arc::clone(adapter));
        }
        let adapter = factory();
        debug!(
            %channel,
            configured = adapter.is_configured(),
            "channel adapter constructed"
        );
        adapters.insert(channel, Arc::clone(&adapter));

        #[cfg(feature = "metrics")]
        gauge!(ch_metrics::ACTIVE)
            .set(adapters.values().filter(|a| a.is_configured()).count() as f64);

        Some(adapter)
    }

    /// True iff the channel's adapter exists and validated its configuration.
    pub fn is_enabled(&self, channel: ChannelType) -> bool {
        self.get_adapter(channel)
            .is_some_and(|adapter| adapter.is_configured())
    }

    /// Route a request to its channel's adapter.
    pub async fn dispatch(&self, request: &SendRequest) -> SendOutcome {
        match self
            .get_adapter(request.channel)
            .filter(|adapter| adapter.is_configured())
        {
            Some(adapter) => adapter.send(request).await,
            None => SendOutcome::failure(format!("channel not enabled: {}", request.channel)),
        }
    }

    /// Normalize an inbound webhook payload with the channel's adapter.
    pub fn ingest(
        &self,
        channel: ChannelType,
        payload: &serde_json::Value,
    ) -> Option<NormalizedMessage> {
        let normalized = self.get_adapter(channel)?.normalize_inbound(payload);

        #[cfg(feature = "metrics")]
        match &normalized {
            Some(msg) => counter!(
                ch_metrics::INBOUND_TOTAL,
                labels::CHANNEL => channel.as_str(),
                labels::KIND => match msg.kind {
                    crate::InboundKind::Message => "message",
                    crate::InboundKind::Receipt => "receipt",
                }
            )
            .increment(1),
            None => counter!(ch_metrics::INBOUND_MALFORMED_TOTAL, labels::CHANNEL => channel.as_str())
                .increment(1),
        }

        if normalized.is_none() {
            debug!(%channel, "inbound payload not recognized");
        }
        normalized
    }

    /// Registered channels in stable order.
    pub fn channels(&self) -> Vec<ChannelType> {
        let mut channels: Vec<_> = self.factories.keys().copied().collect();
        channels.sort();
        channels
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{Accepted, ChannelCapabilities, InboundKind, LatencyClass},
        async_trait::async_trait,
        courier_common::{MessageStatus, Metadata},
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    struct StubAdapter {
        channel: ChannelType,
        configured: bool,
        sends: AtomicUsize,
    }

    impl StubAdapter {
        fn new(channel: ChannelType, configured: bool) -> Arc<Self> {
            Arc::new(Self {
                channel,
                configured,
                sends: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChannelAdapter for StubAdapter {
        fn channel(&self) -> ChannelType {
            self.channel
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        fn capabilities(&self) -> ChannelCapabilities {
            ChannelCapabilities {
                display_name: "Stub".into(),
                cost_per_unit: 0.0,
                reliability_pct: 100.0,
                latency_class: LatencyClass::Realtime,
                supports_read: false,
            }
        }

        async fn send(&self, _request: &SendRequest) -> SendOutcome {
            self.sends.fetch_add(1, Ordering::SeqCst);
            SendOutcome::sent(Accepted {
                message_id: Some("stub-1".into()),
                metadata: Metadata::new(),
            })
        }

        fn normalize_inbound(&self, payload: &serde_json::Value) -> Option<NormalizedMessage> {
            let body = payload.get("body")?.as_str()?;
            Some(NormalizedMessage {
                channel: self.channel,
                kind: InboundKind::Message,
                external_id: None,
                from: None,
                to: None,
                content: body.to_string(),
                status: MessageStatus::Delivered,
                metadata: Metadata::new(),
            })
        }
    }

    #[test]
    fn factory_runs_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = AdapterRegistry::new();
        let counter = Arc::clone(&builds);
        registry.register(ChannelType::Sms, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            StubAdapter::new(ChannelType::Sms, true) as Arc<dyn ChannelAdapter>
        });

        let a = registry.get_adapter(ChannelType::Sms).unwrap();
        let b = registry.get_adapter(ChannelType::Sms).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_first_access_shares_instance() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = AdapterRegistry::new();
        let counter = Arc::clone(&builds);
        registry.register(ChannelType::Chat, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            StubAdapter::new(ChannelType::Chat, true) as Arc<dyn ChannelAdapter>
        });
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_adapter(ChannelType::Chat).unwrap())
            })
            .collect();
        let adapters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(adapters.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_channel() {
        let registry = AdapterRegistry::new();
        assert!(registry.get_adapter(ChannelType::Email).is_none());
        assert!(!registry.is_enabled(ChannelType::Email));
        assert!(registry.channels().is_empty());
    }

    #[tokio::test]
    async fn dispatch_routes_to_configured_adapter() {
        let sms = StubAdapter::new(ChannelType::Sms, true);
        let mut registry = AdapterRegistry::new();
        registry.register_adapter(sms.clone());

        let outcome = registry
            .dispatch(&SendRequest::new(ChannelType::Sms, "+15551234567", "hi"))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.message_id.as_deref(), Some("stub-1"));
        assert_eq!(sms.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unconfigured_adapter_is_never_called() {
        let email = StubAdapter::new(ChannelType::Email, false);
        let mut registry = AdapterRegistry::new();
        registry.register_adapter(email.clone());

        assert!(!registry.is_enabled(ChannelType::Email));
        let outcome = registry
            .dispatch(&SendRequest::new(ChannelType::Email, "a@b.c", "hi"))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("channel not enabled: email"));
        assert_eq!(email.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_channel_dispatch_fails() {
        let registry = AdapterRegistry::new();
        let outcome = registry
            .dispatch(&SendRequest::new(ChannelType::Chat, "x", "hi"))
            .await;
        assert_eq!(outcome.error.as_deref(), Some("channel not enabled: chat"));
    }

    #[test]
    fn ingest_uses_channel_adapter() {
        let mut registry = AdapterRegistry::new();
        registry.register_adapter(StubAdapter::new(ChannelType::Chat, true));

        let msg = registry
            .ingest(ChannelType::Chat, &serde_json::json!({ "body": "hello" }))
            .unwrap();
        assert_eq!(msg.content, "hello");
        assert!(
            registry
                .ingest(ChannelType::Chat, &serde_json::json!({ "nope": 1 }))
                .is_none()
        );
        assert!(
            registry
                .ingest(ChannelType::Sms, &serde_json::json!({ "body": "x" }))
                .is_none()
        );
    }

    #[test]
    fn channels_sorted() {
        let mut registry = AdapterRegistry::new();
        registry.register_adapter(StubAdapter::new(ChannelType::Email, true));
        registry.register_adapter(StubAdapter::new(ChannelType::Sms, true));
        assert_eq!(registry.channels(), vec![ChannelType::Sms, ChannelType::Email]);
    }
}
