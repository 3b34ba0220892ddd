//! Delivery scheduler: per-message timers, startup recovery, periodic
//! reconciliation against the message store.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex as StdMutex, MutexGuard},
    time::Duration,
};

use {
    chrono::{DateTime, TimeDelta, Utc},
    courier_channels::{AdapterRegistry, SendOutcome, SendRequest},
    courier_common::{DeliveryEvent, Message, MessageId, MessageStatus},
    courier_metrics::{
        MetricsAggregator, counter, gauge, histogram, labels, scheduler as sched_metrics,
    },
    tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior},
    tracing::{debug, error, info, warn},
};

use crate::{
    Result,
    error::Context,
    notify::DeliveryNotifier,
    store::MessageStore,
    types::{ScheduleRequest, SchedulerConfig, SchedulerStatus},
};

/// Shortest reconciliation period accepted; `tokio::time::interval` rejects zero.
const MIN_RECONCILE_INTERVAL: Duration = Duration::from_millis(10);

/// Send through the registry, timing the call and recording the outcome.
///
/// The unit cost comes from the channel's capabilities and is only charged on
/// success.
pub async fn measured_send(
    registry: &AdapterRegistry,
    metrics: &MetricsAggregator,
    request: &SendRequest,
) -> SendOutcome {
    let unit_cost = registry
        .get_adapter(request.channel)
        .map_or(0.0, |adapter| adapter.capabilities().cost_per_unit);
    let result = metrics
        .measure_latency(request.channel, unit_cost, async {
            let outcome = registry.dispatch(request).await;
            if outcome.success {
                Ok(outcome)
            } else {
                Err(outcome)
            }
        })
        .await;
    match result {
        Ok(outcome) | Err(outcome) => outcome,
    }
}

/// An armed timer. The store row is the durable record; this is only an index
/// into the runtime's timer machinery.
struct ScheduledEntry {
    fires_at: DateTime<Utc>,
    cancel_handle: JoinHandle<()>,
}

/// Marks a message id as being dispatched; released on drop.
struct DispatchClaim<'a> {
    claims: &'a StdMutex<HashSet<MessageId>>,
    message_id: MessageId,
}

impl<'a> DispatchClaim<'a> {
    fn acquire(claims: &'a StdMutex<HashSet<MessageId>>, message_id: &str) -> Option<Self> {
        let inserted = claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(message_id.to_string());
        inserted.then(|| Self {
            claims,
            message_id: message_id.to_string(),
        })
    }
}

impl Drop for DispatchClaim<'_> {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.message_id);
    }
}

/// Owns the timers for upcoming scheduled messages and performs their dispatch.
///
/// One instance per process. Running two against the same store can send a
/// message twice; see DESIGN.md.
pub struct DeliveryScheduler {
    store: Arc<dyn MessageStore>,
    registry: Arc<AdapterRegistry>,
    metrics: Arc<MetricsAggregator>,
    notifier: Arc<dyn DeliveryNotifier>,
    config: SchedulerConfig,
    timers: StdMutex<HashMap<MessageId, ScheduledEntry>>,
    claims: StdMutex<HashSet<MessageId>>,
    reconcile_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryScheduler {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<AdapterRegistry>,
        metrics: Arc<MetricsAggregator>,
        notifier: Arc<dyn DeliveryNotifier>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            metrics,
            notifier,
            config,
            timers: StdMutex::new(HashMap::new()),
            claims: StdMutex::new(HashSet::new()),
            reconcile_handle: Mutex::new(None),
        })
    }

    /// Rebuild timers from the store, flush overdue messages, and start the
    /// periodic reconciliation task. Calling it while running is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut handle = self.reconcile_handle.lock().await;
        if handle.is_some() {
            debug!("delivery scheduler already running");
            return Ok(());
        }

        let recovered = self.recover().await?;
        let overdue = self.dispatch_overdue().await?;

        let svc = Arc::clone(self);
        let every = self.config.reconcile_interval.max(MIN_RECONCILE_INTERVAL);
        *handle = Some(tokio::spawn(async move {
            svc.reconcile_loop(every).await;
        }));

        info!(
            recovered,
            overdue,
            armed = self.armed_count(),
            reconcile_secs = every.as_secs_f64(),
            "delivery scheduler started"
        );
        Ok(())
    }

    /// Abort every armed timer and the reconciliation task.
    pub async fn stop(&self) {
        let reconcile = self.reconcile_handle.lock().await.take();
        if let Some(handle) = reconcile {
            handle.abort();
            // A pass between its store query and its enqueue loop only stops
            // at its next await; wait for it so it cannot arm timers after
            // the map is drained.
            let _ = handle.await;
        }

        let disarmed: Vec<ScheduledEntry> = {
            let mut timers = self.lock_timers();
            timers.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &disarmed {
            entry.cancel_handle.abort();
        }
        gauge!(sched_metrics::TIMERS_ARMED).set(0.0);
        info!(disarmed = disarmed.len(), "delivery scheduler stopped");
    }

    /// Persist a new scheduled message and arm its timer.
    ///
    /// The message is durable once this returns; a crash before the timer
    /// fires is covered by recovery on the next [`start`](Self::start).
    pub async fn schedule(self: &Arc<Self>, request: ScheduleRequest) -> Result<MessageId> {
        request.validate(Utc::now())?;
        let channel = request.channel;
        let message = self.store.create(request.into_new_message()).await?;
        let fires_at = message
            .scheduled_at
            .context("stored scheduled message has no due time")?;

        counter!(sched_metrics::SCHEDULED_TOTAL, labels::CHANNEL => channel.as_str()).increment(1);
        info!(
            message_id = %message.id,
            %channel,
            fires_at = %fires_at.to_rfc3339(),
            "message scheduled"
        );

        self.enqueue(&message.id, fires_at).await;
        Ok(message.id)
    }

    /// Track `message_id` for delivery at `fires_at`.
    ///
    /// Already tracked ids are left alone. A due time at or before now
    /// dispatches immediately without arming anything. Returns true when this
    /// call armed a timer or dispatched.
    pub async fn enqueue(self: &Arc<Self>, message_id: &str, fires_at: DateTime<Utc>) -> bool {
        {
            let mut timers = self.lock_timers();
            if timers.contains_key(message_id) {
                return false;
            }
            let delay = (fires_at - Utc::now())
                .to_std()
                .ok()
                .filter(|d| !d.is_zero());
            if let Some(delay) = delay {
                let svc = Arc::clone(self);
                let id = message_id.to_string();
                // The entry is inserted before the guard drops, so the timer
                // task always finds it when it fires.
                let cancel_handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    svc.fire(&id, fires_at).await;
                });
                timers.insert(message_id.to_string(), ScheduledEntry {
                    fires_at,
                    cancel_handle,
                });
                gauge!(sched_metrics::TIMERS_ARMED).set(timers.len() as f64);
                debug!(message_id, fires_at = %fires_at.to_rfc3339(), "timer armed");
                return true;
            }
        }

        debug!(message_id, "due on enqueue, dispatching now");
        self.dispatch(message_id).await;
        true
    }

    /// Cancel a scheduled send.
    ///
    /// Disarms the timer if one is armed here, then marks the message `failed`
    /// in the store whether or not a timer existed. `Ok(false)` only when the
    /// store has no such message.
    pub async fn cancel(&self, message_id: &str) -> Result<bool> {
        let had_timer = self.disarm(message_id);
        match self
            .store
            .update_status(message_id, MessageStatus::Failed)
            .await
        {
            Ok(()) => {
                counter!(sched_metrics::CANCELLED_TOTAL).increment(1);
                info!(message_id, had_timer, "scheduled message cancelled");
                Ok(true)
            },
            Err(e) if e.is_not_found() => {
                warn!(message_id, "cancel requested for unknown message");
                Ok(false)
            },
            Err(e) => Err(e),
        }
    }

    /// Send one scheduled message if it is still `scheduled`.
    ///
    /// Concurrent calls for the same id collapse to one. Nothing is returned:
    /// every failure is logged and recorded as a `failed` status so a bad send
    /// never stops a timer or the reconciliation loop.
    pub async fn dispatch(&self, message_id: &str) {
        let Some(_claim) = DispatchClaim::acquire(&self.claims, message_id) else {
            debug!(message_id, "dispatch already in flight");
            return;
        };

        let message = match self.store.find_by_id(message_id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(message_id, "scheduled message no longer exists");
                return;
            },
            Err(e) => {
                error!(message_id, error = %e, "could not load scheduled message");
                self.mark_failed(message_id).await;
                return;
            },
        };
        if message.status != MessageStatus::Scheduled {
            debug!(message_id, status = %message.status, "message already handled");
            return;
        }

        let status = match self.deliver(&message).await {
            Ok(status) => status,
            Err(e) => {
                error!(message_id, error = %e, "scheduled dispatch failed");
                self.mark_failed(message_id).await;
                MessageStatus::Failed
            },
        };
        self.notifier
            .publish(DeliveryEvent::for_message(&message, status))
            .await;
    }

    pub async fn status(&self) -> SchedulerStatus {
        let running = self.reconcile_handle.lock().await.is_some();
        let timers = self.lock_timers();
        let next = timers.iter().min_by_key(|(_, entry)| entry.fires_at);
        SchedulerStatus {
            running,
            armed_timers: timers.len(),
            next_fire_at: next.map(|(_, entry)| entry.fires_at),
            next_message_id: next.map(|(id, _)| id.clone()),
        }
    }

    /// Ids with an armed timer, soonest first.
    pub fn scheduled_ids(&self) -> Vec<MessageId> {
        let timers = self.lock_timers();
        let mut armed: Vec<_> = timers
            .iter()
            .map(|(id, entry)| (entry.fires_at, id.clone()))
            .collect();
        armed.sort();
        armed.into_iter().map(|(_, id)| id).collect()
    }

    pub fn is_armed(&self, message_id: &str) -> bool {
        self.lock_timers().contains_key(message_id)
    }

    pub fn armed_count(&self) -> usize {
        self.lock_timers().len()
    }

    // ── Internal ────────────────────────────────────────────────────────

    fn lock_timers(&self) -> MutexGuard<'_, HashMap<MessageId, ScheduledEntry>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn horizon(&self) -> DateTime<Utc> {
        let lookahead = TimeDelta::from_std(self.config.lookahead).unwrap_or(TimeDelta::MAX);
        Utc::now()
            .checked_add_signed(lookahead)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Remove and abort the timer for `message_id`, if armed.
    fn disarm(&self, message_id: &str) -> bool {
        let entry = {
            let mut timers = self.lock_timers();
            let entry = timers.remove(message_id);
            gauge!(sched_metrics::TIMERS_ARMED).set(timers.len() as f64);
            entry
        };
        match entry {
            Some(entry) => {
                entry.cancel_handle.abort();
                debug!(message_id, "timer disarmed");
                true
            },
            None => false,
        }
    }

    /// Enqueue every `scheduled` message due within the look-ahead window,
    /// overdue ones included.
    async fn recover(self: &Arc<Self>) -> Result<usize> {
        let upcoming = self
            .store
            .find_by_status_and_scheduled_before(MessageStatus::Scheduled, self.horizon())
            .await?;
        let count = upcoming.len();
        for message in upcoming {
            if let Some(fires_at) = message.scheduled_at {
                self.enqueue(&message.id, fires_at).await;
            }
        }
        Ok(count)
    }

    /// Dispatch every `scheduled` message whose due time has passed.
    async fn dispatch_overdue(&self) -> Result<usize> {
        let overdue = self
            .store
            .find_by_status_and_scheduled_before(MessageStatus::Scheduled, Utc::now())
            .await?;
        for message in &overdue {
            self.disarm(&message.id);
            self.dispatch(&message.id).await;
        }
        if !overdue.is_empty() {
            counter!(sched_metrics::RECONCILE_OVERDUE_TOTAL).increment(overdue.len() as u64);
        }
        Ok(overdue.len())
    }

    async fn reconcile(self: &Arc<Self>) -> Result<()> {
        counter!(sched_metrics::RECONCILE_RUNS_TOTAL).increment(1);
        let overdue = self.dispatch_overdue().await?;

        // Messages that were beyond the window at start, or written by
        // another process, get their timers here.
        let upcoming = self
            .store
            .find_by_status_and_scheduled_before(MessageStatus::Scheduled, self.horizon())
            .await?;
        let mut armed = 0usize;
        for message in upcoming {
            if let Some(fires_at) = message.scheduled_at {
                if self.enqueue(&message.id, fires_at).await {
                    armed += 1;
                }
            }
        }

        if overdue > 0 || armed > 0 {
            info!(overdue, armed, "reconciliation pass");
        } else {
            debug!("reconciliation pass, nothing to do");
        }
        Ok(())
    }

    async fn reconcile_loop(self: Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; start() has just swept.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.reconcile().await {
                error!(error = %e, "reconciliation pass failed");
            }
        }
    }

    async fn fire(&self, message_id: &str, fires_at: DateTime<Utc>) {
        {
            let mut timers = self.lock_timers();
            timers.remove(message_id);
            gauge!(sched_metrics::TIMERS_ARMED).set(timers.len() as f64);
        }
        let late = (Utc::now() - fires_at).to_std().unwrap_or_default();
        histogram!(sched_metrics::FIRE_DELAY_SECONDS, labels::SOURCE => "timer")
            .record(late.as_secs_f64());
        self.dispatch(message_id).await;
    }

    /// Transmit `message` and record the terminal status it reached.
    async fn deliver(&self, message: &Message) -> Result<MessageStatus> {
        let message_id = message.id.as_str();
        let outcome =
            measured_send(&self.registry, &self.metrics, &SendRequest::from(message)).await;
        let status = if outcome.success {
            MessageStatus::Sent
        } else {
            MessageStatus::Failed
        };

        if outcome.success && !outcome.metadata.is_empty() {
            self.store
                .merge_metadata(message_id, outcome.metadata)
                .await?;
        }
        self.store.update_status(message_id, status).await?;

        match &outcome.error {
            Some(reason) => warn!(
                message_id,
                channel = %message.channel,
                error = %reason,
                "scheduled send failed"
            ),
            None => info!(
                message_id,
                channel = %message.channel,
                external_id = outcome.message_id.as_deref().unwrap_or(""),
                "scheduled send delivered to channel"
            ),
        }
        Ok(status)
    }

    async fn mark_failed(&self, message_id: &str) {
        if let Err(e) = self
            .store
            .update_status(message_id, MessageStatus::Failed)
            .await
        {
            error!(message_id, error = %e, "could not mark message failed");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{BroadcastNotifier, Error, InMemoryStore},
        async_trait::async_trait,
        chrono::Duration as ChronoDuration,
        courier_channels::{
            Accepted, ChannelAdapter, ChannelCapabilities, LatencyClass, NormalizedMessage,
        },
        courier_common::{
            ChannelType, Direction, EXTERNAL_ID_KEY, Message, Metadata, NewMessage,
            ScheduledFilter,
        },
        std::sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        tokio::sync::Notify,
    };

    struct StubAdapter {
        channel: ChannelType,
        succeed: bool,
        delay: Duration,
        sends: AtomicUsize,
    }

    impl StubAdapter {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                channel: ChannelType::Sms,
                succeed,
                delay: Duration::ZERO,
                sends: AtomicUsize::new(0),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                channel: ChannelType::Sms,
                succeed: true,
                delay,
                sends: AtomicUsize::new(0),
            })
        }

        fn sends(&self) -> usize {
            self.sends.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChannelAdapter for StubAdapter {
        fn channel(&self) -> ChannelType {
            self.channel
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn capabilities(&self) -> ChannelCapabilities {
            ChannelCapabilities {
                display_name: "Stub".into(),
                cost_per_unit: 0.01,
                reliability_pct: 100.0,
                latency_class: LatencyClass::Realtime,
                supports_read: false,
            }
        }

        async fn send(&self, _request: &SendRequest) -> SendOutcome {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.succeed {
                SendOutcome::sent(Accepted {
                    message_id: Some(format!("stub-{n}")),
                    metadata: Metadata::new(),
                })
            } else {
                SendOutcome::failure("stub refused")
            }
        }

        fn normalize_inbound(&self, _payload: &serde_json::Value) -> Option<NormalizedMessage> {
            None
        }
    }

    /// In-memory store that can fail status writes and stall due-time queries.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        failing_updates: AtomicUsize,
        stall_queries: AtomicBool,
        query_stalled: Notify,
    }

    impl FlakyStore {
        fn fail_next_updates(&self, n: usize) {
            self.failing_updates.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MessageStore for FlakyStore {
        async fn create(&self, message: NewMessage) -> Result<Message> {
            self.inner.create(message).await
        }

        async fn update_status(&self, id: &str, status: MessageStatus) -> Result<()> {
            let failing = self
                .failing_updates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return Err(Error::message("database is locked"));
            }
            self.inner.update_status(id, status).await
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_status_and_scheduled_before(
            &self,
            status: MessageStatus,
            before: DateTime<Utc>,
        ) -> Result<Vec<Message>> {
            if self.stall_queries.load(Ordering::SeqCst) {
                self.query_stalled.notify_one();
                // Blocks the worker like a slow synchronous driver call.
                std::thread::sleep(Duration::from_millis(300));
            }
            self.inner
                .find_by_status_and_scheduled_before(status, before)
                .await
        }

        async fn find_scheduled_by_filters(
            &self,
            filter: &ScheduledFilter,
        ) -> Result<Vec<Message>> {
            self.inner.find_scheduled_by_filters(filter).await
        }

        async fn merge_metadata(&self, id: &str, patch: Metadata) -> Result<()> {
            self.inner.merge_metadata(id, patch).await
        }

        async fn find_by_external_id(
            &self,
            channel: ChannelType,
            external_id: &str,
        ) -> Result<Option<Message>> {
            self.inner.find_by_external_id(channel, external_id).await
        }
    }

    fn scheduler_on(
        adapter: &Arc<StubAdapter>,
        store: Arc<FlakyStore>,
        config: SchedulerConfig,
    ) -> (Arc<DeliveryScheduler>, Arc<BroadcastNotifier>) {
        let mut registry = AdapterRegistry::new();
        let adapter: Arc<dyn ChannelAdapter> = adapter.clone();
        registry.register_adapter(adapter);
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let scheduler = DeliveryScheduler::new(
            store,
            Arc::new(registry),
            Arc::new(MetricsAggregator::new()),
            notifier.clone(),
            config,
        );
        (scheduler, notifier)
    }

    struct Harness {
        scheduler: Arc<DeliveryScheduler>,
        store: Arc<InMemoryStore>,
        metrics: Arc<MetricsAggregator>,
        notifier: Arc<BroadcastNotifier>,
    }

    fn harness_with(adapter: &Arc<StubAdapter>, config: SchedulerConfig) -> Harness {
        let mut registry = AdapterRegistry::new();
        let adapter: Arc<dyn ChannelAdapter> = adapter.clone();
        registry.register_adapter(adapter);

        let store = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(MetricsAggregator::new());
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let scheduler = DeliveryScheduler::new(
            store.clone(),
            Arc::new(registry),
            metrics.clone(),
            notifier.clone(),
            config,
        );
        Harness {
            scheduler,
            store,
            metrics,
            notifier,
        }
    }

    fn harness(adapter: &Arc<StubAdapter>) -> Harness {
        harness_with(adapter, SchedulerConfig::default())
    }

    fn scheduled_message(id: &str, channel: ChannelType, at: DateTime<Utc>) -> Message {
        NewMessage {
            content: "hi".into(),
            channel,
            direction: Direction::Outbound,
            status: MessageStatus::Scheduled,
            to: "+15551234567".into(),
            from: None,
            scheduled_at: Some(at),
            contact_id: Some("contact-1".into()),
            user_id: None,
            team_id: None,
            metadata: Metadata::new(),
        }
        .into_message(id.into(), Utc::now())
    }

    async fn status_of(store: &InMemoryStore, id: &str) -> MessageStatus {
        store.find_by_id(id).await.unwrap().unwrap().status
    }

    fn in_millis(ms: i64) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::milliseconds(ms)
    }

    #[tokio::test]
    async fn scheduled_message_fires_on_time() {
        let adapter = StubAdapter::new(true);
        let h = harness(&adapter);
        let mut events = h.notifier.subscribe();

        let id = h
            .scheduler
            .schedule(ScheduleRequest::new(
                ChannelType::Sms,
                "+15551234567",
                "hi",
                in_millis(300),
            ))
            .await
            .unwrap();
        assert!(h.scheduler.is_armed(&id));
        assert_eq!(status_of(&h.store, &id).await, MessageStatus::Scheduled);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(status_of(&h.store, &id).await, MessageStatus::Scheduled);
        assert_eq!(adapter.sends(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let msg = h.store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.metadata[EXTERNAL_ID_KEY], "stub-0");
        assert_eq!(adapter.sends(), 1);
        assert!(!h.scheduler.is_armed(&id));

        let metrics = h.metrics.channel_metrics(ChannelType::Sms).unwrap();
        assert_eq!(metrics.total_messages, 1);
        assert_eq!(metrics.successful_messages, 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.message_id, id);
        assert_eq!(event.status, MessageStatus::Sent);
        assert_eq!(event.recipient, "+15551234567");
    }

    #[tokio::test]
    async fn schedule_rejects_invalid_requests() {
        let adapter = StubAdapter::new(true);
        let h = harness(&adapter);

        let past = ScheduleRequest::new(ChannelType::Sms, "+1555", "hi", in_millis(-1000));
        assert!(matches!(
            h.scheduler.schedule(past).await,
            Err(Error::Validation { .. })
        ));
        let blank = ScheduleRequest::new(ChannelType::Sms, "", "hi", in_millis(60_000));
        assert!(h.scheduler.schedule(blank).await.is_err());
        assert!(h.store.is_empty());
        assert_eq!(h.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_dispatch_sends_once() {
        let adapter = StubAdapter::slow(Duration::from_millis(100));
        let h = harness(&adapter);
        h.store
            .insert(scheduled_message("m-1", ChannelType::Sms, in_millis(-10)));

        tokio::join!(h.scheduler.dispatch("m-1"), h.scheduler.dispatch("m-1"));

        assert_eq!(adapter.sends(), 1);
        assert_eq!(status_of(&h.store, "m-1").await, MessageStatus::Sent);
        assert_eq!(
            h.metrics
                .channel_metrics(ChannelType::Sms)
                .unwrap()
                .total_messages,
            1
        );

        // A later call sees a terminal status and does nothing.
        h.scheduler.dispatch("m-1").await;
        assert_eq!(adapter.sends(), 1);
    }

    #[tokio::test]
    async fn dispatch_of_unknown_id_is_a_no_op() {
        let adapter = StubAdapter::new(true);
        let h = harness(&adapter);
        h.scheduler.dispatch("ghost").await;
        assert_eq!(adapter.sends(), 0);
        assert!(h.metrics.channel_metrics(ChannelType::Sms).is_none());
    }

    #[tokio::test]
    async fn failed_send_marks_failed_and_counts() {
        let adapter = StubAdapter::new(false);
        let h = harness(&adapter);
        let mut events = h.notifier.subscribe();
        h.store
            .insert(scheduled_message("m-1", ChannelType::Sms, in_millis(-10)));

        h.scheduler.dispatch("m-1").await;

        let msg = h.store.find_by_id("m-1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert!(msg.external_id().is_none());
        let metrics = h.metrics.channel_metrics(ChannelType::Sms).unwrap();
        assert_eq!(metrics.failed_messages, 1);
        assert_eq!(metrics.total_cost, 0.0);
        assert_eq!(events.recv().await.unwrap().status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn disabled_channel_fails_the_message() {
        let adapter = StubAdapter::new(true);
        let h = harness(&adapter);
        h.store
            .insert(scheduled_message("m-1", ChannelType::Email, in_millis(-10)));

        h.scheduler.dispatch("m-1").await;

        assert_eq!(status_of(&h.store, "m-1").await, MessageStatus::Failed);
        assert_eq!(adapter.sends(), 0);
    }

    #[tokio::test]
    async fn start_recovers_overdue_and_arms_upcoming() {
        let adapter = StubAdapter::new(true);
        let h = harness(&adapter);
        h.store
            .insert(scheduled_message("overdue-1", ChannelType::Sms, in_millis(-60_000)));
        h.store
            .insert(scheduled_message("overdue-2", ChannelType::Sms, in_millis(-5)));
        h.store
            .insert(scheduled_message("soon", ChannelType::Sms, in_millis(60_000)));
        h.store.insert(scheduled_message(
            "later",
            ChannelType::Sms,
            Utc::now() + ChronoDuration::hours(48),
        ));

        h.scheduler.start().await.unwrap();

        assert_eq!(status_of(&h.store, "overdue-1").await, MessageStatus::Sent);
        assert_eq!(status_of(&h.store, "overdue-2").await, MessageStatus::Sent);
        assert_eq!(adapter.sends(), 2);
        assert_eq!(h.scheduler.scheduled_ids(), vec!["soon".to_string()]);

        let status = h.scheduler.status().await;
        assert!(status.running);
        assert_eq!(status.armed_timers, 1);
        assert_eq!(status.next_message_id.as_deref(), Some("soon"));

        // Second start is a no-op.
        h.scheduler.start().await.unwrap();
        assert_eq!(h.scheduler.armed_count(), 1);
        assert_eq!(adapter.sends(), 2);

        h.scheduler.stop().await;
    }

    #[tokio::test]
    async fn cancel_before_fire_prevents_send() {
        let adapter = StubAdapter::new(true);
        let h = harness(&adapter);
        let id = h
            .scheduler
            .schedule(ScheduleRequest::new(
                ChannelType::Sms,
                "+15551234567",
                "hi",
                in_millis(400),
            ))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.scheduler.cancel(&id).await.unwrap());
        assert!(!h.scheduler.is_armed(&id));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(adapter.sends(), 0);
        assert_eq!(status_of(&h.store, &id).await, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_without_timer_still_writes_failed() {
        let adapter = StubAdapter::new(true);
        let h = harness(&adapter);
        h.store
            .insert(scheduled_message("m-1", ChannelType::Sms, in_millis(60_000)));

        assert!(h.scheduler.cancel("m-1").await.unwrap());
        assert_eq!(status_of(&h.store, "m-1").await, MessageStatus::Failed);
        assert!(!h.scheduler.cancel("missing").await.unwrap());
    }

    #[tokio::test]
    async fn enqueue_is_idempotent() {
        let adapter = StubAdapter::new(true);
        let h = harness(&adapter);
        h.store
            .insert(scheduled_message("m-1", ChannelType::Sms, in_millis(60_000)));
        let at = in_millis(60_000);

        assert!(h.scheduler.enqueue("m-1", at).await);
        assert!(!h.scheduler.enqueue("m-1", at).await);
        assert_eq!(h.scheduler.armed_count(), 1);
        h.scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_all_timers() {
        let adapter = StubAdapter::new(true);
        let h = harness(&adapter);

        for _ in 0..2 {
            h.scheduler.start().await.unwrap();
            for offset in [60_000, 120_000, 180_000] {
                h.scheduler
                    .schedule(ScheduleRequest::new(
                        ChannelType::Sms,
                        "+15551234567",
                        "hi",
                        in_millis(offset),
                    ))
                    .await
                    .unwrap();
            }
            assert!(h.scheduler.armed_count() >= 3);

            h.scheduler.stop().await;
            let status = h.scheduler.status().await;
            assert!(!status.running);
            assert_eq!(status.armed_timers, 0);
            assert!(status.next_fire_at.is_none());
        }
        assert_eq!(adapter.sends(), 0);
    }

    #[tokio::test]
    async fn periodic_pass_catches_rows_written_elsewhere() {
        let adapter = StubAdapter::new(true);
        let h = harness_with(&adapter, SchedulerConfig {
            reconcile_interval: Duration::from_millis(100),
            ..SchedulerConfig::default()
        });
        h.scheduler.start().await.unwrap();

        // Written behind the scheduler's back, as another process would.
        h.store
            .insert(scheduled_message("foreign", ChannelType::Sms, in_millis(-1)));
        h.store
            .insert(scheduled_message("upcoming", ChannelType::Sms, in_millis(60_000)));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(status_of(&h.store, "foreign").await, MessageStatus::Sent);
        assert!(h.scheduler.is_armed("upcoming"));

        h.scheduler.stop().await;
    }

    #[tokio::test]
    async fn store_error_during_dispatch_fails_message_and_loop_continues() {
        let adapter = StubAdapter::new(true);
        let store = Arc::new(FlakyStore::default());
        let (scheduler, notifier) = scheduler_on(&adapter, store.clone(), SchedulerConfig {
            reconcile_interval: Duration::from_millis(100),
            ..SchedulerConfig::default()
        });
        let mut events = notifier.subscribe();
        scheduler.start().await.unwrap();

        store.fail_next_updates(1);
        store
            .inner
            .insert(scheduled_message("broken", ChannelType::Sms, in_millis(-1)));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(status_of(&store.inner, "broken").await, MessageStatus::Failed);
        let event = events.recv().await.unwrap();
        assert_eq!(event.message_id, "broken");
        assert_eq!(event.status, MessageStatus::Failed);

        store
            .inner
            .insert(scheduled_message("next", ChannelType::Sms, in_millis(-1)));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(scheduler.status().await.running);
        assert_eq!(status_of(&store.inner, "next").await, MessageStatus::Sent);
        assert_eq!(adapter.sends(), 2);
        assert_eq!(events.recv().await.unwrap().status, MessageStatus::Sent);

        scheduler.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_an_in_flight_reconcile_pass() {
        let adapter = StubAdapter::new(true);
        let store = Arc::new(FlakyStore::default());
        let (scheduler, _) = scheduler_on(&adapter, store.clone(), SchedulerConfig {
            reconcile_interval: Duration::from_millis(50),
            ..SchedulerConfig::default()
        });
        scheduler.start().await.unwrap();

        // Only the stalled reconcile pass can arm this one.
        store.stall_queries.store(true, Ordering::SeqCst);
        store
            .inner
            .insert(scheduled_message("late-arrival", ChannelType::Sms, in_millis(2000)));
        tokio::time::timeout(Duration::from_secs(2), store.query_stalled.notified())
            .await
            .unwrap();

        scheduler.stop().await;
        assert_eq!(scheduler.armed_count(), 0);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let status = scheduler.status().await;
        assert!(!status.running);
        assert_eq!(status.armed_timers, 0);
        assert_eq!(adapter.sends(), 0);
        assert_eq!(
            status_of(&store.inner, "late-arrival").await,
            MessageStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn measured_send_charges_only_success() {
        let ok = StubAdapter::new(true);
        let mut registry = AdapterRegistry::new();
        let dyn_ok: Arc<dyn ChannelAdapter> = ok.clone();
        registry.register_adapter(dyn_ok);
        let metrics = MetricsAggregator::new();

        let outcome = measured_send(
            &registry,
            &metrics,
            &SendRequest::new(ChannelType::Sms, "+1", "a"),
        )
        .await;
        assert!(outcome.success);
        let outcome = measured_send(
            &registry,
            &metrics,
            &SendRequest::new(ChannelType::Chat, "+1", "a"),
        )
        .await;
        assert_eq!(outcome.error.as_deref(), Some("channel not enabled: chat"));

        let sms = metrics.channel_metrics(ChannelType::Sms).unwrap();
        assert!((sms.total_cost - 0.01).abs() < 1e-9);
        let chat = metrics.channel_metrics(ChannelType::Chat).unwrap();
        assert_eq!(chat.failed_messages, 1);
        assert_eq!(chat.total_cost, 0.0);
    }
}
