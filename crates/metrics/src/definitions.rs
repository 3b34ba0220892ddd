//! Metric name and label definitions.
//!
//! Every metric courier emits through the `metrics` facade is named here so the
//! exported surface can be read in one place.

/// Outbound dispatch metrics (immediate and scheduled sends alike)
pub mod dispatch {
    /// Total dispatch attempts, labelled by channel and success
    pub const ATTEMPTS_TOTAL: &str = "courier_dispatch_attempts_total";
    /// Failed dispatch attempts by channel
    pub const FAILURES_TOTAL: &str = "courier_dispatch_failures_total";
    /// Dispatch latency in seconds, from adapter call to outcome
    pub const DURATION_SECONDS: &str = "courier_dispatch_duration_seconds";
    /// Accumulated send cost by channel
    pub const COST_TOTAL: &str = "courier_dispatch_cost_total";
}

/// Channel adapter metrics
pub mod channels {
    /// Number of channels whose adapter has a valid configuration
    pub const ACTIVE: &str = "courier_channels_active";
    /// Inbound payloads normalized, labelled by channel and kind
    pub const INBOUND_TOTAL: &str = "courier_channel_inbound_total";
    /// Inbound payloads an adapter could not parse
    pub const INBOUND_MALFORMED_TOTAL: &str = "courier_channel_inbound_malformed_total";
}

/// Delivery scheduler metrics
pub mod scheduler {
    /// Number of armed in-memory timers
    pub const TIMERS_ARMED: &str = "courier_scheduler_timers_armed";
    /// Messages accepted by `schedule`
    pub const SCHEDULED_TOTAL: &str = "courier_scheduler_scheduled_total";
    /// Scheduled messages cancelled
    pub const CANCELLED_TOTAL: &str = "courier_scheduler_cancelled_total";
    /// Reconciliation passes run
    pub const RECONCILE_RUNS_TOTAL: &str = "courier_scheduler_reconcile_runs_total";
    /// Overdue messages picked up by reconciliation
    pub const RECONCILE_OVERDUE_TOTAL: &str = "courier_scheduler_reconcile_overdue_total";
    /// Delay between a message's due time and its dispatch, in seconds
    pub const FIRE_DELAY_SECONDS: &str = "courier_scheduler_fire_delay_seconds";
}

/// Common label keys used across metrics
pub mod labels {
    pub const CHANNEL: &str = "channel";
    pub const SUCCESS: &str = "success";
    pub const KIND: &str = "kind";
    pub const SOURCE: &str = "source";
}

/// Standard histogram buckets
pub mod buckets {
    /// Dispatch duration buckets (in seconds)
    /// Covers 5ms to 60s
    pub const DISPATCH_DURATION: [f64; 12] = [
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 60.0,
    ];

    /// Timer fire delay buckets (in seconds)
    /// Covers 10ms to 10 minutes; reconciliation catches things up to an interval late
    pub const FIRE_DELAY: [f64; 11] = [
        0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 600.0,
    ];
}
