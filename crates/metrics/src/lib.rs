//! Dispatch metrics for courier.
//!
//! Two layers:
//!
//! - [`MetricsAggregator`] keeps per-channel counters in process and answers
//!   reporting queries (overview, comparison, recommendations, cost breakdown).
//! - The `metrics` facade carries the same attempts to whatever recorder is
//!   installed. With the `prometheus` feature, [`init_metrics`] installs a
//!   Prometheus recorder and [`MetricsHandle::render`] produces the text format.
//!
//! # Usage
//!
//! ```rust,ignore
//! use courier_metrics::{DispatchRecord, MetricsAggregator};
//! use courier_common::ChannelType;
//!
//! let agg = MetricsAggregator::new();
//! agg.record(DispatchRecord { channel: ChannelType::Sms, success: true, latency_ms: 120.0, cost: 0.0075 });
//! let report = agg.comparison();
//! ```

mod aggregator;
mod definitions;
pub mod error;
mod recorder;

pub use {
    aggregator::{
        ChannelComparison, ChannelMetrics, CostBreakdown, DispatchRecord, MetricsAggregator,
        OverallMetrics,
    },
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
