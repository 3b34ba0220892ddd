//! In-process per-channel dispatch statistics.
//!
//! The aggregator is what `channel_info` and `analysis` read from. Every
//! [`record`](MetricsAggregator::record) also goes out through the `metrics`
//! facade so an installed Prometheus recorder sees the same attempts.

use std::{
    collections::HashMap,
    future::Future,
    sync::Mutex,
    time::Instant,
};

use {
    chrono::{DateTime, Utc},
    courier_common::ChannelType,
    metrics::{counter, gauge, histogram},
    serde::Serialize,
    tracing::debug,
};

use crate::definitions::{dispatch, labels};

/// Reliability below this percentage produces a warning recommendation.
const LOW_RELIABILITY_PCT: f64 = 95.0;
/// Two channels within this many reliability points count as "similar".
const SIMILAR_RELIABILITY_PTS: f64 = 2.0;

/// One completed dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchRecord {
    pub channel: ChannelType,
    pub success: bool,
    pub latency_ms: f64,
    /// Cost charged for this attempt; zero for failures.
    pub cost: f64,
}

/// Running counters for one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMetrics {
    pub total_messages: u64,
    pub successful_messages: u64,
    pub failed_messages: u64,
    pub average_latency_ms: f64,
    pub total_cost: f64,
    pub cost_per_message: f64,
    pub reliability_pct: f64,
    pub last_updated: DateTime<Utc>,
}

impl ChannelMetrics {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_messages: 0,
            successful_messages: 0,
            failed_messages: 0,
            average_latency_ms: 0.0,
            total_cost: 0.0,
            cost_per_message: 0.0,
            reliability_pct: 100.0,
            last_updated: now,
        }
    }

    fn apply(&mut self, record: &DispatchRecord, now: DateTime<Utc>) {
        self.total_messages += 1;
        if record.success {
            self.successful_messages += 1;
        } else {
            self.failed_messages += 1;
        }
        let n = self.total_messages as f64;
        self.average_latency_ms = (self.average_latency_ms * (n - 1.0) + record.latency_ms) / n;
        self.total_cost += record.cost;
        self.cost_per_message = self.total_cost / n;
        self.reliability_pct = self.successful_messages as f64 / n * 100.0;
        self.last_updated = now;
    }
}

/// Cross-channel summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallMetrics {
    pub total_messages: u64,
    pub successful_messages: u64,
    pub failed_messages: u64,
    pub reliability_pct: f64,
    pub average_latency_ms: f64,
    pub total_cost: f64,
}

/// One row of the channel comparison report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelComparison {
    pub channel: ChannelType,
    pub total_messages: u64,
    pub reliability_pct: f64,
    pub average_latency_ms: f64,
    pub total_cost: f64,
    pub cost_per_message: f64,
    /// Share of all spend, 0-100. Zero when nothing has been spent.
    pub cost_percentage: f64,
}

/// Spend attributed to one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub channel: ChannelType,
    pub total_cost: f64,
    pub message_count: u64,
    pub cost_per_message: f64,
    pub percentage: f64,
}

/// Thread-safe per-channel metrics store.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    channels: Mutex<HashMap<ChannelType, ChannelMetrics>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one attempt into the channel's counters.
    ///
    /// All fields of a channel are updated under one lock acquisition, so
    /// readers never see a total that disagrees with its success/failure split.
    pub fn record(&self, record: DispatchRecord) {
        let now = Utc::now();
        let snapshot = {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            let entry = channels
                .entry(record.channel)
                .or_insert_with(|| ChannelMetrics::new(now));
            entry.apply(&record, now);
            entry.clone()
        };

        let channel = record.channel.as_str();
        let success = if record.success { "true" } else { "false" };
        counter!(dispatch::ATTEMPTS_TOTAL, labels::CHANNEL => channel, labels::SUCCESS => success)
            .increment(1);
        if !record.success {
            counter!(dispatch::FAILURES_TOTAL, labels::CHANNEL => channel).increment(1);
        }
        histogram!(dispatch::DURATION_SECONDS, labels::CHANNEL => channel)
            .record(record.latency_ms / 1000.0);
        if record.cost > 0.0 {
            gauge!(dispatch::COST_TOTAL, labels::CHANNEL => channel).increment(record.cost);
        }

        debug!(
            channel,
            success = record.success,
            latency_ms = record.latency_ms,
            total = snapshot.total_messages,
            reliability_pct = snapshot.reliability_pct,
            "dispatch recorded"
        );
    }

    /// Time `op`, record its outcome against `channel`, and hand back its result.
    ///
    /// `unit_cost` is charged only when `op` succeeds.
    pub async fn measure_latency<T, E, F>(
        &self,
        channel: ChannelType,
        unit_cost: f64,
        op: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = op.await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let success = result.is_ok();
        self.record(DispatchRecord {
            channel,
            success,
            latency_ms,
            cost: if success { unit_cost } else { 0.0 },
        });
        result
    }

    pub fn channel_metrics(&self, channel: ChannelType) -> Option<ChannelMetrics> {
        self.lock().get(&channel).cloned()
    }

    /// Snapshot of every channel with at least one record, in channel order.
    pub fn all_channel_metrics(&self) -> Vec<(ChannelType, ChannelMetrics)> {
        let mut all: Vec<_> = self
            .lock()
            .iter()
            .map(|(channel, m)| (*channel, m.clone()))
            .collect();
        all.sort_by_key(|(channel, _)| *channel);
        all
    }

    pub fn overall_metrics(&self) -> OverallMetrics {
        let all = self.all_channel_metrics();
        let total_messages: u64 = all.iter().map(|(_, m)| m.total_messages).sum();
        let successful_messages: u64 = all.iter().map(|(_, m)| m.successful_messages).sum();
        let failed_messages: u64 = all.iter().map(|(_, m)| m.failed_messages).sum();
        let total_cost: f64 = all.iter().map(|(_, m)| m.total_cost).sum();

        let (reliability_pct, average_latency_ms) = if total_messages == 0 {
            (100.0, 0.0)
        } else {
            let n = total_messages as f64;
            let weighted_latency: f64 = all
                .iter()
                .map(|(_, m)| m.average_latency_ms * m.total_messages as f64)
                .sum();
            (successful_messages as f64 / n * 100.0, weighted_latency / n)
        };

        OverallMetrics {
            total_messages,
            successful_messages,
            failed_messages,
            reliability_pct,
            average_latency_ms,
            total_cost,
        }
    }

    /// Per-channel rows sorted by volume, busiest first.
    pub fn comparison(&self) -> Vec<ChannelComparison> {
        let all = self.all_channel_metrics();
        let total_cost: f64 = all.iter().map(|(_, m)| m.total_cost).sum();

        let mut rows: Vec<ChannelComparison> = all
            .into_iter()
            .map(|(channel, m)| ChannelComparison {
                channel,
                total_messages: m.total_messages,
                reliability_pct: m.reliability_pct,
                average_latency_ms: m.average_latency_ms,
                total_cost: m.total_cost,
                cost_per_message: m.cost_per_message,
                cost_percentage: share(m.total_cost, total_cost),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_messages
                .cmp(&a.total_messages)
                .then(a.channel.cmp(&b.channel))
        });
        rows
    }

    pub fn cost_breakdown(&self) -> Vec<CostBreakdown> {
        let all = self.all_channel_metrics();
        let total_cost: f64 = all.iter().map(|(_, m)| m.total_cost).sum();
        all.into_iter()
            .map(|(channel, m)| CostBreakdown {
                channel,
                total_cost: m.total_cost,
                message_count: m.total_messages,
                cost_per_message: m.cost_per_message,
                percentage: share(m.total_cost, total_cost),
            })
            .collect()
    }

    /// Plain-language observations over the comparison data.
    ///
    /// Output depends only on the recorded counters, so identical data always
    /// yields identical recommendations in the same order.
    pub fn recommendations(&self) -> Vec<String> {
        let mut rows = self.comparison();
        rows.retain(|r| r.total_messages > 0);
        if rows.is_empty() {
            return vec![
                "No dispatch data yet. Send some messages to get channel recommendations."
                    .to_string(),
            ];
        }
        rows.sort_by_key(|r| r.channel);

        let mut out = Vec::new();

        if let Some(best) = pick(&rows, |a, b| a.reliability_pct > b.reliability_pct) {
            out.push(format!(
                "{} is the most reliable channel ({:.1}% success).",
                best.channel, best.reliability_pct
            ));
        }

        if rows.len() > 1 {
            if let Some(cheapest) = pick(&rows, |a, b| a.cost_per_message < b.cost_per_message) {
                out.push(format!(
                    "{} has the lowest cost per message ({:.4}).",
                    cheapest.channel, cheapest.cost_per_message
                ));
            }
            if let Some(fastest) = pick(&rows, |a, b| a.average_latency_ms < b.average_latency_ms)
            {
                out.push(format!(
                    "{} has the lowest average latency ({:.0} ms).",
                    fastest.channel, fastest.average_latency_ms
                ));
            }
        }

        for row in &rows {
            if row.reliability_pct < LOW_RELIABILITY_PCT {
                out.push(format!(
                    "{} reliability is {:.1}%, below the {LOW_RELIABILITY_PCT:.0}% target. Check its delivery failures.",
                    row.channel, row.reliability_pct
                ));
            }
        }

        for a in &rows {
            for b in &rows {
                if a.channel != b.channel
                    && a.cost_per_message < b.cost_per_message
                    && (a.reliability_pct - b.reliability_pct).abs() <= SIMILAR_RELIABILITY_PTS
                {
                    out.push(format!(
                        "{} has lower cost than {} for similar reliability.",
                        a.channel, b.channel
                    ));
                }
            }
        }

        out
    }

    /// Drop all counters.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelType, ChannelMetrics>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn share(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

/// First row that no later row strictly beats under `better`.
fn pick<'a>(
    rows: &'a [ChannelComparison],
    better: impl Fn(&ChannelComparison, &ChannelComparison) -> bool,
) -> Option<&'a ChannelComparison> {
    rows.iter()
        .fold(None, |best: Option<&ChannelComparison>, row| match best {
            Some(b) if !better(row, b) => Some(b),
            _ => Some(row),
        })
}
