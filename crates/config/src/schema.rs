/// Config schema types (scheduler, storage, channels, metrics).
use std::{collections::HashMap, time::Duration};

use {
    courier_common::ChannelType,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub channels: ChannelsConfig,
    pub metrics: MetricsConfig,
}

/// Delivery scheduler timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between reconciliation passes over overdue scheduled messages.
    pub reconcile_interval_secs: u64,
    /// How far ahead of now scheduled messages get an in-memory timer.
    pub lookahead_hours: u64,
}

impl SchedulerConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn lookahead(&self) -> Duration {
        Duration::from_secs(self.lookahead_hours.saturating_mul(3600))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 30,
            lookahead_hours: 24,
        }
    }
}

/// Message store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sqlx SQLite URL, or `memory` for a store that lives only in this process.
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://courier.db?mode=rwc".into(),
        }
    }
}

/// Per-channel adapter sections.
///
/// Sections stay untyped here; each adapter crate parses and validates its own
/// shape so one broken section only disables that channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<serde_json::Value>,
}

impl ChannelsConfig {
    pub fn section(&self, channel: ChannelType) -> Option<&serde_json::Value> {
        match channel {
            ChannelType::Sms => self.sms.as_ref(),
            ChannelType::Chat => self.chat.as_ref(),
            ChannelType::Email => self.email.as_ref(),
        }
    }

    /// Channels that have a section at all, valid or not.
    pub fn configured(&self) -> Vec<ChannelType> {
        ChannelType::ALL
            .into_iter()
            .filter(|c| self.section(*c).is_some())
            .collect()
    }
}

/// Metrics and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the Prometheus recorder is installed.
    pub enabled: bool,
    /// Additional labels to add to all metrics.
    pub labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            labels: HashMap::new(),
        }
    }
}
