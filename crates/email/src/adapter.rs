use std::time::Duration;

use {
    async_trait::async_trait,
    courier_channels::{
        ChannelAdapter, ChannelCapabilities, Error, LatencyClass, NormalizedMessage, Result,
        SendOutcome, SendRequest,
    },
    courier_common::ChannelType,
    tracing::{debug, warn},
};

use crate::{
    config::{EmailConfig, looks_like_address},
    inbound, outbound,
};

struct Ready {
    config: EmailConfig,
    http: reqwest::Client,
}

/// Email channel adapter.
pub struct EmailAdapter {
    state: std::result::Result<Ready, String>,
}

impl EmailAdapter {
    pub fn new(config: EmailConfig) -> Self {
        let state = build(config).map_err(|e| {
            warn!(error = %e, "email adapter not initialized");
            e.to_string()
        });
        Self { state }
    }

    pub fn from_section(section: Option<&serde_json::Value>) -> Self {
        match section {
            Some(value) => match EmailConfig::from_value(value) {
                Ok(config) => Self::new(config),
                Err(e) => {
                    warn!(error = %e, "email adapter not initialized");
                    Self::unconfigured(e.to_string())
                },
            },
            None => {
                debug!("no email configuration, channel disabled");
                Self::unconfigured("no email configuration")
            },
        }
    }

    fn unconfigured(reason: impl Into<String>) -> Self {
        Self {
            state: Err(reason.into()),
        }
    }

    pub fn config(&self) -> Option<&EmailConfig> {
        self.state.as_ref().ok().map(|r| &r.config)
    }
}

fn build(config: EmailConfig) -> Result<Ready> {
    config.validate()?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .map_err(|e| Error::external("email http client", e))?;
    Ok(Ready { config, http })
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Email
    }

    fn is_configured(&self) -> bool {
        self.state.is_ok()
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            display_name: "Email".into(),
            cost_per_unit: self
                .config()
                .map_or(EmailConfig::default().cost_per_message, |c| c.cost_per_message),
            reliability_pct: 95.0,
            latency_class: LatencyClass::Minutes,
            supports_read: true,
        }
    }

    async fn send(&self, request: &SendRequest) -> SendOutcome {
        let ready = match &self.state {
            Ok(ready) => ready,
            Err(reason) => {
                return SendOutcome::failure(format!("email adapter not initialized: {reason}"));
            },
        };
        if !looks_like_address(&request.to) {
            return SendOutcome::failure(format!(
                "email: recipient {:?} is not an email address",
                request.to
            ));
        }
        let result = outbound::send_email(&ready.http, &ready.config, request).await;
        if let Err(e) = &result {
            warn!(to = %request.to, error = %e, "email send failed");
        }
        SendOutcome::from(result)
    }

    fn normalize_inbound(&self, payload: &serde_json::Value) -> Option<NormalizedMessage> {
        inbound::normalize(payload)
    }
}
