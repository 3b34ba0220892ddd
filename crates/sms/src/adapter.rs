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

use crate::{config::SmsConfig, inbound, outbound};

struct Ready {
    config: SmsConfig,
    http: reqwest::Client,
}

/// SMS channel adapter.
///
/// Built from a possibly invalid config; in that case it stays in a
/// not-initialized state and every `send` fails without network I/O.
pub struct SmsAdapter {
    state: std::result::Result<Ready, String>,
}

impl SmsAdapter {
    pub fn new(config: SmsConfig) -> Self {
        let state = build(config).map_err(|e| {
            warn!(error = %e, "sms adapter not initialized");
            e.to_string()
        });
        Self { state }
    }

    /// Build from a raw config section. `None` or an invalid section yields an
    /// unconfigured adapter.
    pub fn from_section(section: Option<&serde_json::Value>) -> Self {
        match section {
            Some(value) => match SmsConfig::from_value(value) {
                Ok(config) => Self::new(config),
                Err(e) => {
                    warn!(error = %e, "sms adapter not initialized");
                    Self::unconfigured(e.to_string())
                },
            },
            None => {
                debug!("no sms configuration, channel disabled");
                Self::unconfigured("no sms configuration")
            },
        }
    }

    fn unconfigured(reason: impl Into<String>) -> Self {
        Self {
            state: Err(reason.into()),
        }
    }

    pub fn config(&self) -> Option<&SmsConfig> {
        self.state.as_ref().ok().map(|r| &r.config)
    }
}

fn build(config: SmsConfig) -> Result<Ready> {
    config.validate()?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .map_err(|e| Error::external("sms http client", e))?;
    Ok(Ready { config, http })
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Sms
    }

    fn is_configured(&self) -> bool {
        self.state.is_ok()
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            display_name: "SMS".into(),
            cost_per_unit: self
                .config()
                .map_or(SmsConfig::default().cost_per_message, |c| c.cost_per_message),
            reliability_pct: 98.0,
            latency_class: LatencyClass::Seconds,
            supports_read: false,
        }
    }

    async fn send(&self, request: &SendRequest) -> SendOutcome {
        let ready = match &self.state {
            Ok(ready) => ready,
            Err(reason) => {
                return SendOutcome::failure(format!("sms adapter not initialized: {reason}"));
            },
        };
        if request.to.trim().is_empty() {
            return SendOutcome::failure("sms: recipient is empty");
        }
        let result = outbound::send_sms(&ready.http, &ready.config, request).await;
        if let Err(e) = &result {
            warn!(to = %request.to, error = %e, "sms send failed");
        }
        SendOutcome::from(result)
    }

    fn normalize_inbound(&self, payload: &serde_json::Value) -> Option<NormalizedMessage> {
        inbound::normalize(payload)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[tokio::test]
    async fn invalid_config_never_sends() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let adapter = SmsAdapter::from_section(Some(&json!({
            "account_sid": "AC123",
            "api_base": server.url(),
        })));
        assert!(!adapter.is_configured());

        let outcome = adapter
            .send(&SendRequest::new(ChannelType::Sms, "+15551234567", "hi"))
            .await;
        assert!(!outcome.success);
        let error = outcome.error.unwrap();
        assert!(error.starts_with("sms adapter not initialized"));
        assert!(error.contains("auth_token"));
        mock.assert_async().await;
    }

    #[test]
    fn missing_section() {
        let adapter = SmsAdapter::from_section(None);
        assert!(!adapter.is_configured());
        assert_eq!(adapter.capabilities().cost_per_unit, 0.0075);
    }

    #[tokio::test]
    async fn configured_adapter_sends() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/2010-04-01/Accounts/AC1/Messages.json")
            .with_status(201)
            .with_body(json!({ "sid": "SM7", "status": "queued" }).to_string())
            .create_async()
            .await;

        let adapter = SmsAdapter::from_section(Some(&json!({
            "account_sid": "AC1",
            "auth_token": "t",
            "from_number": "+15550000000",
            "api_base": server.url(),
            "cost_per_message": 0.01,
        })));
        assert!(adapter.is_configured());
        assert_eq!(adapter.capabilities().cost_per_unit, 0.01);

        let outcome = adapter
            .send(&SendRequest::new(ChannelType::Sms, "+15551234567", "hi"))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.message_id.as_deref(), Some("SM7"));
        assert_eq!(outcome.metadata["externalId"], "SM7");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn transport_failure_is_an_outcome() {
        let adapter = SmsAdapter::from_section(Some(&json!({
            "account_sid": "AC1",
            "auth_token": "t",
            "from_number": "+15550000000",
            // nothing listens on port 9 locally
            "api_base": "http://127.0.0.1:9",
            "timeout_secs": 2,
        })));
        let outcome = adapter
            .send(&SendRequest::new(ChannelType::Sms, "+15551234567", "hi"))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("channel operation failed: sms send"));
    }

    #[tokio::test]
    async fn empty_recipient_rejected_locally() {
        let adapter = SmsAdapter::from_section(Some(&json!({
            "account_sid": "AC1",
            "auth_token": "t",
            "from_number": "+15550000000",
            "api_base": "http://127.0.0.1:9",
        })));
        let outcome = adapter
            .send(&SendRequest::new(ChannelType::Sms, "  ", "hi"))
            .await;
        assert_eq!(outcome.error.as_deref(), Some("sms: recipient is empty"));
    }
}
