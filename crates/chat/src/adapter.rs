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

use crate::{config::ChatConfig, inbound, outbound};

struct Ready {
    config: ChatConfig,
    http: reqwest::Client,
}

/// Chat channel adapter.
pub struct ChatAdapter {
    state: std::result::Result<Ready, String>,
}

impl ChatAdapter {
    pub fn new(config: ChatConfig) -> Self {
        let state = build(config).map_err(|e| {
            warn!(error = %e, "chat adapter not initialized");
            e.to_string()
        });
        Self { state }
    }

    pub fn from_section(section: Option<&serde_json::Value>) -> Self {
        match section {
            Some(value) => match ChatConfig::from_value(value) {
                Ok(config) => Self::new(config),
                Err(e) => {
                    warn!(error = %e, "chat adapter not initialized");
                    Self::unconfigured(e.to_string())
                },
            },
            None => {
                debug!("no chat configuration, channel disabled");
                Self::unconfigured("no chat configuration")
            },
        }
    }

    fn unconfigured(reason: impl Into<String>) -> Self {
        Self {
            state: Err(reason.into()),
        }
    }

    pub fn config(&self) -> Option<&ChatConfig> {
        self.state.as_ref().ok().map(|r| &r.config)
    }
}

fn build(config: ChatConfig) -> Result<Ready> {
    config.validate()?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .map_err(|e| Error::external("chat http client", e))?;
    Ok(Ready { config, http })
}

#[async_trait]
impl ChannelAdapter for ChatAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Chat
    }

    fn is_configured(&self) -> bool {
        self.state.is_ok()
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            display_name: "WhatsApp".into(),
            cost_per_unit: self
                .config()
                .map_or(ChatConfig::default().cost_per_message, |c| c.cost_per_message),
            reliability_pct: 99.0,
            latency_class: LatencyClass::Realtime,
            supports_read: true,
        }
    }

    async fn send(&self, request: &SendRequest) -> SendOutcome {
        let ready = match &self.state {
            Ok(ready) => ready,
            Err(reason) => {
                return SendOutcome::failure(format!("chat adapter not initialized: {reason}"));
            },
        };
        // Numbers go out without the leading '+'.
        let to = request.to.trim().trim_start_matches('+');
        if to.is_empty() {
            return SendOutcome::failure("chat: recipient is empty");
        }
        let mut request = request.clone();
        request.to = to.to_string();

        let result = outbound::send_text(&ready.http, &ready.config, &request).await;
        if let Err(e) = &result {
            warn!(to = %request.to, error = %e, "chat send failed");
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
    async fn unconfigured_send_is_local_failure() {
        let adapter = ChatAdapter::from_section(Some(&json!({ "phone_number_id": "1" })));
        assert!(!adapter.is_configured());
        let outcome = adapter
            .send(&SendRequest::new(ChannelType::Chat, "15551234567", "hi"))
            .await;
        assert!(!outcome.success);
        assert!(
            outcome
                .error
                .unwrap()
                .contains("chat: access_token is required")
        );
    }

    #[tokio::test]
    async fn strips_plus_from_recipient() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/1098765/messages")
            .match_body(mockito::Matcher::PartialJson(json!({ "to": "15551234567" })))
            .with_status(200)
            .with_body(json!({ "messages": [{ "id": "wamid.A" }] }).to_string())
            .create_async()
            .await;

        let adapter = ChatAdapter::from_section(Some(&json!({
            "access_token": "EAAG",
            "phone_number_id": "1098765",
            "api_base": server.url(),
        })));
        let outcome = adapter
            .send(&SendRequest::new(ChannelType::Chat, "+15551234567", "hi"))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.message_id.as_deref(), Some("wamid.A"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_section_disables_channel() {
        let adapter = ChatAdapter::from_section(None);
        assert!(!adapter.is_configured());
        assert!(adapter.config().is_none());
        let outcome = adapter
            .send(&SendRequest::new(ChannelType::Chat, "15551234567", "hi"))
            .await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("chat adapter not initialized: no chat configuration")
        );
    }

    #[test]
    fn capabilities_report_read_support() {
        let caps = ChatAdapter::from_section(None).capabilities();
        assert!(caps.supports_read);
        assert_eq!(caps.latency_class, LatencyClass::Realtime);
    }
}
