use {
    courier_channels::{Error, Result},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

pub const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v21.0";

/// Business phone number credentials for the chat provider.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Long-lived system user access token.
    pub access_token: Secret<String>,

    /// Phone number ID messages are sent from.
    pub phone_number_id: String,

    /// Graph API root including the version segment.
    pub api_base: String,

    pub cost_per_message: f64,

    pub timeout_secs: u64,
}

impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("access_token", &"[REDACTED]")
            .field("phone_number_id", &self.phone_number_id)
            .field("api_base", &self.api_base)
            .field("cost_per_message", &self.cost_per_message)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            access_token: Secret::new(String::new()),
            phone_number_id: String::new(),
            api_base: DEFAULT_API_BASE.into(),
            cost_per_message: 0.005,
            timeout_secs: 15,
        }
    }
}

impl ChatConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value.clone())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.access_token.expose_secret().trim().is_empty() {
            return Err(Error::invalid_config("chat: access_token is required"));
        }
        if self.phone_number_id.trim().is_empty() {
            return Err(Error::invalid_config("chat: phone_number_id is required"));
        }
        url::Url::parse(&self.api_base)
            .map_err(|e| Error::invalid_config(format!("chat: api_base: {e}")))?;
        if self.cost_per_message < 0.0 {
            return Err(Error::invalid_config("chat: cost_per_message must not be negative"));
        }
        Ok(())
    }

    pub fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.api_base.trim_end_matches('/'),
            urlencoding::encode(&self.phone_number_id)
        )
    }
}
