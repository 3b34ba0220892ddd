use {
    courier_channels::{Error, Result},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

pub const DEFAULT_API_BASE: &str = "https://api.twilio.com";

/// Credentials and sender identity for the SMS provider.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    /// Account SID (`AC...`).
    pub account_sid: String,

    /// Auth token paired with the account SID.
    pub auth_token: Secret<String>,

    /// Sender number in E.164 form, used when a request carries no `from`.
    pub from_number: String,

    /// REST API root. Overridable for tests and regional endpoints.
    pub api_base: String,

    /// Cost charged per delivered segment, for reporting.
    pub cost_per_message: f64,

    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for SmsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("from_number", &self.from_number)
            .field("api_base", &self.api_base)
            .field("cost_per_message", &self.cost_per_message)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: Secret::new(String::new()),
            from_number: String::new(),
            api_base: DEFAULT_API_BASE.into(),
            cost_per_message: 0.0075,
            timeout_secs: 15,
        }
    }
}

impl SmsConfig {
    /// Parse and validate a raw `[channels.sms]` section.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value.clone())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_sid.trim().is_empty() {
            return Err(Error::invalid_config("sms: account_sid is required"));
        }
        if self.auth_token.expose_secret().trim().is_empty() {
            return Err(Error::invalid_config("sms: auth_token is required"));
        }
        if self.from_number.trim().is_empty() {
            return Err(Error::invalid_config("sms: from_number is required"));
        }
        url::Url::parse(&self.api_base)
            .map_err(|e| Error::invalid_config(format!("sms: api_base: {e}")))?;
        if self.cost_per_message < 0.0 {
            return Err(Error::invalid_config("sms: cost_per_message must not be negative"));
        }
        Ok(())
    }

    pub fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            urlencoding::encode(&self.account_sid)
        )
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn valid() -> serde_json::Value {
        json!({
            "account_sid": "AC123",
            "auth_token": "secret-token",
            "from_number": "+15550000000",
        })
    }

    #[test]
    fn parses_with_defaults() {
        let cfg = SmsConfig::from_value(&valid()).unwrap();
        assert_eq!(cfg.api_base, DEFAULT_API_BASE);
        assert_eq!(cfg.timeout_secs, 15);
        assert_eq!(
            cfg.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[test]
    fn missing_token_rejected() {
        let mut v = valid();
        v["auth_token"] = json!("");
        let err = SmsConfig::from_value(&v).unwrap_err();
        assert!(err.to_string().contains("auth_token"));
    }

    #[test]
    fn bad_api_base_rejected() {
        let mut v = valid();
        v["api_base"] = json!("not a url");
        assert!(SmsConfig::from_value(&v).is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = SmsConfig::from_value(&valid()).unwrap();
        let dbg = format!("{cfg:?}");
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("secret-token"));
    }
}
