use {
    courier_channels::{Error, Result},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

pub const DEFAULT_API_BASE: &str = "https://api.sendgrid.com";

/// Email provider credentials and sender identity.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub api_key: Secret<String>,

    /// Verified sender address.
    pub from_address: String,

    /// Display name shown next to the sender address.
    pub from_name: Option<String>,

    /// Subject used when a request's metadata carries none.
    pub default_subject: String,

    pub api_base: String,

    pub cost_per_message: f64,

    pub timeout_secs: u64,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("api_key", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .field("from_name", &self.from_name)
            .field("default_subject", &self.default_subject)
            .field("api_base", &self.api_base)
            .field("cost_per_message", &self.cost_per_message)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::new(String::new()),
            from_address: String::new(),
            from_name: None,
            default_subject: "New message".into(),
            api_base: DEFAULT_API_BASE.into(),
            cost_per_message: 0.001,
            timeout_secs: 15,
        }
    }
}

impl EmailConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value.clone())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.expose_secret().trim().is_empty() {
            return Err(Error::invalid_config("email: api_key is required"));
        }
        if !looks_like_address(&self.from_address) {
            return Err(Error::invalid_config(format!(
                "email: from_address {:?} is not an email address",
                self.from_address
            )));
        }
        url::Url::parse(&self.api_base)
            .map_err(|e| Error::invalid_config(format!("email: api_base: {e}")))?;
        if self.cost_per_message < 0.0 {
            return Err(Error::invalid_config("email: cost_per_message must not be negative"));
        }
        Ok(())
    }

    pub fn send_url(&self) -> String {
        format!("{}/v3/mail/send", self.api_base.trim_end_matches('/'))
    }
}

/// Cheap shape check: something before and after a single '@', with a dot in
/// the domain. Deliverability is the provider's problem.
pub fn looks_like_address(addr: &str) -> bool {
    let addr = addr.trim();
    match addr.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !addr.contains(char::is_whitespace)
        },
        None => false,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[test]
    fn defaults_and_url() {
        let cfg = EmailConfig::from_value(&json!({
            "api_key": "SG.key",
            "from_address": "noreply@example.com",
        }))
        .unwrap();
        assert_eq!(cfg.default_subject, "New message");
        assert_eq!(cfg.send_url(), "https://api.sendgrid.com/v3/mail/send");
    }

    #[test]
    fn bad_sender_rejected() {
        let err = EmailConfig::from_value(&json!({
            "api_key": "SG.key",
            "from_address": "noreply",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("from_address"));
    }

    #[rstest]
    #[case("a@b.co", true)]
    #[case("first.last+tag@mail.example.org", true)]
    #[case("no-at-sign", false)]
    #[case("@example.com", false)]
    #[case("a@localhost", false)]
    #[case("a@@b.com", false)]
    #[case("a b@c.com", false)]
    #[case("a@b.", false)]
    fn address_shape(#[case] addr: &str, #[case] ok: bool) {
        assert_eq!(looks_like_address(addr), ok);
    }
}
