use {
    courier_channels::{Accepted, Error, Result, SendRequest},
    courier_common::Metadata,
    secrecy::ExposeSecret,
    serde_json::{Value, json},
    tracing::debug,
};

use crate::config::EmailConfig;

/// Request metadata key for the subject line.
pub const SUBJECT_KEY: &str = "subject";
/// Request metadata key for an HTML alternative body.
pub const HTML_KEY: &str = "html";

const MESSAGE_ID_HEADER: &str = "x-message-id";

pub fn build_payload(config: &EmailConfig, request: &SendRequest) -> Value {
    let subject = request
        .metadata_str(SUBJECT_KEY)
        .unwrap_or(&config.default_subject);

    let mut from = json!({ "email": config.from_address });
    if let Some(name) = config.from_name.as_deref().filter(|n| !n.is_empty()) {
        from["name"] = name.into();
    }

    let mut content = vec![json!({ "type": "text/plain", "value": request.content })];
    if let Some(html) = request.metadata_str(HTML_KEY) {
        content.push(json!({ "type": "text/html", "value": html }));
    }

    let mut payload = json!({
        "personalizations": [{ "to": [{ "email": request.to.trim() }] }],
        "from": from,
        "subject": subject,
        "content": content,
    });
    if let Some(reply_to) = request.from.as_deref().filter(|f| !f.trim().is_empty()) {
        payload["reply_to"] = json!({ "email": reply_to });
    }
    payload
}

/// Submit one message. The provider answers `202 Accepted` with an empty body
/// and the message id in a header.
pub async fn send_email(
    http: &reqwest::Client,
    config: &EmailConfig,
    request: &SendRequest,
) -> Result<Accepted> {
    let resp = http
        .post(config.send_url())
        .bearer_auth(config.api_key.expose_secret())
        .json(&build_payload(config, request))
        .send()
        .await
        .map_err(|e| Error::external("email send", e))?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::rejected(status, first_error(&body)));
    }

    let message_id = resp
        .headers()
        .get(MESSAGE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    debug!(message_id = ?message_id, to = %request.to, "email accepted");

    let mut metadata = Metadata::new();
    if let Some(subject) = request.metadata_str(SUBJECT_KEY) {
        metadata.insert(SUBJECT_KEY.into(), subject.into());
    }
    Ok(Accepted {
        message_id,
        metadata,
    })
}

/// Error bodies look like `{"errors": [{"message": "...", "field": "..."}]}`.
fn first_error(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let err = v.pointer("/errors/0")?;
            let message = err.get("message")?.as_str()?;
            Some(match err.get("field").and_then(Value::as_str) {
                Some(field) => format!("{message} ({field})"),
                None => message.to_string(),
            })
        })
        .unwrap_or_else(|| body.to_string())
}
