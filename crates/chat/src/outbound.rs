use {
    courier_channels::{Accepted, Error, Result, SendRequest},
    courier_common::Metadata,
    secrecy::ExposeSecret,
    serde::Deserialize,
    serde_json::json,
    tracing::debug,
};

use crate::config::ChatConfig;

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
    #[serde(default)]
    contacts: Vec<SentContact>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SentContact {
    wa_id: String,
}

/// Send a plain text message.
pub async fn send_text(
    http: &reqwest::Client,
    config: &ChatConfig,
    request: &SendRequest,
) -> Result<Accepted> {
    let body = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": request.to,
        "type": "text",
        "text": {
            "preview_url": false,
            "body": request.content,
        },
    });

    let resp = http
        .post(config.messages_url())
        .bearer_auth(config.access_token.expose_secret())
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::external("chat send", e))?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::rejected(status, graph_error_message(&body)));
    }

    let parsed: SendResponse = resp
        .json()
        .await
        .map_err(|e| Error::external("chat response", e))?;
    let message_id = parsed.messages.into_iter().next().map(|m| m.id);
    debug!(message_id = ?message_id, to = %request.to, "chat message accepted");

    let mut metadata = Metadata::new();
    if let Some(contact) = parsed.contacts.into_iter().next() {
        metadata.insert("waId".into(), contact.wa_id.into());
    }
    Ok(Accepted {
        message_id,
        metadata,
    })
}

/// Graph errors look like `{"error": {"message": "...", "code": 131030}}`.
fn graph_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?;
            let message = err.get("message")?.as_str()?.to_string();
            Some(match err.get("code").and_then(|c| c.as_i64()) {
                Some(code) => format!("{message} (code {code})"),
                None => message,
            })
        })
        .unwrap_or_else(|| body.to_string())
}
