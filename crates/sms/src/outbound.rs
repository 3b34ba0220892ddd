use {
    courier_channels::{Accepted, Error, Result, SendRequest},
    courier_common::Metadata,
    secrecy::ExposeSecret,
    serde::Deserialize,
    tracing::debug,
};

use crate::config::SmsConfig;

/// Request metadata key holding media URLs to attach (string or array of strings).
pub const MEDIA_URLS_KEY: &str = "mediaUrls";

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    num_segments: Option<String>,
}

/// POST one message to the provider's Messages resource.
pub async fn send_sms(
    http: &reqwest::Client,
    config: &SmsConfig,
    request: &SendRequest,
) -> Result<Accepted> {
    let from = request
        .from
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .unwrap_or(&config.from_number);

    let mut form: Vec<(&str, &str)> = vec![
        ("To", request.to.as_str()),
        ("From", from),
        ("Body", request.content.as_str()),
    ];
    let media = media_urls(&request.metadata);
    form.extend(media.iter().map(|url| ("MediaUrl", url.as_str())));

    let resp = http
        .post(config.messages_url())
        .basic_auth(&config.account_sid, Some(config.auth_token.expose_secret()))
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::external("sms send", e))?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::rejected(status, vendor_error_message(&body)));
    }

    let resource: MessageResource = resp
        .json()
        .await
        .map_err(|e| Error::external("sms response", e))?;
    debug!(sid = %resource.sid, status = ?resource.status, "sms accepted");

    let mut metadata = Metadata::new();
    if let Some(status) = resource.status {
        metadata.insert("vendorStatus".into(), status.into());
    }
    if let Some(segments) = resource.num_segments {
        metadata.insert("segments".into(), segments.into());
    }
    if !media.is_empty() {
        metadata.insert(MEDIA_URLS_KEY.into(), media.into());
    }
    Ok(Accepted {
        message_id: Some(resource.sid),
        metadata,
    })
}

fn media_urls(metadata: &Metadata) -> Vec<String> {
    match metadata.get(MEDIA_URLS_KEY) {
        Some(serde_json::Value::String(url)) if !url.is_empty() => vec![url.clone()],
        Some(serde_json::Value::Array(urls)) => urls
            .iter()
            .filter_map(|u| u.as_str())
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Error bodies look like `{"code": 21211, "message": "..."}`; fall back to the raw text.
fn vendor_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let message = v.get("message")?.as_str()?.to_string();
            Some(match v.get("code").and_then(|c| c.as_i64()) {
                Some(code) => format!("{message} (code {code})"),
                None => message,
            })
        })
        .unwrap_or_else(|| body.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, courier_common::ChannelType, mockito::Matcher, serde_json::json};

    fn config(api_base: &str) -> SmsConfig {
        SmsConfig::from_value(&json!({
            "account_sid": "AC123",
            "auth_token": "tok",
            "from_number": "+15550000000",
            "api_base": api_base,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn posts_form_with_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/2010-04-01/Accounts/AC123/Messages.json")
            // base64("AC123:tok")
            .match_header("authorization", "Basic QUMxMjM6dG9r")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("To".into(), "+15551234567".into()),
                Matcher::UrlEncoded("From".into(), "+15550000000".into()),
                Matcher::UrlEncoded("Body".into(), "hi there".into()),
            ]))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(json!({ "sid": "SM42", "status": "queued", "num_segments": "1" }).to_string())
            .create_async()
            .await;

        let cfg = config(&server.url());
        let req = SendRequest::new(ChannelType::Sms, "+15551234567", "hi there");
        let accepted = send_sms(&reqwest::Client::new(), &cfg, &req).await.unwrap();

        assert_eq!(accepted.message_id.as_deref(), Some("SM42"));
        assert_eq!(accepted.metadata["vendorStatus"], "queued");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn request_from_and_media_override() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/2010-04-01/Accounts/AC123/Messages.json")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("From".into(), "+15559999999".into()),
                Matcher::UrlEncoded("MediaUrl".into(), "https://cdn.example.com/a.png".into()),
            ]))
            .with_status(201)
            .with_body(json!({ "sid": "SM43" }).to_string())
            .create_async()
            .await;

        let cfg = config(&server.url());
        let mut req = SendRequest::new(ChannelType::Sms, "+15551234567", "pic");
        req.from = Some("+15559999999".into());
        req.metadata
            .insert(MEDIA_URLS_KEY.into(), json!(["https://cdn.example.com/a.png"]));
        let accepted = send_sms(&reqwest::Client::new(), &cfg, &req).await.unwrap();
        assert_eq!(accepted.message_id.as_deref(), Some("SM43"));
        assert_eq!(accepted.metadata[MEDIA_URLS_KEY][0], "https://cdn.example.com/a.png");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn vendor_rejection_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/2010-04-01/Accounts/AC123/Messages.json")
            .with_status(400)
            .with_body(
                json!({ "code": 21211, "message": "The 'To' number is not valid." }).to_string(),
            )
            .create_async()
            .await;

        let cfg = config(&server.url());
        let req = SendRequest::new(ChannelType::Sms, "bogus", "hi");
        let err = send_sms(&reqwest::Client::new(), &cfg, &req)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "vendor rejected request (400): The 'To' number is not valid. (code 21211)"
        );
    }

    #[test]
    fn plain_text_error_body_kept() {
        assert_eq!(vendor_error_message("upstream down"), "upstream down");
    }
}
