//! Webhook payloads from the email provider.
//!
//! Two shapes arrive here:
//! - inbound parse posts (`from`, `to`, `subject`, `text`/`html`) for mail
//!   sent to us;
//! - event webhook objects (`event`, `sg_message_id`, `email`) describing mail
//!   we sent. The provider posts these as a JSON array; only the first event
//!   is read.

use {
    courier_channels::{FieldRule, InboundKind, NormalizedMessage, StatusMap},
    courier_common::{ChannelType, MessageStatus, Metadata},
    serde_json::Value,
};

use crate::outbound::SUBJECT_KEY;

pub const EVENT: FieldRule = FieldRule::new("event", &["/event"]);
pub const EVENT_MESSAGE_ID: FieldRule =
    FieldRule::new("messageId", &["/sg_message_id", "/smtp-id"]);
pub const EVENT_RECIPIENT: FieldRule = FieldRule::new("recipient", &["/email"]);
pub const EVENT_REASON: FieldRule = FieldRule::new("reason", &["/reason", "/response"]);

pub const PARSE_FROM: FieldRule = FieldRule::new("from", &["/from", "/envelope/from"]);
pub const PARSE_TO: FieldRule = FieldRule::new("to", &["/to", "/envelope/to/0"]);
pub const PARSE_SUBJECT: FieldRule = FieldRule::new("subject", &["/subject"]);
pub const PARSE_BODY: FieldRule = FieldRule::new("content", &["/text", "/html"]);

pub const STATUS_MAP: StatusMap = StatusMap {
    entries: &[
        ("processed", MessageStatus::Sent),
        ("deferred", MessageStatus::Pending),
        ("delivered", MessageStatus::Delivered),
        ("open", MessageStatus::Read),
        ("click", MessageStatus::Read),
        ("bounce", MessageStatus::Failed),
        ("dropped", MessageStatus::Failed),
        ("blocked", MessageStatus::Failed),
    ],
    fallback: MessageStatus::Sent,
};

pub fn normalize(payload: &Value) -> Option<NormalizedMessage> {
    let payload = match payload {
        Value::Array(events) => events.first()?,
        other => other,
    };
    if !payload.is_object() {
        return None;
    }
    if EVENT.extract(payload).is_some() {
        normalize_event(payload)
    } else {
        normalize_parse(payload)
    }
}

fn normalize_event(event: &Value) -> Option<NormalizedMessage> {
    let word = EVENT.extract(event)?;
    let external_id = provider_id(EVENT_MESSAGE_ID.extract(event)?);

    let mut metadata = Metadata::new();
    metadata.insert("vendorStatus".into(), word.into());
    if let Some(reason) = EVENT_REASON.extract(event) {
        metadata.insert("reason".into(), reason.into());
    }

    Some(NormalizedMessage {
        channel: ChannelType::Email,
        kind: InboundKind::Receipt,
        external_id: Some(external_id),
        from: None,
        to: EVENT_RECIPIENT.extract_owned(event),
        content: String::new(),
        status: STATUS_MAP.resolve(Some(word)),
        metadata,
    })
}

fn normalize_parse(mail: &Value) -> Option<NormalizedMessage> {
    let from = address_of(PARSE_FROM.extract(mail)?);
    let content = PARSE_BODY.extract_owned(mail)?;

    let mut metadata = Metadata::new();
    if let Some(subject) = PARSE_SUBJECT.extract(mail) {
        metadata.insert(SUBJECT_KEY.into(), subject.into());
    }

    Some(NormalizedMessage {
        channel: ChannelType::Email,
        kind: InboundKind::Message,
        external_id: None,
        from: Some(from),
        to: PARSE_TO.extract(mail).map(address_of),
        content,
        status: MessageStatus::Delivered,
        metadata,
    })
}

/// Event ids are the send-time `X-Message-Id` plus a `.filter...` suffix.
/// An angle-bracketed `smtp-id` is a full RFC 5322 id and is kept whole.
fn provider_id(event_id: &str) -> String {
    let trimmed = event_id.trim();
    if let Some(inner) = trimmed
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
    {
        return inner.to_string();
    }
    trimmed.split('.').next().unwrap_or(trimmed).to_string()
}

/// `"Ada Lovelace <ada@example.com>"` -> `"ada@example.com"`.
fn address_of(header: &str) -> String {
    match (header.rfind('<'), header.rfind('>')) {
        (Some(start), Some(end)) if start < end => header[start + 1..end].trim().to_string(),
        _ => header.trim().to_string(),
    }
}
