//! Webhook payloads from the SMS provider.
//!
//! Form-encoded webhooks arrive here already decoded into a flat JSON object.
//! Incoming texts carry `SmsStatus=received`; status callbacks for our own
//! outbound messages carry `MessageStatus`.

use {
    courier_channels::{FieldRule, InboundKind, NormalizedMessage, StatusMap},
    courier_common::{ChannelType, MessageStatus, Metadata},
    serde_json::Value,
};

use crate::outbound::MEDIA_URLS_KEY;

pub const MESSAGE_ID: FieldRule =
    FieldRule::new("messageId", &["/MessageSid", "/SmsSid", "/SmsMessageSid"]);
pub const FROM: FieldRule = FieldRule::new("from", &["/From"]);
pub const TO: FieldRule = FieldRule::new("to", &["/To"]);
pub const BODY: FieldRule = FieldRule::new("body", &["/Body"]);
pub const STATUS: FieldRule = FieldRule::new("status", &["/MessageStatus", "/SmsStatus"]);
pub const ERROR_CODE: FieldRule = FieldRule::new("errorCode", &["/ErrorCode"]);

pub const STATUS_MAP: StatusMap = StatusMap {
    entries: &[
        ("accepted", MessageStatus::Pending),
        ("scheduled", MessageStatus::Pending),
        ("queued", MessageStatus::Pending),
        ("sending", MessageStatus::Sent),
        ("sent", MessageStatus::Sent),
        ("delivered", MessageStatus::Delivered),
        ("read", MessageStatus::Read),
        ("received", MessageStatus::Delivered),
        ("undelivered", MessageStatus::Failed),
        ("failed", MessageStatus::Failed),
        ("canceled", MessageStatus::Failed),
    ],
    fallback: MessageStatus::Pending,
};

/// Providers cap MMS attachments at ten.
const MAX_MEDIA: usize = 10;

pub fn normalize(payload: &Value) -> Option<NormalizedMessage> {
    if !payload.is_object() {
        return None;
    }
    let external_id = MESSAGE_ID.extract_owned(payload);
    let vendor_status = STATUS.extract(payload);
    let is_incoming = vendor_status.is_some_and(|s| s.eq_ignore_ascii_case("received"))
        || (vendor_status.is_none() && BODY.extract(payload).is_some());

    let mut metadata = Metadata::new();
    if let Some(s) = vendor_status {
        metadata.insert("vendorStatus".into(), s.into());
    }

    if is_incoming {
        let from = FROM.extract_owned(payload)?;
        let media = media_urls(payload);
        let content = BODY.extract_owned(payload).unwrap_or_default();
        if content.is_empty() && media.is_empty() {
            return None;
        }
        if !media.is_empty() {
            metadata.insert(MEDIA_URLS_KEY.into(), media.into());
        }
        return Some(NormalizedMessage {
            channel: ChannelType::Sms,
            kind: InboundKind::Message,
            external_id,
            from: Some(from),
            to: TO.extract_owned(payload),
            content,
            status: STATUS_MAP.resolve(vendor_status.or(Some("received"))),
            metadata,
        });
    }

    // Receipts are useless without the id of the message they describe.
    let external_id = external_id?;
    if vendor_status.is_none() {
        return None;
    }
    if let Some(code) = ERROR_CODE.extract(payload) {
        metadata.insert("errorCode".into(), code.into());
    }
    Some(NormalizedMessage {
        channel: ChannelType::Sms,
        kind: InboundKind::Receipt,
        external_id: Some(external_id),
        from: FROM.extract_owned(payload),
        to: TO.extract_owned(payload),
        content: String::new(),
        status: STATUS_MAP.resolve(vendor_status),
        metadata,
    })
}

fn media_urls(payload: &Value) -> Vec<String> {
    (0..MAX_MEDIA)
        .map_while(|i| {
            payload
                .get(format!("MediaUrl{i}"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}
