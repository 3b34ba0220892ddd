//! Webhook payloads from the chat provider.
//!
//! Every notification nests its data under `entry[].changes[].value`. A value
//! holds either `messages` (something a contact sent) or `statuses` (receipts
//! for messages we sent). Only the first entry, change and item are read;
//! the provider batches one event per delivery in practice.

use {
    courier_channels::{FieldRule, InboundKind, NormalizedMessage, StatusMap},
    courier_common::{ChannelType, MessageStatus, Metadata},
    serde_json::Value,
};

const VALUE: &str = "/entry/0/changes/0/value";

pub const BUSINESS_NUMBER: FieldRule =
    FieldRule::new("to", &["/metadata/display_phone_number", "/metadata/phone_number_id"]);
pub const PROFILE_NAME: FieldRule = FieldRule::new("profileName", &["/contacts/0/profile/name"]);

pub const MESSAGE_ID: FieldRule = FieldRule::new("messageId", &["/id"]);
pub const MESSAGE_FROM: FieldRule = FieldRule::new("from", &["/from"]);
pub const MESSAGE_TYPE: FieldRule = FieldRule::new("type", &["/type"]);
pub const MESSAGE_CONTENT: FieldRule = FieldRule::new("content", &[
    "/text/body",
    "/button/text",
    "/interactive/button_reply/title",
    "/interactive/list_reply/title",
    "/image/caption",
    "/video/caption",
    "/document/caption",
    "/document/filename",
]);
pub const MEDIA_ID: FieldRule = FieldRule::new("mediaId", &[
    "/image/id",
    "/audio/id",
    "/video/id",
    "/document/id",
    "/sticker/id",
]);

pub const STATUS_ID: FieldRule = FieldRule::new("messageId", &["/id"]);
pub const STATUS_WORD: FieldRule = FieldRule::new("status", &["/status"]);
pub const STATUS_RECIPIENT: FieldRule = FieldRule::new("recipient", &["/recipient_id"]);
pub const STATUS_ERROR: FieldRule =
    FieldRule::new("error", &["/errors/0/title", "/errors/0/message"]);

pub const STATUS_MAP: StatusMap = StatusMap {
    entries: &[
        ("sent", MessageStatus::Sent),
        ("delivered", MessageStatus::Delivered),
        ("read", MessageStatus::Read),
        ("failed", MessageStatus::Failed),
    ],
    fallback: MessageStatus::Sent,
};

pub fn normalize(payload: &Value) -> Option<NormalizedMessage> {
    let value = payload.pointer(VALUE)?;
    if let Some(message) = value.pointer("/messages/0") {
        return normalize_message(value, message);
    }
    if let Some(status) = value.pointer("/statuses/0") {
        return normalize_status(status);
    }
    None
}

fn normalize_message(value: &Value, message: &Value) -> Option<NormalizedMessage> {
    let from = MESSAGE_FROM.extract_owned(message)?;
    let content = MESSAGE_CONTENT.extract_owned(message).unwrap_or_default();
    let media_id = MEDIA_ID.extract(message);
    if content.is_empty() && media_id.is_none() {
        return None;
    }

    let mut metadata = Metadata::new();
    if let Some(kind) = MESSAGE_TYPE.extract(message) {
        metadata.insert("messageType".into(), kind.into());
    }
    if let Some(id) = media_id {
        metadata.insert("mediaId".into(), id.into());
    }
    if let Some(name) = PROFILE_NAME.extract(value) {
        metadata.insert("profileName".into(), name.into());
    }

    Some(NormalizedMessage {
        channel: ChannelType::Chat,
        kind: InboundKind::Message,
        external_id: MESSAGE_ID.extract_owned(message),
        from: Some(from),
        to: BUSINESS_NUMBER.extract_owned(value),
        content,
        status: MessageStatus::Delivered,
        metadata,
    })
}

fn normalize_status(status: &Value) -> Option<NormalizedMessage> {
    let external_id = STATUS_ID.extract_owned(status)?;
    let word = STATUS_WORD.extract(status)?;

    let mut metadata = Metadata::new();
    metadata.insert("vendorStatus".into(), word.into());
    if let Some(error) = STATUS_ERROR.extract(status) {
        metadata.insert("error".into(), error.into());
    }

    Some(NormalizedMessage {
        channel: ChannelType::Chat,
        kind: InboundKind::Receipt,
        external_id: Some(external_id),
        from: None,
        to: STATUS_RECIPIENT.extract_owned(status),
        content: String::new(),
        status: STATUS_MAP.resolve(Some(word)),
        metadata,
    })
}
