//! Declarative extraction rules for vendor webhook payloads.
//!
//! Vendors spread the same fact across different field names depending on
//! event type and API version. Each adapter declares, per internal field, the
//! ordered list of places to look, plus a table mapping the vendor's status
//! words onto [`MessageStatus`].

use {courier_common::MessageStatus, serde_json::Value};

/// Ordered JSON-pointer candidates for one field. The first candidate holding
/// a non-blank string wins.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub pointers: &'static [&'static str],
}

impl FieldRule {
    pub const fn new(name: &'static str, pointers: &'static [&'static str]) -> Self {
        Self { name, pointers }
    }

    pub fn extract<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        self.pointers.iter().find_map(|ptr| {
            payload
                .pointer(ptr)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
    }

    pub fn extract_owned(&self, payload: &Value) -> Option<String> {
        self.extract(payload).map(str::to_string)
    }
}

/// Vendor status vocabulary mapped onto internal statuses.
///
/// Matching is case-insensitive. Anything unlisted gets `fallback`, which must
/// stay conservative (`pending` or `sent`).
#[derive(Debug, Clone, Copy)]
pub struct StatusMap {
    pub entries: &'static [(&'static str, MessageStatus)],
    pub fallback: MessageStatus,
}

impl StatusMap {
    pub fn resolve(&self, vendor: Option<&str>) -> MessageStatus {
        let Some(vendor) = vendor.map(str::trim).filter(|s| !s.is_empty()) else {
            return self.fallback;
        };
        self.entries
            .iter()
            .find(|(word, _)| word.eq_ignore_ascii_case(vendor))
            .map_or(self.fallback, |(_, status)| *status)
    }

    /// Whether the fallback respects the "never claim delivery" rule.
    pub fn is_conservative(&self) -> bool {
        matches!(self.fallback, MessageStatus::Pending | MessageStatus::Sent)
    }
}
