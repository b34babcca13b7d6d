//! Message normalizer: canonical envelope from a raw provider message.
//!
//! Pure: never touches the store.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessagePart, RawMessage};

/// Canonical view of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Provider message id (the ledger's dedup key).
    pub provider_id: String,
    /// Bare, lowercased sender address. `None` if it could not be resolved.
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    /// RFC 5322 `Message-ID` header.
    pub message_id: Option<String>,
    /// Provider thread id, or `provider_id` if the provider gave none.
    pub thread_id: String,
    pub body: String,
    /// When the provider received the message, if it said.
    pub received_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Build an envelope from a provider message.
    pub fn from_raw(raw: &RawMessage) -> Self {
        let headers = &raw.payload.headers;

        let thread_id = match &raw.thread_id {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.clone(),
            _ => raw.id.clone(),
        };

        Self {
            provider_id: raw.id.clone(),
            from: header(headers, "from").and_then(parse_address),
            to: header(headers, "to").map(parse_address_list).unwrap_or_default(),
            cc: header(headers, "cc").map(parse_address_list).unwrap_or_default(),
            subject: header(headers, "subject").unwrap_or_default().trim().to_string(),
            message_id: header(headers, "message-id")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            thread_id,
            body: extract_body(&raw.payload),
            received_at: raw
                .internal_date
                .as_deref()
                .and_then(|ms| ms.trim().parse::<i64>().ok())
                .and_then(DateTime::from_timestamp_millis),
        }
    }

    /// First `To` address.
    pub fn primary_to(&self) -> Option<&str> {
        self.to.first().map(String::as_str)
    }

    /// Case-insensitive CC membership.
    pub fn cc_contains(&self, address: &str) -> bool {
        let address = address.trim();
        self.cc.iter().any(|a| a.eq_ignore_ascii_case(address))
    }

    /// Id for `In-Reply-To`/`References`: the header if present, else the provider id.
    pub fn threading_id(&self) -> &str {
        self.message_id.as_deref().unwrap_or(&self.provider_id)
    }
}

/// Case-insensitive header lookup; first match wins.
fn header<'a>(headers: &'a [super::Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Resolve `"Name <a@x.com>"` or `a@x.com` to a bare lowercased address.
pub fn parse_address(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let candidate = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    let candidate = candidate.trim().trim_matches('"');

    let (local, domain) = candidate.split_once('@')?;
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || candidate.chars().any(char::is_whitespace)
    {
        return None;
    }
    Some(candidate.to_lowercase())
}

/// Split a comma-separated header into bare addresses, dropping anything unresolvable.
pub fn parse_address_list(raw: &str) -> Vec<String> {
    raw.split(',').filter_map(parse_address).collect()
}

/// First `text/plain` part, else first `text/html`, else the top-level body.
fn extract_body(payload: &MessagePart) -> String {
    let part = find_part(payload, "text/plain").or_else(|| find_part(payload, "text/html"));
    let data = part
        .and_then(|p| p.body.data.as_deref())
        .or(payload.body.data.as_deref());
    data.map(decode_body).unwrap_or_default()
}

/// Depth-first search for a leaf part with the given MIME type.
fn find_part<'a>(part: &'a MessagePart, mime: &str) -> Option<&'a MessagePart> {
    for child in &part.parts {
        if child.parts.is_empty() {
            if child.mime_type.eq_ignore_ascii_case(mime) && child.body.data.is_some() {
                return Some(child);
            }
        } else if let Some(found) = find_part(child, mime) {
            return Some(found);
        }
    }
    None
}

/// Base64url (padded or not) to UTF-8. Undecodable data yields an empty body.
fn decode_body(data: &str) -> String {
    let cleaned: String = data
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches('=')
        .to_string();

    match URL_SAFE_NO_PAD.decode(cleaned.as_bytes()) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| {
            tracing::warn!("Message body is not valid UTF-8, using empty body");
            String::new()
        }),
        Err(e) => {
            tracing::warn!("Message body failed base64url decoding: {e}");
            String::new()
        }
    }
}
