//! Mailbox abstraction: list, fetch, send and mark messages.
//!
//! Provider payloads are Gmail-shaped (`id`, `threadId`, nested `payload`
//! parts). `envelope` turns them into a flat, canonical `Envelope`.

pub mod envelope;
pub mod gmail;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

pub use envelope::Envelope;
pub use gmail::{GmailConfig, GmailMailbox};

/// Entry returned by a message listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
    #[serde(rename = "threadId", default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// A header as `{ name, value }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Encoded body of a message part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartBody {
    /// Base64url data, padded or not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// One MIME part. The top-level payload is itself a part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// A full provider message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    /// Kept as raw JSON: providers have been seen sending non-string thread ids.
    #[serde(rename = "threadId", default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<serde_json::Value>,
    /// Receive time in epoch milliseconds, as a decimal string.
    #[serde(rename = "internalDate", default, skip_serializing_if = "Option::is_none")]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: MessagePart,
}

/// An outbound message ready to hand to `Mailbox::send_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub to: String,
    /// Sender override; providers fall back to the authenticated account.
    pub from: Option<String>,
    pub subject: String,
    /// HTML body.
    pub body: String,
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

/// A mailbox provider.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Messages matching a provider query (`is:unread`, `in:sent`, ...).
    async fn list_messages(&self, query: &str) -> Result<Vec<MessageRef>, MailboxError>;

    /// Fetch a message with headers and body. `None` if it no longer exists.
    async fn get_full_message(&self, id: &str) -> Result<Option<RawMessage>, MailboxError>;

    /// Send a draft. `Ok(false)` means the provider refused it.
    async fn send_message(&self, draft: &Draft) -> Result<bool, MailboxError>;

    async fn mark_as_read(&self, id: &str) -> Result<(), MailboxError>;

    /// Build a draft threaded onto an existing conversation.
    fn create_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        thread_id: Option<&str>,
        in_reply_to: Option<&str>,
        references: Option<&str>,
    ) -> Draft {
        Draft {
            to: to.to_string(),
            from: None,
            subject: subject.to_string(),
            body: body.to_string(),
            thread_id: thread_id.map(str::to_string),
            in_reply_to: in_reply_to.map(str::to_string),
            references: references.map(str::to_string),
        }
    }
}
