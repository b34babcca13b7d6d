//! Ledger entry model: one row per observed or sent message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Follow-up bookkeeping state of an entry.
///
/// Only a thread's representative entry is ever `Pending` or `Sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStatus {
    /// Agent replied; a follow-up is owed once the thread goes idle.
    Pending,
    /// At least one follow-up went out; another is owed after the next idle period.
    Sent,
    /// Not a scheduling candidate.
    None,
}

impl FollowUpStatus {
    /// Whether the scheduler may select an entry in this state.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Sent)
    }
}

impl std::fmt::Display for FollowUpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for FollowUpStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "none" => Ok(Self::None),
            _ => Err(format!("Unknown follow-up status: {}", s)),
        }
    }
}

/// Who spoke last in a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOwner {
    Lead,
    Agent,
}

impl std::fmt::Display for MessageOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lead => write!(f, "lead"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

impl std::str::FromStr for MessageOwner {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" => Ok(Self::Lead),
            "agent" => Ok(Self::Agent),
            _ => Err(format!("Unknown message owner: {}", s)),
        }
    }
}

/// Result of appending to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// The message id was already present; nothing changed.
    Duplicate,
}

/// One message in a lead's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub lead_id: Uuid,
    pub thread_id: String,
    /// Provider message id for inbound mail, generated UUID for our own sends.
    pub message_id: String,
    /// RFC 5322 `Message-ID` header, when the provider exposed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_message_id: Option<String>,
    /// The entry this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    /// Who wrote this message. Unlike `last_message_owner`, never changes.
    pub author: MessageOwner,
    pub follow_up_status: FollowUpStatus,
    pub last_message_owner: MessageOwner,
    pub last_message_time: DateTime<Utc>,
}

impl ConversationEntry {
    /// An inbound message from a lead. Never a scheduling candidate itself.
    #[allow(clippy::too_many_arguments)]
    pub fn inbound(
        lead_id: Uuid,
        thread_id: &str,
        message_id: &str,
        header_message_id: Option<&str>,
        sender: &str,
        recipient: &str,
        subject: &str,
        body: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            lead_id,
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            header_message_id: header_message_id.map(str::to_string),
            parent_message_id: None,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp,
            author: MessageOwner::Lead,
            follow_up_status: FollowUpStatus::None,
            last_message_owner: MessageOwner::Lead,
            last_message_time: timestamp,
        }
    }

    /// A message we sent, with a freshly generated id.
    #[allow(clippy::too_many_arguments)]
    pub fn outbound(
        lead_id: Uuid,
        thread_id: &str,
        parent_message_id: &str,
        sender: &str,
        recipient: &str,
        subject: &str,
        body: &str,
        status: FollowUpStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            lead_id,
            thread_id: thread_id.to_string(),
            message_id: Uuid::new_v4().to_string(),
            header_message_id: None,
            parent_message_id: Some(parent_message_id.to_string()),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp,
            author: MessageOwner::Agent,
            follow_up_status: status,
            last_message_owner: MessageOwner::Agent,
            last_message_time: timestamp,
        }
    }

    /// Id to use in `In-Reply-To`/`References` when replying to this entry.
    pub fn threading_id(&self) -> &str {
        self.header_message_id.as_deref().unwrap_or(&self.message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_owner_parse() {
        assert_eq!("pending".parse::<FollowUpStatus>().unwrap(), FollowUpStatus::Pending);
        assert_eq!("sent".parse::<FollowUpStatus>().unwrap(), FollowUpStatus::Sent);
        assert_eq!("none".parse::<FollowUpStatus>().unwrap(), FollowUpStatus::None);
        assert!("done".parse::<FollowUpStatus>().is_err());
        assert_eq!("agent".parse::<MessageOwner>().unwrap(), MessageOwner::Agent);
        assert_eq!(MessageOwner::Lead.to_string(), "lead");
    }

    #[test]
    fn only_pending_and_sent_are_active() {
        assert!(FollowUpStatus::Pending.is_active());
        assert!(FollowUpStatus::Sent.is_active());
        assert!(!FollowUpStatus::None.is_active());
    }

    #[test]
    fn outbound_gets_fresh_ids() {
        let lead = Uuid::new_v4();
        let now = Utc::now();
        let a = ConversationEntry::outbound(
            lead, "t1", "m1", "me@x.com", "a@x.com", "Hi", "body", FollowUpStatus::Pending, now,
        );
        let b = ConversationEntry::outbound(
            lead, "t1", "m1", "me@x.com", "a@x.com", "Hi", "body", FollowUpStatus::Pending, now,
        );
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.parent_message_id.as_deref(), Some("m1"));
        assert_eq!(a.last_message_owner, MessageOwner::Agent);
        assert_eq!(a.author, MessageOwner::Agent);
    }

    #[test]
    fn threading_id_prefers_header() {
        let now = Utc::now();
        let entry = ConversationEntry::inbound(
            Uuid::new_v4(),
            "t1",
            "prov-1",
            Some("<abc@mail.x.com>"),
            "a@x.com",
            "me@x.com",
            "Hello",
            "hi",
            now,
        );
        assert_eq!(entry.threading_id(), "<abc@mail.x.com>");
        assert_eq!(entry.author, MessageOwner::Lead);

        let mut bare = entry.clone();
        bare.header_message_id = None;
        assert_eq!(bare.threading_id(), "prov-1");
    }
}
