//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::leads::model::{Lead, LeadStatus};
use crate::ledger::model::{ConversationEntry, FollowUpStatus, MessageOwner};

/// Backend-agnostic database trait covering leads and the conversation ledger.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Leads ───────────────────────────────────────────────────────

    /// Insert a new lead. Fails with `DatabaseError::Constraint` if the
    /// email is already registered.
    async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError>;

    /// Case-insensitive lookup by email address.
    async fn get_lead_by_email(&self, email: &str) -> Result<Option<Lead>, DatabaseError>;

    /// Get a lead by ID.
    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError>;

    /// Update a lead's lifecycle status.
    async fn update_lead_status(&self, id: Uuid, status: LeadStatus) -> Result<(), DatabaseError>;

    /// Delete every lead and its conversations. Returns the number of leads removed.
    async fn clear_leads(&self) -> Result<usize, DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Insert a ledger entry. Returns `false` (and changes nothing) if the
    /// message id already exists.
    async fn insert_conversation(&self, entry: &ConversationEntry) -> Result<bool, DatabaseError>;

    /// Look up an entry by its message id.
    async fn get_conversation(
        &self,
        message_id: &str,
    ) -> Result<Option<ConversationEntry>, DatabaseError>;

    /// Every message id in the ledger.
    async fn list_message_ids(&self) -> Result<Vec<String>, DatabaseError>;

    /// All entries for a lead, oldest first (ties in insertion order).
    async fn list_conversations_for_lead(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<ConversationEntry>, DatabaseError>;

    /// All entries in one of a lead's threads, oldest first.
    async fn list_conversations_for_thread(
        &self,
        lead_id: Uuid,
        thread_id: &str,
    ) -> Result<Vec<ConversationEntry>, DatabaseError>;

    /// Whether the lead has an entry replying to `parent_message_id` from
    /// someone other than `exclude_sender`.
    async fn has_reply_to(
        &self,
        lead_id: Uuid,
        parent_message_id: &str,
        exclude_sender: &str,
    ) -> Result<bool, DatabaseError>;

    /// Active, agent-owned entries whose last message is older than `cutoff`.
    async fn list_due_followups(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationEntry>, DatabaseError>;

    /// Overwrite the follow-up bookkeeping fields of one entry.
    async fn update_followup_state(
        &self,
        message_id: &str,
        status: FollowUpStatus,
        owner: MessageOwner,
        last_message_time: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Retire every active entry in a thread except `keep_message_id`.
    /// Returns how many entries changed.
    async fn supersede_thread_followups(
        &self,
        lead_id: Uuid,
        thread_id: &str,
        keep_message_id: &str,
    ) -> Result<usize, DatabaseError>;

    /// Hand the last word in a thread to the lead: active entries whose
    /// last-message time is not after `at` get owner `Lead` and time `at`.
    /// Returns how many entries changed.
    async fn mark_thread_lead_owned(
        &self,
        lead_id: Uuid,
        thread_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, DatabaseError>;
}
