//! Conversation ledger: append-only log of every message seen or sent.
//!
//! The ledger is the source of truth for deduplication (message ids are
//! unique) and for the context handed to the completion model. Each thread
//! keeps at most one *representative* entry with an active follow-up status:
//! the newest agent-authored one.

pub mod model;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::Database;

pub use model::{AppendOutcome, ConversationEntry, FollowUpStatus, MessageOwner};

pub struct Ledger {
    store: Arc<dyn Database>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self { store }
    }

    /// Append an entry. An existing message id is a silent no-op.
    ///
    /// On insert the thread's representative bookkeeping is updated: an
    /// active agent entry supersedes the previous representative, and a lead
    /// entry hands the last word in the thread to the lead.
    pub async fn append(&self, entry: &ConversationEntry) -> Result<AppendOutcome, DatabaseError> {
        let inserted = match self.store.insert_conversation(entry).await {
            Ok(inserted) => inserted,
            Err(DatabaseError::Constraint(_)) => false,
            Err(e) => return Err(e),
        };
        if !inserted {
            debug!(message_id = %entry.message_id, "Ledger entry already present");
            return Ok(AppendOutcome::Duplicate);
        }

        match entry.author {
            MessageOwner::Agent if entry.follow_up_status.is_active() => {
                let retired = self
                    .store
                    .supersede_thread_followups(entry.lead_id, &entry.thread_id, &entry.message_id)
                    .await?;
                if retired > 0 {
                    debug!(thread = %entry.thread_id, retired, "Superseded earlier follow-up entries");
                }
            }
            MessageOwner::Agent => {}
            MessageOwner::Lead => {
                self.store
                    .mark_thread_lead_owned(entry.lead_id, &entry.thread_id, entry.timestamp)
                    .await?;
            }
        }

        Ok(AppendOutcome::Inserted)
    }

    /// Every entry for a lead across all threads, oldest first.
    pub async fn history_for(&self, lead_id: Uuid) -> Result<Vec<ConversationEntry>, DatabaseError> {
        self.store.list_conversations_for_lead(lead_id).await
    }

    /// Entries of one thread, oldest first.
    pub async fn thread_history(
        &self,
        lead_id: Uuid,
        thread_id: &str,
    ) -> Result<Vec<ConversationEntry>, DatabaseError> {
        self.store
            .list_conversations_for_thread(lead_id, thread_id)
            .await
    }

    /// Whether someone other than `exclude_sender` already answered `parent_message_id`.
    pub async fn existing_reply_to(
        &self,
        lead_id: Uuid,
        parent_message_id: &str,
        exclude_sender: &str,
    ) -> Result<bool, DatabaseError> {
        self.store
            .has_reply_to(lead_id, parent_message_id, exclude_sender)
            .await
    }

    /// Active agent-owned entries idle for longer than `idle_threshold`.
    pub async fn due_followups(
        &self,
        now: DateTime<Utc>,
        idle_threshold: Duration,
    ) -> Result<Vec<ConversationEntry>, DatabaseError> {
        let Some(cutoff) = TimeDelta::from_std(idle_threshold)
            .ok()
            .and_then(|delta| now.checked_sub_signed(delta))
        else {
            return Ok(Vec::new());
        };
        self.store.list_due_followups(cutoff).await
    }

    /// Record a sent follow-up: append it and retire the trigger entry with a
    /// refreshed last-message time so it cannot be selected again.
    ///
    /// `siblings` are the lead's other due threads; they are retired the same
    /// way so the lead gets one follow-up per idle period.
    pub async fn record_followup(
        &self,
        trigger: &ConversationEntry,
        followup: &ConversationEntry,
        siblings: &[ConversationEntry],
    ) -> Result<AppendOutcome, DatabaseError> {
        let outcome = self.append(followup).await?;
        for retired in std::iter::once(trigger).chain(siblings) {
            self.store
                .update_followup_state(
                    &retired.message_id,
                    FollowUpStatus::None,
                    MessageOwner::Agent,
                    followup.timestamp,
                )
                .await?;
        }
        Ok(outcome)
    }

    /// Every message id in the ledger, for rebuilding the known set at startup.
    pub async fn known_message_ids(&self) -> Result<HashSet<String>, DatabaseError> {
        Ok(self.store.list_message_ids().await?.into_iter().collect())
    }
}
