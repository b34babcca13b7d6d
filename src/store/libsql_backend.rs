//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::leads::model::{Lead, LeadStatus};
use crate::ledger::model::{ConversationEntry, FollowUpStatus, MessageOwner};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a query and map every row to a ledger entry, skipping rows that fail to parse.
    async fn query_entries(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ConversationEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            match row_to_entry(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping conversation row: {e}"),
            }
        }
        Ok(entries)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so that lexical order in SQL equals time order.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Query(format!("invalid uuid '{s}': {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

/// Map a libsql Row to a Lead.
///
/// Column order matches LEAD_COLUMNS: 0:id, 1:email, 2:status, 3:created_at
fn row_to_lead(row: &libsql::Row) -> Result<Lead, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
    let email: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
    let status: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
    let created: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;

    Ok(Lead {
        id: parse_uuid(&id)?,
        email,
        status: status.parse().unwrap_or_default(),
        created_at: parse_datetime(&created),
    })
}

/// Map a libsql Row to a ConversationEntry.
///
/// Column order matches ENTRY_COLUMNS:
/// 0:message_id, 1:lead_id, 2:thread_id, 3:header_message_id, 4:parent_message_id,
/// 5:sender, 6:recipient, 7:subject, 8:body, 9:timestamp, 10:author,
/// 11:follow_up_status, 12:last_message_owner, 13:last_message_time
fn row_to_entry(row: &libsql::Row) -> Result<ConversationEntry, DatabaseError> {
    let text = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("row parse (column {idx}): {e}")))
    };

    let lead_id = parse_uuid(&text(1)?)?;
    let author: MessageOwner = text(10)?.parse().map_err(DatabaseError::Query)?;
    let status: FollowUpStatus = text(11)?.parse().unwrap_or(FollowUpStatus::None);
    let owner: MessageOwner = text(12)?.parse().map_err(DatabaseError::Query)?;

    Ok(ConversationEntry {
        message_id: text(0)?,
        lead_id,
        thread_id: text(2)?,
        header_message_id: row.get::<String>(3).ok(),
        parent_message_id: row.get::<String>(4).ok(),
        sender: text(5)?,
        recipient: text(6)?,
        subject: text(7)?,
        body: text(8)?,
        timestamp: parse_datetime(&text(9)?),
        author,
        follow_up_status: status,
        last_message_owner: owner,
        last_message_time: parse_datetime(&text(13)?),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const LEAD_COLUMNS: &str = "id, email, status, created_at";

const ENTRY_COLUMNS: &str = "message_id, lead_id, thread_id, header_message_id, parent_message_id, sender, recipient, subject, body, timestamp, author, follow_up_status, last_message_owner, last_message_time";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Leads ───────────────────────────────────────────────────────

    async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError> {
        let result = self
            .conn()
            .execute(
                "INSERT INTO leads (id, email, status, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    lead.id.to_string(),
                    lead.email.as_str(),
                    lead.status.to_string(),
                    fmt_ts(lead.created_at),
                ],
            )
            .await;

        match result {
            Ok(_) => {
                debug!(id = %lead.id, email = %lead.email, "Lead inserted into DB");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(DatabaseError::Constraint(format!(
                "lead email already registered: {}",
                lead.email
            ))),
            Err(e) => Err(DatabaseError::Query(format!("insert_lead: {e}"))),
        }
    }

    async fn get_lead_by_email(&self, email: &str) -> Result<Option<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE email = ?1"),
                params![email.trim()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_lead_by_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_lead(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_lead_by_email: {e}"))),
        }
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_lead: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_lead(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_lead: {e}"))),
        }
    }

    async fn update_lead_status(&self, id: Uuid, status: LeadStatus) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE leads SET status = ?1 WHERE id = ?2",
                params![status.to_string(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_lead_status: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "lead".into(),
                id: id.to_string(),
            });
        }
        debug!(id = %id, status = %status, "Lead status updated in DB");
        Ok(())
    }

    async fn clear_leads(&self) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        conn.execute("DELETE FROM conversations", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_leads: {e}")))?;
        let removed = conn
            .execute("DELETE FROM leads", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_leads: {e}")))?;
        info!(removed, "Cleared all leads");
        Ok(removed as usize)
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn insert_conversation(&self, entry: &ConversationEntry) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO conversations ({ENTRY_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    entry.message_id.as_str(),
                    entry.lead_id.to_string(),
                    entry.thread_id.as_str(),
                    opt_text(entry.header_message_id.as_deref()),
                    opt_text(entry.parent_message_id.as_deref()),
                    entry.sender.as_str(),
                    entry.recipient.as_str(),
                    entry.subject.as_str(),
                    entry.body.as_str(),
                    fmt_ts(entry.timestamp),
                    entry.author.to_string(),
                    entry.follow_up_status.to_string(),
                    entry.last_message_owner.to_string(),
                    fmt_ts(entry.last_message_time),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_conversation: {e}")))?;

        debug!(
            message_id = %entry.message_id,
            inserted = inserted > 0,
            "Conversation insert"
        );
        Ok(inserted > 0)
    }

    async fn get_conversation(
        &self,
        message_id: &str,
    ) -> Result<Option<ConversationEntry>, DatabaseError> {
        let mut entries = self
            .query_entries(
                "get_conversation",
                &format!("SELECT {ENTRY_COLUMNS} FROM conversations WHERE message_id = ?1"),
                params![message_id],
            )
            .await?;
        Ok(entries.pop())
    }

    async fn list_message_ids(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT message_id FROM conversations", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_message_ids: {e}")))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_message_ids: {e}")))?
        {
            match row.get::<String>(0) {
                Ok(id) => ids.push(id),
                Err(e) => warn!("Skipping message id row: {e}"),
            }
        }
        Ok(ids)
    }

    async fn list_conversations_for_lead(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<ConversationEntry>, DatabaseError> {
        self.query_entries(
            "list_conversations_for_lead",
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM conversations WHERE lead_id = ?1
                 ORDER BY timestamp ASC, rowid ASC"
            ),
            params![lead_id.to_string()],
        )
        .await
    }

    async fn list_conversations_for_thread(
        &self,
        lead_id: Uuid,
        thread_id: &str,
    ) -> Result<Vec<ConversationEntry>, DatabaseError> {
        self.query_entries(
            "list_conversations_for_thread",
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM conversations WHERE lead_id = ?1 AND thread_id = ?2
                 ORDER BY timestamp ASC, rowid ASC"
            ),
            params![lead_id.to_string(), thread_id],
        )
        .await
    }

    async fn has_reply_to(
        &self,
        lead_id: Uuid,
        parent_message_id: &str,
        exclude_sender: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM conversations
                 WHERE lead_id = ?1 AND parent_message_id = ?2 AND lower(sender) <> lower(?3)
                 LIMIT 1",
                params![lead_id.to_string(), parent_message_id, exclude_sender],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_reply_to: {e}")))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("has_reply_to: {e}"))),
        }
    }

    async fn list_due_followups(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationEntry>, DatabaseError> {
        self.query_entries(
            "list_due_followups",
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM conversations
                 WHERE follow_up_status IN ('pending', 'sent')
                   AND last_message_owner = 'agent'
                   AND last_message_time < ?1
                 ORDER BY last_message_time ASC, rowid ASC"
            ),
            params![fmt_ts(cutoff)],
        )
        .await
    }

    async fn update_followup_state(
        &self,
        message_id: &str,
        status: FollowUpStatus,
        owner: MessageOwner,
        last_message_time: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE conversations
                 SET follow_up_status = ?1, last_message_owner = ?2, last_message_time = ?3
                 WHERE message_id = ?4",
                params![
                    status.to_string(),
                    owner.to_string(),
                    fmt_ts(last_message_time),
                    message_id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_followup_state: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "conversation".into(),
                id: message_id.to_string(),
            });
        }
        debug!(message_id, status = %status, owner = %owner, "Follow-up state updated in DB");
        Ok(())
    }

    async fn supersede_thread_followups(
        &self,
        lead_id: Uuid,
        thread_id: &str,
        keep_message_id: &str,
    ) -> Result<usize, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE conversations SET follow_up_status = 'none'
                 WHERE lead_id = ?1 AND thread_id = ?2 AND message_id <> ?3
                   AND follow_up_status IN ('pending', 'sent')",
                params![lead_id.to_string(), thread_id, keep_message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("supersede_thread_followups: {e}")))?;
        Ok(changed as usize)
    }

    async fn mark_thread_lead_owned(
        &self,
        lead_id: Uuid,
        thread_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE conversations SET last_message_owner = 'lead', last_message_time = ?3
                 WHERE lead_id = ?1 AND thread_id = ?2
                   AND follow_up_status IN ('pending', 'sent')
                   AND last_message_time <= ?3",
                params![lead_id.to_string(), thread_id, fmt_ts(at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_thread_lead_owned: {e}")))?;
        Ok(changed as usize)
    }
}
