//! In-memory mailbox and scripted LLM shared by the pipeline tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{DatabaseError, LlmError, MailboxError};
use crate::leads::{Lead, LeadStatus};
use crate::ledger::{ConversationEntry, FollowUpStatus, MessageOwner};
use crate::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use crate::mailbox::{Draft, Header, Mailbox, MessagePart, MessageRef, PartBody, RawMessage};
use crate::store::{Database, LibSqlBackend};

/// Build a Gmail-shaped message with a single `text/plain` part.
pub fn raw_message(
    id: &str,
    thread_id: &str,
    from: &str,
    to: &str,
    cc: Option<&str>,
    subject: &str,
    body: &str,
) -> RawMessage {
    let mut headers = vec![
        Header {
            name: "From".into(),
            value: from.into(),
        },
        Header {
            name: "To".into(),
            value: to.into(),
        },
        Header {
            name: "Subject".into(),
            value: subject.into(),
        },
        Header {
            name: "Message-ID".into(),
            value: format!("<{id}@mail.test>"),
        },
    ];
    if let Some(cc) = cc {
        headers.push(Header {
            name: "Cc".into(),
            value: cc.into(),
        });
    }
    RawMessage {
        id: id.into(),
        thread_id: Some(serde_json::Value::String(thread_id.into())),
        internal_date: None,
        payload: MessagePart {
            mime_type: "multipart/alternative".into(),
            headers,
            body: PartBody::default(),
            parts: vec![MessagePart {
                mime_type: "text/plain".into(),
                body: PartBody {
                    data: Some(URL_SAFE_NO_PAD.encode(body.as_bytes())),
                },
                ..Default::default()
            }],
        },
    }
}

/// Mailbox backed by two in-memory folders.
#[derive(Default)]
pub struct MockMailbox {
    pub inbox: Mutex<Vec<RawMessage>>,
    pub sent_folder: Mutex<Vec<RawMessage>>,
    pub outbox: Mutex<Vec<Draft>>,
    pub read: Mutex<Vec<String>>,
    pub refuse_sends: AtomicBool,
}

impl MockMailbox {
    pub fn deliver(&self, msg: RawMessage) {
        self.inbox.lock().unwrap().push(msg);
    }

    pub fn sent(&self) -> Vec<Draft> {
        self.outbox.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailbox for MockMailbox {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_messages(&self, query: &str) -> Result<Vec<MessageRef>, MailboxError> {
        let folder = if query.contains("in:sent") {
            self.sent_folder.lock().unwrap()
        } else {
            self.inbox.lock().unwrap()
        };
        Ok(folder
            .iter()
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: None,
            })
            .collect())
    }

    async fn get_full_message(&self, id: &str) -> Result<Option<RawMessage>, MailboxError> {
        let inbox = self.inbox.lock().unwrap();
        let sent = self.sent_folder.lock().unwrap();
        Ok(inbox.iter().chain(sent.iter()).find(|m| m.id == id).cloned())
    }

    async fn send_message(&self, draft: &Draft) -> Result<bool, MailboxError> {
        if self.refuse_sends.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.outbox.lock().unwrap().push(draft.clone());
        Ok(true)
    }

    async fn mark_as_read(&self, id: &str) -> Result<(), MailboxError> {
        self.read.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

/// LLM that returns scripted replies (or a fixed default) and records prompts.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    default_reply: String,
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(default_reply: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: default_reply.to_string(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_error(&self) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "scripted failure".into(),
            }));
    }

    pub fn push_reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(last) = request.messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_reply.clone()));
        next.map(|content| CompletionResponse {
            content,
            input_tokens: 100,
            output_tokens: 50,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// libSQL store that fails a set number of agent-authored ledger inserts.
pub struct FlakyStore {
    inner: LibSqlBackend,
    agent_insert_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: LibSqlBackend) -> Self {
        Self {
            inner,
            agent_insert_failures: AtomicUsize::new(0),
        }
    }

    pub fn fail_agent_inserts(&self, count: usize) {
        self.agent_insert_failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Database for FlakyStore {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.inner.init_schema().await
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError> {
        self.inner.insert_lead(lead).await
    }

    async fn get_lead_by_email(&self, email: &str) -> Result<Option<Lead>, DatabaseError> {
        self.inner.get_lead_by_email(email).await
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        self.inner.get_lead(id).await
    }

    async fn update_lead_status(&self, id: Uuid, status: LeadStatus) -> Result<(), DatabaseError> {
        self.inner.update_lead_status(id, status).await
    }

    async fn clear_leads(&self) -> Result<usize, DatabaseError> {
        self.inner.clear_leads().await
    }

    async fn insert_conversation(&self, entry: &ConversationEntry) -> Result<bool, DatabaseError> {
        if entry.author == MessageOwner::Agent
            && self
                .agent_insert_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(DatabaseError::Query("insert_conversation: disk I/O error".into()));
        }
        self.inner.insert_conversation(entry).await
    }

    async fn get_conversation(
        &self,
        message_id: &str,
    ) -> Result<Option<ConversationEntry>, DatabaseError> {
        self.inner.get_conversation(message_id).await
    }

    async fn list_message_ids(&self) -> Result<Vec<String>, DatabaseError> {
        self.inner.list_message_ids().await
    }

    async fn list_conversations_for_lead(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<ConversationEntry>, DatabaseError> {
        self.inner.list_conversations_for_lead(lead_id).await
    }

    async fn list_conversations_for_thread(
        &self,
        lead_id: Uuid,
        thread_id: &str,
    ) -> Result<Vec<ConversationEntry>, DatabaseError> {
        self.inner.list_conversations_for_thread(lead_id, thread_id).await
    }

    async fn has_reply_to(
        &self,
        lead_id: Uuid,
        parent_message_id: &str,
        exclude_sender: &str,
    ) -> Result<bool, DatabaseError> {
        self.inner
            .has_reply_to(lead_id, parent_message_id, exclude_sender)
            .await
    }

    async fn list_due_followups(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationEntry>, DatabaseError> {
        self.inner.list_due_followups(cutoff).await
    }

    async fn update_followup_state(
        &self,
        message_id: &str,
        status: FollowUpStatus,
        owner: MessageOwner,
        last_message_time: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.inner
            .update_followup_state(message_id, status, owner, last_message_time)
            .await
    }

    async fn supersede_thread_followups(
        &self,
        lead_id: Uuid,
        thread_id: &str,
        keep_message_id: &str,
    ) -> Result<usize, DatabaseError> {
        self.inner
            .supersede_thread_followups(lead_id, thread_id, keep_message_id)
            .await
    }

    async fn mark_thread_lead_owned(
        &self,
        lead_id: Uuid,
        thread_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        self.inner.mark_thread_lead_owned(lead_id, thread_id, at).await
    }
}
