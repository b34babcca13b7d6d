//! End-to-end tests for the poll loop.
//!
//! Each test wires a real libSQL store to an in-memory mailbox and a stub
//! LLM, then drives `PollLoop::run_cycle` the way `run()` would.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rust_decimal::Decimal;

use sales_agent::config::AgentConfig;
use sales_agent::error::{LlmError, MailboxError};
use sales_agent::leads::LeadRegistry;
use sales_agent::ledger::{Ledger, MessageOwner};
use sales_agent::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use sales_agent::mailbox::{Draft, Header, Mailbox, MessagePart, MessageRef, PartBody, RawMessage};
use sales_agent::pipeline::{CycleReport, PollLoop};
use sales_agent::prompts::PromptTemplates;
use sales_agent::store::{Database, LibSqlBackend};

/// Stub LLM provider (no real API calls).
struct StubLlm {
    calls: AtomicUsize,
}

impl StubLlm {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }
    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CompletionResponse {
            content: "Thanks for reaching out! **Happy** to share pricing.".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// Two-folder mailbox: `in:sent` queries hit the sent folder, everything else the inbox.
#[derive(Default)]
struct FakeMailbox {
    inbox: Mutex<Vec<RawMessage>>,
    sent_folder: Mutex<Vec<RawMessage>>,
    outbox: Mutex<Vec<Draft>>,
}

impl FakeMailbox {
    fn deliver(&self, msg: RawMessage) {
        self.inbox.lock().unwrap().push(msg);
    }

    fn file_sent(&self, msg: RawMessage) {
        self.sent_folder.lock().unwrap().push(msg);
    }

    fn outbox(&self) -> Vec<Draft> {
        self.outbox.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_messages(&self, query: &str) -> Result<Vec<MessageRef>, MailboxError> {
        let folder = if query.contains("in:sent") {
            &self.sent_folder
        } else {
            &self.inbox
        };
        Ok(folder
            .lock()
            .unwrap()
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
        self.outbox.lock().unwrap().push(draft.clone());
        Ok(true)
    }

    async fn mark_as_read(&self, _id: &str) -> Result<(), MailboxError> {
        Ok(())
    }
}

fn header(name: &str, value: &str) -> Header {
    Header {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn message(id: &str, thread: &str, from: &str, to: &str, cc: Option<&str>, subject: &str) -> RawMessage {
    let mut headers = vec![
        header("From", from),
        header("To", to),
        header("Subject", subject),
        header("Message-ID", &format!("<{id}@mail.test>")),
    ];
    if let Some(cc) = cc {
        headers.push(header("Cc", cc));
    }
    RawMessage {
        id: id.to_string(),
        thread_id: Some(serde_json::Value::String(thread.to_string())),
        internal_date: None,
        payload: MessagePart {
            mime_type: "text/plain".to_string(),
            headers,
            body: PartBody {
                data: Some(URL_SAFE_NO_PAD.encode("What does the premium plan cost?")),
            },
            parts: Vec::new(),
        },
    }
}

fn lead_mail(id: &str) -> RawMessage {
    message(id, "t1", "Ann Lead <a@x.com>", "sales@us.com", None, "Pricing")
}

async fn agent(
    config: AgentConfig,
    store: Arc<dyn Database>,
    mailbox: Arc<FakeMailbox>,
    llm: Arc<StubLlm>,
) -> PollLoop {
    PollLoop::bootstrap(config, store, mailbox, llm, PromptTemplates::default())
        .await
        .unwrap()
}

async fn memory_store() -> Arc<dyn Database> {
    Arc::new(LibSqlBackend::new_memory().await.unwrap())
}

#[tokio::test]
async fn new_inbound_gets_one_threaded_reply() {
    let store = memory_store().await;
    let mailbox = Arc::new(FakeMailbox::default());
    let llm = Arc::new(StubLlm::new());
    let mut poll = agent(AgentConfig::default(), Arc::clone(&store), mailbox.clone(), llm).await;

    mailbox.deliver(lead_mail("m1"));
    let report = poll.run_cycle().await;
    assert_eq!(report.replied, 1);

    let sent = mailbox.outbox();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@x.com");
    assert_eq!(sent[0].subject, "Pricing");
    assert_eq!(sent[0].thread_id.as_deref(), Some("t1"));
    assert_eq!(sent[0].in_reply_to.as_deref(), Some("<m1@mail.test>"));
    assert!(sent[0].body.contains("<strong>Happy</strong>"));

    let lead = LeadRegistry::new(Arc::clone(&store))
        .get_or_create("a@x.com")
        .await
        .unwrap();
    let history = Ledger::new(store).history_for(lead.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].message_id, "m1");
    assert_eq!(history[0].author, MessageOwner::Lead);
    assert_eq!(history[1].author, MessageOwner::Agent);
    assert_eq!(history[1].parent_message_id.as_deref(), Some("m1"));
}

#[tokio::test]
async fn redelivery_does_nothing() {
    let mailbox = Arc::new(FakeMailbox::default());
    let llm = Arc::new(StubLlm::new());
    let mut poll = agent(AgentConfig::default(), memory_store().await, mailbox.clone(), llm.clone()).await;

    mailbox.deliver(lead_mail("m1"));
    poll.run_cycle().await;
    let second = poll.run_cycle().await;

    assert_eq!(second, CycleReport::default());
    assert_eq!(mailbox.outbox().len(), 1);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn restart_on_disk_sends_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("agent.db");
    let mailbox = Arc::new(FakeMailbox::default());
    let llm = Arc::new(StubLlm::new());
    mailbox.deliver(lead_mail("m1"));

    {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&db_path).await.unwrap());
        let mut poll = agent(AgentConfig::default(), store, mailbox.clone(), llm.clone()).await;
        assert_eq!(poll.run_cycle().await.replied, 1);
    }

    let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&db_path).await.unwrap());
    let mut restarted = agent(AgentConfig::default(), store, mailbox.clone(), llm.clone()).await;
    assert!(restarted.context().is_known("m1"));

    let report = restarted.run_cycle().await;
    assert_eq!(report.replied, 0);
    assert_eq!(mailbox.outbox().len(), 1);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn suppression_cc_is_never_answered() {
    let store = memory_store().await;
    let mailbox = Arc::new(FakeMailbox::default());
    let llm = Arc::new(StubLlm::new());
    let config = AgentConfig::default();
    let suppressed = config.suppression_cc.clone();
    let mut poll = agent(config, Arc::clone(&store), mailbox.clone(), llm.clone()).await;

    mailbox.deliver(message("m1", "t1", "a@x.com", "sales@us.com", Some(&suppressed), "Pricing"));
    let report = poll.run_cycle().await;

    assert_eq!(report.filtered, 1);
    assert!(mailbox.outbox().is_empty());
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    assert!(poll.context().is_known("m1"));
    assert!(Ledger::new(store).known_message_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn sent_mail_cc_becomes_lead() {
    let store = memory_store().await;
    let mailbox = Arc::new(FakeMailbox::default());
    let mut poll = agent(
        AgentConfig::default(),
        Arc::clone(&store),
        mailbox.clone(),
        Arc::new(StubLlm::new()),
    )
    .await;

    mailbox.file_sent(message(
        "s1",
        "t9",
        "sales@us.com",
        "a@x.com",
        Some("B@Y.com, a@x.com"),
        "Intro",
    ));
    let report = poll.run_cycle().await;
    assert_eq!(report.leads_mined, 1);
    assert!(mailbox.outbox().is_empty());

    let mined = store.get_lead_by_email("b@y.com").await.unwrap();
    assert!(mined.is_some());
    assert!(store.get_lead_by_email("a@x.com").await.unwrap().is_none());

    assert_eq!(poll.run_cycle().await.leads_mined, 0);
}

#[tokio::test]
async fn quiet_lead_gets_one_followup() {
    let mailbox = Arc::new(FakeMailbox::default());
    let config = AgentConfig {
        followup_idle_threshold: Duration::from_millis(200),
        ..AgentConfig::default()
    };
    let mut poll = agent(config, memory_store().await, mailbox.clone(), Arc::new(StubLlm::new())).await;

    mailbox.deliver(lead_mail("m1"));
    assert_eq!(poll.run_cycle().await.replied, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = poll.run_cycle().await;
    assert_eq!(report.followups_sent, 1);

    let sent = mailbox.outbox();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].subject, "Following up: Pricing");
    assert_eq!(sent[1].to, "a@x.com");
    assert_eq!(sent[1].thread_id.as_deref(), Some("t1"));

    assert_eq!(poll.run_cycle().await.followups_sent, 0);
}

#[tokio::test]
async fn only_latest_reply_in_thread_is_followed_up() {
    let mailbox = Arc::new(FakeMailbox::default());
    let config = AgentConfig {
        followup_idle_threshold: Duration::from_millis(200),
        ..AgentConfig::default()
    };
    let mut poll = agent(config, memory_store().await, mailbox.clone(), Arc::new(StubLlm::new())).await;

    mailbox.deliver(lead_mail("m1"));
    poll.run_cycle().await;
    mailbox.deliver(lead_mail("m2"));
    assert_eq!(poll.run_cycle().await.replied, 1);
    assert_eq!(mailbox.outbox().len(), 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = poll.run_cycle().await;
    assert_eq!(report.followups_sent, 1);
    assert_eq!(mailbox.outbox().len(), 3);
}
