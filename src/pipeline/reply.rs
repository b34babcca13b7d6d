//! Reply decision engine: decides whether an inbound message gets a reply,
//! drafts it with the LLM and records it in the ledger.
//!
//! Flow for one inbound envelope:
//! 1. Suppression CC or unresolvable sender → `Filtered`
//! 2. Lead resolved, inbound appended → `Recorded`
//! 3. Someone already answered it → `SkippedDuplicate`
//! 4. LLM reply sent and appended → `Replied`
//!
//! A failed send leaves the message `Recorded`; the poll loop decides
//! whether to try again. Once a send succeeds the message is `Replied` even
//! if the ledger write keeps failing.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::PipelineError;
use crate::format::{clean_subject, markdown_to_html, strip_subject_line};
use crate::leads::LeadRegistry;
use crate::ledger::{AppendOutcome, ConversationEntry, FollowUpStatus, Ledger};
use crate::llm::{self, LlmProvider};
use crate::mailbox::{Envelope, Mailbox};
use crate::prompts::{PromptTemplates, lead_info};

/// Where an inbound message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    Seen,
    /// Ignored on purpose; never recorded.
    Filtered,
    /// In the ledger, no reply yet.
    Recorded,
    Replied,
    /// Someone already answered this message.
    SkippedDuplicate,
}

impl ReplyState {
    /// Whether the message needs no further attention.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filtered | Self::Replied | Self::SkippedDuplicate)
    }
}

impl std::fmt::Display for ReplyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seen => write!(f, "seen"),
            Self::Filtered => write!(f, "filtered"),
            Self::Recorded => write!(f, "recorded"),
            Self::Replied => write!(f, "replied"),
            Self::SkippedDuplicate => write!(f, "skipped_duplicate"),
        }
    }
}

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub state: ReplyState,
    pub lead_id: Option<Uuid>,
    /// Ledger id of the reply we sent.
    pub reply_id: Option<String>,
}

impl ReplyOutcome {
    fn filtered() -> Self {
        Self {
            state: ReplyState::Filtered,
            lead_id: None,
            reply_id: None,
        }
    }

    fn at(state: ReplyState, lead_id: Uuid) -> Self {
        Self {
            state,
            lead_id: Some(lead_id),
            reply_id: None,
        }
    }
}

/// Drafts and sends replies to inbound lead mail.
pub struct ReplyEngine {
    registry: Arc<LeadRegistry>,
    ledger: Arc<Ledger>,
    mailbox: Arc<dyn Mailbox>,
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<PromptTemplates>,
    suppression_cc: String,
    agent_address: Option<String>,
    max_reply_tokens: u32,
}

impl ReplyEngine {
    pub fn new(
        registry: Arc<LeadRegistry>,
        ledger: Arc<Ledger>,
        mailbox: Arc<dyn Mailbox>,
        llm: Arc<dyn LlmProvider>,
        prompts: Arc<PromptTemplates>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            mailbox,
            llm,
            prompts,
            suppression_cc: config.suppression_cc.clone(),
            agent_address: config.agent_address.clone(),
            max_reply_tokens: config.max_reply_tokens,
        }
    }

    /// Run one inbound envelope through the decision flow.
    ///
    /// LLM and store errors propagate; mailbox send failures do not.
    pub async fn handle(&self, envelope: &Envelope) -> Result<ReplyOutcome, PipelineError> {
        if envelope.cc_contains(&self.suppression_cc) {
            info!(
                id = %envelope.provider_id,
                cc = %self.suppression_cc,
                "Suppression address in CC, not replying"
            );
            return Ok(ReplyOutcome::filtered());
        }

        let Some(from) = envelope.from.as_deref() else {
            warn!(id = %envelope.provider_id, "No resolvable sender, skipping");
            return Ok(ReplyOutcome::filtered());
        };

        let lead = self.registry.get_or_create(from).await?;
        let our_address = envelope
            .primary_to()
            .map(str::to_string)
            .or_else(|| self.agent_address.clone())
            .unwrap_or_default();

        let inbound = ConversationEntry::inbound(
            lead.id,
            &envelope.thread_id,
            &envelope.provider_id,
            envelope.message_id.as_deref(),
            from,
            &our_address,
            &envelope.subject,
            &envelope.body,
            envelope.received_at.unwrap_or_else(Utc::now),
        );
        match self.ledger.append(&inbound).await? {
            AppendOutcome::Inserted => {
                debug!(id = %envelope.provider_id, lead = %lead.email, "Inbound recorded");
            }
            AppendOutcome::Duplicate => {
                debug!(id = %envelope.provider_id, "Inbound already recorded, re-checking reply");
            }
        }

        if self
            .ledger
            .existing_reply_to(lead.id, &envelope.provider_id, from)
            .await?
        {
            info!(id = %envelope.provider_id, lead = %lead.email, "Already replied, skipping");
            return Ok(ReplyOutcome::at(ReplyState::SkippedDuplicate, lead.id));
        }

        let history = self.ledger.history_for(lead.id).await?;
        let prompt = self.prompts.build_reply_prompt(&history, &lead_info(from));
        let text = llm::generate_reply(self.llm.as_ref(), &prompt, self.max_reply_tokens).await?;
        let html = markdown_to_html(&strip_subject_line(&text));
        let subject = clean_subject(&envelope.subject);

        let threading_id = envelope.threading_id();
        let mut draft = self.mailbox.create_message(
            from,
            &subject,
            &html,
            Some(&envelope.thread_id),
            Some(threading_id),
            Some(threading_id),
        );
        if !our_address.is_empty() {
            draft.from = Some(our_address.clone());
        }

        match self.mailbox.send_message(&draft).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(id = %envelope.provider_id, lead = %lead.email, "Mailbox refused reply");
                return Ok(ReplyOutcome::at(ReplyState::Recorded, lead.id));
            }
            Err(e) => {
                warn!(id = %envelope.provider_id, lead = %lead.email, error = %e, "Reply send failed");
                return Ok(ReplyOutcome::at(ReplyState::Recorded, lead.id));
            }
        }

        let outbound = ConversationEntry::outbound(
            lead.id,
            &envelope.thread_id,
            &envelope.provider_id,
            &our_address,
            from,
            &subject,
            &html,
            FollowUpStatus::Pending,
            Utc::now(),
        );
        if let Err(first) = self.ledger.append(&outbound).await {
            warn!(id = %envelope.provider_id, error = %first, "Failed to record sent reply, retrying");
            if let Err(e) = self.ledger.append(&outbound).await {
                error!(
                    id = %envelope.provider_id,
                    lead = %lead.email,
                    reply_id = %outbound.message_id,
                    error = %e,
                    "Reply sent but not recorded; a retry would send it again, so it is treated as replied"
                );
            }
        }

        if let Err(e) = self.mailbox.mark_as_read(&envelope.provider_id).await {
            warn!(id = %envelope.provider_id, error = %e, "Failed to mark message as read");
        }

        info!(
            id = %envelope.provider_id,
            lead = %lead.email,
            reply_id = %outbound.message_id,
            "Reply sent"
        );
        Ok(ReplyOutcome {
            state: ReplyState::Replied,
            lead_id: Some(lead.id),
            reply_id: Some(outbound.message_id),
        })
    }
}
