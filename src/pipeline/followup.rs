//! Follow-up scheduler: nudges leads who went quiet after our last message.
//!
//! Each run picks the ledger entries that are due and keeps the newest per
//! (lead, thread). A lead then gets at most one follow-up, on its most
//! recently active thread, and its other due threads are retired with it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::PipelineError;
use crate::format::{clean_subject, markdown_to_html, strip_subject_line};
use crate::leads::LeadRegistry;
use crate::ledger::{ConversationEntry, FollowUpStatus, Ledger, MessageOwner};
use crate::llm::{self, LlmProvider};
use crate::mailbox::Mailbox;
use crate::prompts::PromptTemplates;

const FOLLOW_UP_PREFIX: &str = "Following up: ";

/// What happened to one due thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpResult {
    Sent,
    /// Lead gone, opted out, or the thread moved on.
    Skipped,
    /// The mailbox refused the message.
    Refused,
}

/// Tally of one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowUpReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct FollowUpScheduler {
    registry: Arc<LeadRegistry>,
    ledger: Arc<Ledger>,
    mailbox: Arc<dyn Mailbox>,
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<PromptTemplates>,
    idle_threshold: Duration,
    max_tokens: u32,
}

impl FollowUpScheduler {
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
            idle_threshold: config.followup_idle_threshold,
            max_tokens: config.max_reply_tokens,
        }
    }

    /// Send every follow-up that is due at `now`, at most one per lead.
    ///
    /// A lead's threads are tried most recently active first until one is
    /// sent or fails. Per-thread failures are logged and counted, never returned.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<FollowUpReport, PipelineError> {
        let due = self.ledger.due_followups(now, self.idle_threshold).await?;
        let mut report = FollowUpReport::default();

        for threads in by_lead(newest_per_thread(due)) {
            for (i, trigger) in threads.iter().enumerate() {
                let siblings: Vec<ConversationEntry> = threads
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, entry)| entry.clone())
                    .collect();
                match self.follow_up(trigger, &siblings, now).await {
                    Ok(FollowUpResult::Sent) => {
                        report.sent += 1;
                        break;
                    }
                    Ok(FollowUpResult::Skipped) => report.skipped += 1,
                    Ok(FollowUpResult::Refused) => {
                        report.failed += 1;
                        break;
                    }
                    Err(e) => {
                        error!(
                            trigger = %trigger.message_id,
                            thread = %trigger.thread_id,
                            error = %e,
                            "Follow-up failed"
                        );
                        report.failed += 1;
                        break;
                    }
                }
            }
        }

        if report != FollowUpReport::default() {
            info!(
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                "Follow-up phase complete"
            );
        }
        Ok(report)
    }

    async fn follow_up(
        &self,
        trigger: &ConversationEntry,
        siblings: &[ConversationEntry],
        now: DateTime<Utc>,
    ) -> Result<FollowUpResult, PipelineError> {
        let Some(lead) = self.registry.get(trigger.lead_id).await? else {
            warn!(lead_id = %trigger.lead_id, "Due follow-up for unknown lead, skipping");
            return Ok(FollowUpResult::Skipped);
        };
        if !lead.accepts_followups() {
            debug!(lead = %lead.email, status = %lead.status, "Lead opted out, no follow-up");
            return Ok(FollowUpResult::Skipped);
        }

        let thread = self
            .ledger
            .thread_history(lead.id, &trigger.thread_id)
            .await?;
        let Some(last) = thread.last() else {
            return Ok(FollowUpResult::Skipped);
        };
        if last.author != MessageOwner::Agent {
            debug!(lead = %lead.email, thread = %trigger.thread_id, "Lead spoke last, no follow-up");
            return Ok(FollowUpResult::Skipped);
        }

        let prompt = self.prompts.build_followup_prompt(&thread, &lead.email);
        let text = llm::generate_reply(self.llm.as_ref(), &prompt, self.max_tokens).await?;
        let html = markdown_to_html(&strip_subject_line(&text));
        let subject = followup_subject(&trigger.subject);

        let threading_id = last.threading_id();
        let mut draft = self.mailbox.create_message(
            &lead.email,
            &subject,
            &html,
            Some(&trigger.thread_id),
            Some(threading_id),
            Some(threading_id),
        );
        if !trigger.sender.is_empty() {
            draft.from = Some(trigger.sender.clone());
        }

        if !self.mailbox.send_message(&draft).await? {
            warn!(lead = %lead.email, "Mailbox refused follow-up");
            return Ok(FollowUpResult::Refused);
        }

        let followup = ConversationEntry::outbound(
            lead.id,
            &trigger.thread_id,
            &trigger.message_id,
            &trigger.sender,
            &lead.email,
            &subject,
            &html,
            FollowUpStatus::Sent,
            now,
        );
        self.ledger.record_followup(trigger, &followup, siblings).await?;
        if !siblings.is_empty() {
            debug!(lead = %lead.email, retired = siblings.len(), "Retired other due threads for lead");
        }

        info!(lead = %lead.email, thread = %trigger.thread_id, "Follow-up sent");
        Ok(FollowUpResult::Sent)
    }
}

/// Keep only the newest due entry per (lead, thread), oldest thread first.
fn newest_per_thread(due: Vec<ConversationEntry>) -> Vec<ConversationEntry> {
    let mut by_thread: HashMap<(Uuid, String), ConversationEntry> = HashMap::new();
    for entry in due {
        let key = (entry.lead_id, entry.thread_id.clone());
        match by_thread.get(&key) {
            Some(kept) if kept.timestamp >= entry.timestamp => {}
            _ => {
                by_thread.insert(key, entry);
            }
        }
    }
    let mut out: Vec<_> = by_thread.into_values().collect();
    out.sort_by(|a, b| {
        a.last_message_time
            .cmp(&b.last_message_time)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
    out
}

/// Group thread candidates per lead, most recently active thread first.
/// Leads keep the order of their first candidate.
fn by_lead(candidates: Vec<ConversationEntry>) -> Vec<Vec<ConversationEntry>> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut grouped: HashMap<Uuid, Vec<ConversationEntry>> = HashMap::new();
    for entry in candidates {
        let lead = entry.lead_id;
        grouped
            .entry(lead)
            .or_insert_with(|| {
                order.push(lead);
                Vec::new()
            })
            .push(entry);
    }
    order
        .into_iter()
        .filter_map(|lead| grouped.remove(&lead))
        .map(|mut threads| {
            threads.sort_by(|a, b| {
                b.last_message_time
                    .cmp(&a.last_message_time)
                    .then_with(|| b.message_id.cmp(&a.message_id))
            });
            threads
        })
        .collect()
}

/// `Following up: <subject>` without stacking prefixes.
fn followup_subject(subject: &str) -> String {
    let mut base = clean_subject(subject);
    while let Some(rest) = base.strip_prefix(FOLLOW_UP_PREFIX) {
        base = rest.trim().to_string();
    }
    format!("{FOLLOW_UP_PREFIX}{base}")
}
