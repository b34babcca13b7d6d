//! Poll loop: the agent's single control loop.
//!
//! One cycle:
//! 1. Send due follow-ups
//! 2. Answer unread inbound mail
//! 3. Mine CC leads from sent mail
//! 4. Sleep the poll interval
//!
//! Phases run sequentially and no error inside a cycle stops the loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::error::PipelineError;
use crate::leads::LeadRegistry;
use crate::ledger::Ledger;
use crate::llm::LlmProvider;
use crate::mailbox::{Envelope, Mailbox};
use crate::pipeline::followup::FollowUpScheduler;
use crate::pipeline::reply::{ReplyEngine, ReplyState};
use crate::pipeline::sent_scan::SentScanner;
use crate::prompts::PromptTemplates;
use crate::store::Database;

/// Per-run memory of which provider messages need no more work.
///
/// Built once from the ledger at startup.
#[derive(Debug, Default)]
pub struct AgentContext {
    known_ids: HashSet<String>,
    attempts: HashMap<String, u32>,
}

impl AgentContext {
    pub fn new(known_ids: HashSet<String>) -> Self {
        Self {
            known_ids,
            attempts: HashMap::new(),
        }
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.known_ids.contains(id)
    }

    pub fn mark_known(&mut self, id: &str) {
        self.attempts.remove(id);
        self.known_ids.insert(id.to_string());
    }

    /// Count a failed attempt; returns the total so far.
    fn record_failure(&mut self, id: &str) -> u32 {
        let count = self.attempts.entry(id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn known_count(&self) -> usize {
        self.known_ids.len()
    }
}

/// Tally of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub followups_sent: usize,
    pub replied: usize,
    pub filtered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub leads_mined: usize,
}

pub struct PollLoop {
    config: AgentConfig,
    mailbox: Arc<dyn Mailbox>,
    replies: ReplyEngine,
    followups: FollowUpScheduler,
    sent_scan: SentScanner,
    ctx: AgentContext,
}

impl PollLoop {
    /// Wire the pipeline over a store and rebuild the known set from its ledger.
    pub async fn bootstrap(
        config: AgentConfig,
        store: Arc<dyn Database>,
        mailbox: Arc<dyn Mailbox>,
        llm: Arc<dyn LlmProvider>,
        prompts: PromptTemplates,
    ) -> Result<Self, PipelineError> {
        let registry = Arc::new(LeadRegistry::new(Arc::clone(&store)));
        let ledger = Arc::new(Ledger::new(Arc::clone(&store)));
        let prompts = Arc::new(prompts);

        let known = ledger.known_message_ids().await?;
        info!(known = known.len(), "Rebuilt known message ids from ledger");

        let replies = ReplyEngine::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::clone(&mailbox),
            Arc::clone(&llm),
            Arc::clone(&prompts),
            &config,
        );
        let followups = FollowUpScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::clone(&mailbox),
            llm,
            prompts,
            &config,
        );
        let sent_scan = SentScanner::new(registry, Arc::clone(&mailbox), &config.suppression_cc);

        Ok(Self {
            config,
            mailbox,
            replies,
            followups,
            sent_scan,
            ctx: AgentContext::new(known),
        })
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Run one full cycle without sleeping.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.followups.run(Utc::now()).await {
            Ok(followups) => {
                report.followups_sent = followups.sent;
                report.failed += followups.failed;
            }
            Err(e) => error!(error = %e, "Follow-up phase failed"),
        }

        self.process_inbox(&mut report).await;

        match self.sent_scan.scan(&mut self.ctx, &self.config.sent_query).await {
            Ok(mined) => report.leads_mined = mined,
            Err(e) => error!(error = %e, "Sent-mail scan failed"),
        }

        debug!(?report, "Poll cycle complete");
        report
    }

    async fn process_inbox(&mut self, report: &mut CycleReport) {
        let refs = match self.mailbox.list_messages(&self.config.inbox_query).await {
            Ok(refs) => refs,
            Err(e) => {
                error!(error = %e, "Failed to list inbound messages");
                return;
            }
        };

        for msg_ref in refs {
            if self.ctx.is_known(&msg_ref.id) {
                continue;
            }

            let raw = match self.mailbox.get_full_message(&msg_ref.id).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    debug!(id = %msg_ref.id, "Message disappeared before fetch");
                    self.ctx.mark_known(&msg_ref.id);
                    continue;
                }
                Err(e) => {
                    error!(id = %msg_ref.id, error = %e, "Failed to fetch message");
                    self.note_failure(&msg_ref.id, report);
                    continue;
                }
            };

            let envelope = Envelope::from_raw(&raw);
            match self.replies.handle(&envelope).await {
                Ok(outcome) => {
                    match outcome.state {
                        ReplyState::Replied => report.replied += 1,
                        ReplyState::Filtered => report.filtered += 1,
                        ReplyState::SkippedDuplicate => report.skipped += 1,
                        ReplyState::Seen | ReplyState::Recorded => {}
                    }
                    if outcome.state.is_terminal() {
                        self.ctx.mark_known(&envelope.provider_id);
                    } else {
                        self.note_failure(&envelope.provider_id, report);
                    }
                }
                Err(e) => {
                    error!(id = %envelope.provider_id, error = %e, "Failed to handle inbound message");
                    self.note_failure(&envelope.provider_id, report);
                }
            }
        }
    }

    /// Leave the message for the next cycle, or give up after too many tries.
    fn note_failure(&mut self, id: &str, report: &mut CycleReport) {
        report.failed += 1;
        let attempts = self.ctx.record_failure(id);
        if attempts >= self.config.max_reply_attempts {
            warn!(id, attempts, "Giving up on message for this run");
            self.ctx.mark_known(id);
        }
    }

    /// Poll forever with a fixed delay between cycles.
    pub async fn run(mut self) {
        info!(
            mailbox = self.mailbox.name(),
            interval_secs = self.config.poll_interval.as_secs(),
            idle_threshold_secs = self.config.followup_idle_threshold.as_secs(),
            "Poll loop started"
        );
        loop {
            let report = self.run_cycle().await;
            if report != CycleReport::default() {
                info!(
                    replied = report.replied,
                    followups = report.followups_sent,
                    filtered = report.filtered,
                    skipped = report.skipped,
                    failed = report.failed,
                    leads_mined = report.leads_mined,
                    "Poll cycle"
                );
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
