//! Sent-mail lead miner: people we CC on outbound mail become leads.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::leads::LeadRegistry;
use crate::mailbox::{Envelope, Mailbox};
use crate::pipeline::poll_loop::AgentContext;

pub struct SentScanner {
    registry: Arc<LeadRegistry>,
    mailbox: Arc<dyn Mailbox>,
    suppression_cc: String,
}

impl SentScanner {
    pub fn new(registry: Arc<LeadRegistry>, mailbox: Arc<dyn Mailbox>, suppression_cc: &str) -> Self {
        Self {
            registry,
            mailbox,
            suppression_cc: suppression_cc.to_string(),
        }
    }

    /// Register every CC address on sent messages not seen before.
    ///
    /// The primary recipient and the suppression address are never mined.
    /// Returns how many addresses were resolved to leads.
    pub async fn scan(&self, ctx: &mut AgentContext, query: &str) -> Result<usize, PipelineError> {
        let refs = self.mailbox.list_messages(query).await?;
        let mut mined = 0;

        for msg_ref in refs {
            if ctx.is_known(&msg_ref.id) {
                continue;
            }
            match self.mine_one(&msg_ref.id).await {
                Ok(count) => {
                    mined += count;
                    ctx.mark_known(&msg_ref.id);
                }
                Err(e) => {
                    error!(id = %msg_ref.id, error = %e, "Failed to mine sent message");
                }
            }
        }

        if mined > 0 {
            info!(mined, "Mined CC leads from sent mail");
        }
        Ok(mined)
    }

    async fn mine_one(&self, id: &str) -> Result<usize, PipelineError> {
        let Some(raw) = self.mailbox.get_full_message(id).await? else {
            debug!(id, "Sent message vanished before it could be read");
            return Ok(0);
        };
        let envelope = Envelope::from_raw(&raw);
        let to = envelope.primary_to();

        let mut mined = 0;
        for cc in &envelope.cc {
            let is_recipient = to.is_some_and(|to| to.eq_ignore_ascii_case(cc));
            if is_recipient || cc.eq_ignore_ascii_case(&self.suppression_cc) {
                continue;
            }
            let lead = self.registry.get_or_create(cc).await?;
            debug!(id, lead = %lead.email, "CC address registered as lead");
            mined += 1;
        }
        Ok(mined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{MockMailbox, raw_message};
    use crate::store::{Database, LibSqlBackend};

    async fn setup() -> (SentScanner, Arc<LeadRegistry>, Arc<MockMailbox>, Arc<dyn Database>) {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let registry = Arc::new(LeadRegistry::new(Arc::clone(&store)));
        let mailbox = Arc::new(MockMailbox::default());
        let scanner = SentScanner::new(
            Arc::clone(&registry),
            mailbox.clone(),
            crate::config::DEFAULT_SUPPRESSION_CC,
        );
        (scanner, registry, mailbox, store)
    }

    #[tokio::test]
    async fn cc_becomes_lead_but_recipient_and_suppression_do_not() {
        let (scanner, _registry, mailbox, store) = setup().await;
        mailbox.sent_folder.lock().unwrap().push(raw_message(
            "s1",
            "t1",
            "sales@us.com",
            "a@x.com",
            Some("B <b@y.com>, A@X.com, executive@buildyoursocials.com"),
            "Intro",
            "Looping in Bob",
        ));

        let mut ctx = AgentContext::default();
        let mined = scanner.scan(&mut ctx, "in:sent").await.unwrap();
        assert_eq!(mined, 1);
        assert!(store.get_lead_by_email("b@y.com").await.unwrap().is_some());
        assert!(store.get_lead_by_email("a@x.com").await.unwrap().is_none());
        assert!(
            store
                .get_lead_by_email("executive@buildyoursocials.com")
                .await
                .unwrap()
                .is_none()
        );
        assert!(ctx.is_known("s1"));
    }

    #[tokio::test]
    async fn known_and_cc_less_messages_are_skipped() {
        let (scanner, registry, mailbox, _store) = setup().await;
        mailbox.sent_folder.lock().unwrap().extend([
            raw_message("s1", "t1", "sales@us.com", "a@x.com", None, "Hi", "no cc"),
            raw_message("s2", "t2", "sales@us.com", "a@x.com", Some("c@z.com"), "Hi", "cc"),
        ]);

        let mut ctx = AgentContext::default();
        ctx.mark_known("s2");
        assert_eq!(scanner.scan(&mut ctx, "in:sent").await.unwrap(), 0);
        assert!(ctx.is_known("s1"));

        let existing = registry.get_or_create("c@z.com").await.unwrap();
        let mut fresh = AgentContext::default();
        assert_eq!(scanner.scan(&mut fresh, "in:sent").await.unwrap(), 1);
        assert_eq!(registry.get_or_create("c@z.com").await.unwrap().id, existing.id);
    }
}
