//! Sales reply pipeline.
//!
//! Every poll cycle flows through:
//! 1. `FollowUpScheduler::run()`: nudge leads who went quiet
//! 2. `ReplyEngine::handle()`: answer new inbound mail, at most once per message
//! 3. `SentScanner::scan()`: turn CC'd people on our outbound mail into leads
//!
//! `PollLoop` owns the cycle and the in-memory `AgentContext`.

pub mod followup;
pub mod poll_loop;
pub mod reply;
pub mod sent_scan;

#[cfg(test)]
pub(crate) mod testing;

pub use followup::{FollowUpReport, FollowUpScheduler};
pub use poll_loop::{AgentContext, CycleReport, PollLoop};
pub use reply::{ReplyEngine, ReplyOutcome, ReplyState};
pub use sent_scan::SentScanner;
