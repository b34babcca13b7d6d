//! Configuration types.
//!
//! Everything is read from environment variables. Numeric values that fail
//! to parse fall back to their defaults with a warning.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// CC address that marks a thread as handled by a human.
pub const DEFAULT_SUPPRESSION_CC: &str = "executive@buildyoursocials.com";

/// Sent mail is mined over a recent window; older messages were seen by earlier runs.
pub const DEFAULT_SENT_QUERY: &str = "in:sent newer_than:2d";

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Inbound messages that CC this address are never answered, and the
    /// address is never mined as a lead.
    pub suppression_cc: String,
    /// How long an agent-owned conversation must sit idle before a follow-up.
    pub followup_idle_threshold: Duration,
    /// Fixed delay between poll cycles.
    pub poll_interval: Duration,
    /// Token cap for generated replies and follow-ups.
    pub max_reply_tokens: u32,
    /// Attempts per inbound message within one run before giving up on it.
    pub max_reply_attempts: u32,
    /// Mailbox query selecting inbound messages that may need a reply.
    pub inbox_query: String,
    /// Mailbox query selecting outbound messages to mine for CC leads.
    pub sent_query: String,
    /// Our own address, used as the outbound sender when the inbound `To` is missing.
    pub agent_address: Option<String>,
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Optional override for the reply prompt template.
    pub reply_prompt_path: Option<PathBuf>,
    /// Optional override for the follow-up prompt template.
    pub followup_prompt_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            suppression_cc: DEFAULT_SUPPRESSION_CC.to_string(),
            followup_idle_threshold: Duration::from_secs(24 * 3600), // 24 hours
            poll_interval: Duration::from_secs(10),
            max_reply_tokens: 900,
            max_reply_attempts: 3,
            inbox_query: "is:unread".to_string(),
            sent_query: DEFAULT_SENT_QUERY.to_string(),
            agent_address: None,
            db_path: PathBuf::from("./data/sales-agent.db"),
            reply_prompt_path: None,
            followup_prompt_path: None,
        }
    }
}

impl AgentConfig {
    /// Build config from environment variables, defaulting anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let suppression_cc = std::env::var("SALES_AGENT_SUPPRESSION_CC")
            .map(|s| s.trim().to_lowercase())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.suppression_cc);

        let followup_idle_threshold = env_parse::<u64>("SALES_AGENT_FOLLOWUP_IDLE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.followup_idle_threshold);

        let poll_interval = env_parse::<u64>("SALES_AGENT_POLL_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let max_reply_tokens =
            env_parse::<u32>("SALES_AGENT_MAX_REPLY_TOKENS").unwrap_or(defaults.max_reply_tokens);

        let max_reply_attempts = env_parse::<u32>("SALES_AGENT_MAX_REPLY_ATTEMPTS")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_reply_attempts);

        let inbox_query =
            std::env::var("SALES_AGENT_INBOX_QUERY").unwrap_or(defaults.inbox_query);
        let sent_query = std::env::var("SALES_AGENT_SENT_QUERY").unwrap_or(defaults.sent_query);

        let agent_address = std::env::var("SALES_AGENT_ADDRESS")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let db_path = std::env::var("SALES_AGENT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        Self {
            suppression_cc,
            followup_idle_threshold,
            poll_interval,
            max_reply_tokens,
            max_reply_attempts,
            inbox_query,
            sent_query,
            agent_address,
            db_path,
            reply_prompt_path: std::env::var("SALES_AGENT_REPLY_PROMPT").ok().map(PathBuf::from),
            followup_prompt_path: std::env::var("SALES_AGENT_FOLLOWUP_PROMPT")
                .ok()
                .map(PathBuf::from),
        }
    }
}

/// Parse an environment variable, warning (and returning `None`) on garbage.
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}
