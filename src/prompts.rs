//! Prompt templates for replies and follow-ups.
//!
//! Templates use two placeholders: `{lead_info}` and `{conversation_history}`.
//! Defaults are compiled in; either can be replaced by a file.

use std::path::Path;

use crate::error::ConfigError;
use crate::ledger::ConversationEntry;

const DEFAULT_REPLY_TEMPLATE: &str = "\
You are a friendly, professional sales representative replying to a prospective customer by email.

Guidelines:
- Answer the lead's latest message directly and helpfully.
- Keep it short: 2-4 short paragraphs, plain language, no hard sell.
- End with one clear next step (a question or an offer to book a call).
- Do not invent prices, dates or commitments that are not in the conversation.
- Write only the email body. No subject line, no placeholders like [Name].

{lead_info}

Conversation so far (oldest first):
{conversation_history}

Write the reply now.";

const DEFAULT_FOLLOWUP_TEMPLATE: &str = "\
You are a friendly, professional sales representative. The lead below has not answered your last email.

Write a brief, polite follow-up:
- One or two short paragraphs.
- Refer to what was discussed without repeating it word for word.
- Make it easy to reply (a simple yes/no question works well).
- Write only the email body. No subject line.

{lead_info}

Conversation so far (oldest first):
{conversation_history}

Write the follow-up now.";

/// Reply and follow-up templates.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    reply: String,
    followup: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            reply: DEFAULT_REPLY_TEMPLATE.to_string(),
            followup: DEFAULT_FOLLOWUP_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn new(reply: impl Into<String>, followup: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            followup: followup.into(),
        }
    }

    /// Load templates, reading each override file if a path is given.
    pub fn load(
        reply_path: Option<&Path>,
        followup_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let reply = match reply_path {
            Some(path) => read_template(path)?,
            None => defaults.reply,
        };
        let followup = match followup_path {
            Some(path) => read_template(path)?,
            None => defaults.followup,
        };
        Ok(Self { reply, followup })
    }

    /// Prompt for answering the lead's latest message.
    pub fn build_reply_prompt(&self, history: &[ConversationEntry], lead_info: &str) -> String {
        render(&self.reply, lead_info, &format_history(history))
    }

    /// Prompt for nudging a lead who went quiet.
    pub fn build_followup_prompt(&self, history: &[ConversationEntry], lead_email: &str) -> String {
        render(
            &self.followup,
            &lead_info(lead_email),
            &format_history(history),
        )
    }
}

/// Preamble describing the lead.
pub fn lead_info(email: &str) -> String {
    format!("Lead email: {email}")
}

fn read_template(path: &Path) -> Result<String, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            key: path.display().to_string(),
            message: "prompt template is empty".into(),
        });
    }
    tracing::info!(path = %path.display(), "Loaded prompt template");
    Ok(text)
}

/// One `sender: body` line per entry, in the given order.
fn format_history(history: &[ConversationEntry]) -> String {
    history
        .iter()
        .map(|e| format!("{}: {}", e.sender, e.body.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render(template: &str, lead_info: &str, history: &str) -> String {
    let mut out = template.replace("{lead_info}", lead_info);
    if out.contains("{conversation_history}") {
        out = out.replace("{conversation_history}", history);
    } else {
        out.push_str("\n\nConversation so far (oldest first):\n");
        out.push_str(history);
    }
    out
}
