//! Bridge from rig's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::{CompletionError, CompletionModel};
use rig::message::{AssistantContent, Message};
use rust_decimal::Decimal;

use super::costs;
use super::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};
use crate::error::LlmError;

/// Wraps any rig completion model.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
    costs: (Decimal, Decimal),
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            costs: costs::model_cost(model_name).unwrap_or((Decimal::ZERO, Decimal::ZERO)),
        }
    }
}

/// Split our flat message list into rig's (preamble, history, prompt) shape.
fn split_messages(
    messages: Vec<ChatMessage>,
    provider: &str,
) -> Result<(Option<String>, Vec<Message>, Message), LlmError> {
    let mut system = Vec::new();
    let mut turns = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => system.push(msg.content),
            Role::User => turns.push(Message::user(msg.content)),
            Role::Assistant => turns.push(Message::assistant(msg.content)),
        }
    }

    let prompt = turns.pop().ok_or_else(|| LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: "completion request has no user message".into(),
    })?;
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));
    Ok((preamble, turns, prompt))
}

/// rig's generic response carries no stop reason; a reply that used the
/// whole token budget is treated as cut off.
fn finish_reason(output_tokens: u32, max_tokens: Option<u32>) -> FinishReason {
    match max_tokens {
        Some(max) if output_tokens >= max => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

fn map_error(provider: &str, err: CompletionError) -> LlmError {
    let reason = err.to_string();
    let lower = reason.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }
    } else if lower.contains("401") || lower.contains("invalid api key") || lower.contains("authentication") {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.costs
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, history, prompt) = split_messages(request.messages, &self.model_name)?;
        let max_tokens = request.max_tokens;

        let mut builder = self.model.completion_request(prompt);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if !history.is_empty() {
            builder = builder.messages(history);
        }
        if let Some(max_tokens) = max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_error(&self.model_name, e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.model_name.clone(),
                reason: "response contained no text".into(),
            });
        }

        let output_tokens = u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX);
        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens,
            finish_reason: finish_reason(output_tokens, max_tokens),
            response_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_become_preamble() {
        let (preamble, history, _prompt) = split_messages(
            vec![
                ChatMessage::system("be brief"),
                ChatMessage::user("first"),
                ChatMessage::assistant("reply"),
                ChatMessage::user("second"),
            ],
            "test",
        )
        .unwrap();
        assert_eq!(preamble.as_deref(), Some("be brief"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn empty_request_is_rejected() {
        let err = split_messages(vec![ChatMessage::system("only system")], "test").unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }

    #[test]
    fn exhausted_budget_reports_length() {
        assert_eq!(finish_reason(900, Some(900)), FinishReason::Length);
        assert_eq!(finish_reason(120, Some(900)), FinishReason::Stop);
        assert_eq!(finish_reason(5000, None), FinishReason::Stop);
    }

    #[test]
    fn errors_are_classified() {
        let rate = map_error(
            "gpt-4o",
            CompletionError::ProviderError("HTTP 429 Too Many Requests".into()),
        );
        assert!(matches!(rate, LlmError::RateLimited { .. }));

        let auth = map_error(
            "gpt-4o",
            CompletionError::ProviderError("401 Unauthorized".into()),
        );
        assert!(matches!(auth, LlmError::AuthFailed { .. }));

        let other = map_error("gpt-4o", CompletionError::ResponseError("boom".into()));
        assert!(matches!(other, LlmError::RequestFailed { .. }));
    }
}
