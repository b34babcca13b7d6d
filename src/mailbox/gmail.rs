//! Gmail mailbox: Gmail REST v1 over reqwest, raw MIME built with lettre.
//!
//! OAuth is handled elsewhere: the mailbox is handed an already-issued
//! access token.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use lettre::message::Mailbox as Address;
use lettre::message::header::ContentType;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::{Draft, Mailbox, MessageRef, RawMessage};
use crate::error::{ConfigError, MailboxError};

const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const DEFAULT_MAX_LIST_PAGES: usize = 5;

// ── Configuration ───────────────────────────────────────────────────

/// Gmail connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub access_token: SecretString,
    /// Gmail user id; `me` is the authenticated account.
    pub user_id: String,
    pub api_base: String,
    /// Sender address for drafts that do not set one. Looked up from the
    /// account profile when unset.
    pub from_address: Option<String>,
    pub request_timeout: Duration,
    /// Upper bound on list pages fetched per query, per call.
    pub max_list_pages: usize,
}

impl GmailConfig {
    /// Build config from environment variables.
    /// `GMAIL_ACCESS_TOKEN` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let access_token = std::env::var("GMAIL_ACCESS_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("GMAIL_ACCESS_TOKEN".into()))?;

        let user_id = std::env::var("GMAIL_USER_ID").unwrap_or_else(|_| "me".to_string());
        let api_base = std::env::var("GMAIL_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let from_address = std::env::var("SALES_AGENT_ADDRESS")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let max_list_pages = std::env::var("GMAIL_MAX_LIST_PAGES")
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_LIST_PAGES);

        Ok(Self {
            access_token: SecretString::from(access_token),
            user_id,
            api_base,
            from_address,
            request_timeout: Duration::from_secs(30),
            max_list_pages,
        })
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(rename = "emailAddress")]
    email_address: String,
}

// ── Mailbox ─────────────────────────────────────────────────────────

pub struct GmailMailbox {
    config: GmailConfig,
    client: reqwest::Client,
    sender: OnceCell<String>,
}

impl GmailMailbox {
    pub fn new(config: GmailConfig) -> Result<Self, MailboxError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MailboxError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            client,
            sender: OnceCell::new(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/users/{}/{path}",
            self.config.api_base, self.config.user_id
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, MailboxError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(self.config.access_token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| MailboxError::Http(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(status, resp).await?.map(Some)
    }

    /// Address to send from when a draft does not name one.
    async fn sender_address(&self) -> Result<String, MailboxError> {
        self.sender
            .get_or_try_init(|| async {
                if let Some(addr) = &self.config.from_address {
                    return Ok(addr.clone());
                }
                let profile: Option<Profile> = self.get_json(&self.api_url("profile"), &[]).await?;
                profile
                    .map(|p| p.email_address)
                    .ok_or_else(|| MailboxError::InvalidMessage("Gmail profile not found".into()))
            })
            .await
            .cloned()
    }
}

/// Map a non-success response to an error, or deserialize the body.
async fn check_status<T: serde::de::DeserializeOwned>(
    status: reqwest::StatusCode,
    resp: reqwest::Response,
) -> Result<Result<T, MailboxError>, MailboxError> {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(MailboxError::AuthFailed {
            name: "gmail".into(),
        });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(MailboxError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp
        .json::<T>()
        .await
        .map_err(|e| MailboxError::InvalidMessage(format!("Unexpected Gmail response: {e}"))))
}

/// Render a draft as an RFC 5322 message.
pub fn build_raw_mime(draft: &Draft, default_from: &str) -> Result<Vec<u8>, MailboxError> {
    let from: Address = draft
        .from
        .as_deref()
        .unwrap_or(default_from)
        .parse()
        .map_err(|e| MailboxError::Build(format!("Invalid from address: {e}")))?;
    let to: Address = draft
        .to
        .parse()
        .map_err(|e| MailboxError::Build(format!("Invalid to address: {e}")))?;

    let mut builder = lettre::Message::builder()
        .from(from)
        .to(to)
        .subject(draft.subject.as_str());
    if let Some(id) = &draft.in_reply_to {
        builder = builder.in_reply_to(id.clone());
    }
    if let Some(refs) = &draft.references {
        builder = builder.references(refs.clone());
    }

    let message = builder
        .header(ContentType::TEXT_HTML)
        .body(draft.body.clone())
        .map_err(|e| MailboxError::Build(format!("Failed to build email: {e}")))?;
    Ok(message.formatted())
}

/// Token for the next list page, or `None` when done or at the page cap.
fn next_page(token: Option<String>, pages: usize, max_pages: usize) -> Option<String> {
    let token = token.filter(|t| !t.is_empty())?;
    if pages >= max_pages {
        tracing::debug!(pages, "Stopping Gmail listing at page cap");
        return None;
    }
    Some(token)
}

#[async_trait]
impl Mailbox for GmailMailbox {
    fn name(&self) -> &str {
        "gmail"
    }

    async fn list_messages(&self, query: &str) -> Result<Vec<MessageRef>, MailboxError> {
        let url = self.api_url("messages");
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0;

        loop {
            let mut params = vec![("q", query)];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let page: ListResponse = match self.get_json(&url, &params).await? {
                Some(page) => page,
                None => break,
            };
            pages += 1;
            out.extend(page.messages);
            match next_page(page.next_page_token, pages, self.config.max_list_pages) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(query, count = out.len(), "Listed Gmail messages");
        Ok(out)
    }

    async fn get_full_message(&self, id: &str) -> Result<Option<RawMessage>, MailboxError> {
        let url = self.api_url(&format!("messages/{id}"));
        self.get_json(&url, &[("format", "full")]).await
    }

    async fn send_message(&self, draft: &Draft) -> Result<bool, MailboxError> {
        let sender = self.sender_address().await?;
        let raw = build_raw_mime(draft, &sender)?;

        let mut payload = serde_json::json!({ "raw": URL_SAFE.encode(raw) });
        if let Some(thread_id) = &draft.thread_id {
            payload["threadId"] = serde_json::Value::String(thread_id.clone());
        }

        let resp = self
            .client
            .post(self.api_url("messages/send"))
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailboxError::Http(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!(to = %draft.to, subject = %draft.subject, "Email sent");
            return Ok(true);
        }
        if status.is_client_error()
            && status != reqwest::StatusCode::UNAUTHORIZED
            && status != reqwest::StatusCode::FORBIDDEN
        {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(to = %draft.to, status = %status, body = %body, "Gmail refused message");
            return Ok(false);
        }
        check_status::<serde_json::Value>(status, resp).await??;
        Ok(true)
    }

    async fn mark_as_read(&self, id: &str) -> Result<(), MailboxError> {
        let resp = self
            .client
            .post(self.api_url(&format!("messages/{id}/modify")))
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&serde_json::json!({ "removeLabelIds": ["UNREAD"] }))
            .send()
            .await
            .map_err(|e| MailboxError::Http(e.to_string()))?;

        check_status::<serde_json::Value>(resp.status(), resp).await??;
        tracing::debug!(id, "Marked message as read");
        Ok(())
    }
}
