//! Lead data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a lead. Changed externally, never inferred from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// Freshly discovered, nothing sent yet.
    Initial,
    /// Conversation under way.
    Progress,
    /// Opted out: no more follow-ups.
    NotInterested,
}

impl Default for LeadStatus {
    fn default() -> Self {
        Self::Initial
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Progress => write!(f, "progress"),
            Self::NotInterested => write!(f, "not_interested"),
        }
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "progress" => Ok(Self::Progress),
            "not_interested" => Ok(Self::NotInterested),
            _ => Err(format!("Unknown lead status: {}", s)),
        }
    }
}

/// A prospective customer, keyed by email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    /// Lowercased bare address: the identity key.
    pub email: String,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Create a new lead in the `Initial` state.
    pub fn new(email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            status: LeadStatus::Initial,
            created_at: Utc::now(),
        }
    }

    /// Whether follow-ups may still be sent to this lead.
    pub fn accepts_followups(&self) -> bool {
        self.status != LeadStatus::NotInterested
    }
}

/// Canonical form of an email address used as the registry key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for status in [
            LeadStatus::Initial,
            LeadStatus::Progress,
            LeadStatus::NotInterested,
        ] {
            let parsed: LeadStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<LeadStatus>().is_err());
    }

    #[test]
    fn new_lead_is_initial_and_lowercased() {
        let lead = Lead::new("  Alice@Example.COM ");
        assert_eq!(lead.email, "alice@example.com");
        assert_eq!(lead.status, LeadStatus::Initial);
        assert!(lead.accepts_followups());
    }

    #[test]
    fn not_interested_blocks_followups() {
        let mut lead = Lead::new("bob@example.com");
        lead.status = LeadStatus::NotInterested;
        assert!(!lead.accepts_followups());
    }
}
