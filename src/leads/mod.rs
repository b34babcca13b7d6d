//! Lead registry: email address to durable lead, created on first sight.

pub mod model;

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::Database;

pub use model::{Lead, LeadStatus, normalize_email};

/// Resolves addresses to leads, creating them on first sight.
pub struct LeadRegistry {
    store: Arc<dyn Database>,
}

impl LeadRegistry {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self { store }
    }

    /// Look up a lead by address (case-insensitive), creating it in the
    /// `Initial` state if it does not exist yet.
    ///
    /// When two writers race on the same address the store's unique key
    /// picks the winner; the loser re-reads and returns it.
    pub async fn get_or_create(&self, email: &str) -> Result<Lead, DatabaseError> {
        let email = normalize_email(email);
        if let Some(existing) = self.store.get_lead_by_email(&email).await? {
            return Ok(existing);
        }

        let lead = Lead::new(&email);
        match self.store.insert_lead(&lead).await {
            Ok(()) => {
                info!(lead = %lead.email, id = %lead.id, "New lead registered");
                Ok(lead)
            }
            Err(DatabaseError::Constraint(_)) => {
                debug!(lead = %email, "Lead created concurrently, re-reading");
                self.store
                    .get_lead_by_email(&email)
                    .await?
                    .ok_or(DatabaseError::NotFound {
                        entity: "lead".into(),
                        id: email,
                    })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        self.store.get_lead(id).await
    }

    /// Change a lead's lifecycle status.
    pub async fn set_status(&self, id: Uuid, status: LeadStatus) -> Result<(), DatabaseError> {
        self.store.update_lead_status(id, status).await?;
        info!(id = %id, status = %status, "Lead status changed");
        Ok(())
    }

    /// Remove every lead and its conversations. Returns the number of leads removed.
    pub async fn clear_all(&self) -> Result<usize, DatabaseError> {
        self.store.clear_leads().await
    }
}
