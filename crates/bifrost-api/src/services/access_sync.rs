// Workflow-access derivation
//
// The form and app subsystems call this whenever a referencing entity is
// created, updated or published. The delta commits inside the caller's
// transaction, so the precomputed table can never disagree with the
// mutation that produced it.

use bifrost_core::Result;
use bifrost_storage::{AccessGrant, AccessPrincipal, Database};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Form,
    App,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Form => "form",
            SourceType::App => "app",
        }
    }
}

/// A source entity's current outgoing workflow references.
#[derive(Debug, Clone)]
pub struct SourceWorkflowRefs {
    pub source_type: SourceType,
    pub source_id: Uuid,
    pub organization_id: Option<Uuid>,
    /// Every workflow the source reaches (submit, launch, per-field
    /// data providers, page/component workflows, ...)
    pub workflow_ids: Vec<Uuid>,
    /// Role grants the source expresses; empty plus `authenticated`
    /// false means nobody gains access through this source.
    pub role_ids: Vec<Uuid>,
    /// Whether any authenticated user in scope may invoke
    pub authenticated: bool,
}

impl SourceWorkflowRefs {
    /// Expand references into the desired (workflow, principal) tuples.
    pub fn grants(&self) -> Vec<AccessGrant> {
        let mut grants = Vec::new();
        for workflow_id in &self.workflow_ids {
            if self.authenticated {
                grants.push(AccessGrant {
                    workflow_id: *workflow_id,
                    principal: AccessPrincipal::Authenticated,
                });
            }
            for role_id in &self.role_ids {
                grants.push(AccessGrant {
                    workflow_id: *workflow_id,
                    principal: AccessPrincipal::Role(*role_id),
                });
            }
        }
        grants
    }
}

pub struct AccessSyncService {
    db: Arc<Database>,
}

impl AccessSyncService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Rebuild a source entity's rows inside the caller's transaction.
    pub async fn rebuild(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        refs: &SourceWorkflowRefs,
    ) -> Result<()> {
        let desired = refs.grants();
        let (added, removed) = self
            .db
            .replace_access_for_source(
                tx,
                refs.source_type.as_str(),
                refs.source_id,
                refs.organization_id,
                &desired,
            )
            .await?;

        if added > 0 || removed > 0 {
            info!(
                source = refs.source_type.as_str(),
                source_id = %refs.source_id,
                added,
                removed,
                "workflow access rebuilt"
            );
        }
        Ok(())
    }

    /// Remove every row a deleted source contributed.
    pub async fn clear(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        source_type: SourceType,
        source_id: Uuid,
    ) -> Result<u64> {
        self.db
            .clear_access_for_source(tx, source_type.as_str(), source_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_cross_workflows_with_principals() {
        let w1 = Uuid::new_v4();
        let w2 = Uuid::new_v4();
        let r1 = Uuid::new_v4();

        let refs = SourceWorkflowRefs {
            source_type: SourceType::Form,
            source_id: Uuid::new_v4(),
            organization_id: Some(Uuid::new_v4()),
            workflow_ids: vec![w1, w2],
            role_ids: vec![r1],
            authenticated: true,
        };

        let grants = refs.grants();
        assert_eq!(grants.len(), 4);
        assert!(grants.contains(&AccessGrant {
            workflow_id: w1,
            principal: AccessPrincipal::Authenticated
        }));
        assert!(grants.contains(&AccessGrant {
            workflow_id: w2,
            principal: AccessPrincipal::Role(r1)
        }));
    }

    #[test]
    fn no_principals_means_no_grants() {
        let refs = SourceWorkflowRefs {
            source_type: SourceType::App,
            source_id: Uuid::new_v4(),
            organization_id: None,
            workflow_ids: vec![Uuid::new_v4()],
            role_ids: vec![],
            authenticated: false,
        };
        assert!(refs.grants().is_empty());
    }
}
