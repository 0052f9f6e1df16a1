// Organization cache: Redis-front read path for org records
//
// Trigger surfaces resolve the caller's organization on every request;
// a short-TTL JSON cache keeps that off Postgres.

use std::sync::Arc;
use std::time::Duration;

use bifrost_core::{Error, Result};
use bifrost_storage::{Database, OrganizationRow};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

fn org_cache_key(org_id: Uuid) -> String {
    format!("bifrost:org:{org_id}")
}

/// Cached projection of an organization row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedOrganization {
    pub id: Uuid,
    pub name: String,
}

impl From<OrganizationRow> for CachedOrganization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
        }
    }
}

pub struct OrgCache {
    db: Arc<Database>,
    redis: ConnectionManager,
    ttl: Duration,
}

impl OrgCache {
    pub fn new(db: Arc<Database>, redis: ConnectionManager, ttl: Duration) -> Self {
        Self { db, redis, ttl }
    }

    pub async fn get(&self, org_id: Uuid) -> Result<Option<CachedOrganization>> {
        let key = org_cache_key(org_id);

        let mut conn = self.redis.clone();
        let cached: Result<Option<String>> = conn
            .get(&key)
            .await
            .map_err(|e| Error::transient(format!("org cache read failed: {e}")));
        match cached {
            Ok(Some(raw)) => {
                if let Ok(org) = serde_json::from_str(&raw) {
                    return Ok(Some(org));
                }
            }
            Ok(None) => {}
            Err(e) => warn!(%org_id, error = %e, "org cache read failed"),
        }

        let Some(row) = self.db.get_organization(org_id).await? else {
            return Ok(None);
        };
        let org = CachedOrganization::from(row);

        if let Ok(payload) = serde_json::to_string(&org) {
            let filled: redis::RedisResult<()> = conn
                .set_ex(&key, payload, self.ttl.as_secs())
                .await;
            if let Err(e) = filled {
                warn!(%org_id, error = %e, "org cache fill failed");
            }
        }

        Ok(Some(org))
    }

    /// Drop a cached organization after a mutation.
    pub async fn invalidate(&self, org_id: Uuid) {
        let mut conn = self.redis.clone();
        let result: redis::RedisResult<()> = conn.del(org_cache_key(org_id)).await;
        if let Err(e) = result {
            warn!(%org_id, error = %e, "org cache invalidation failed");
        }
    }
}
