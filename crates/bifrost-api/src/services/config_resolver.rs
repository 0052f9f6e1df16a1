// Configuration resolver with transparent secret handling
//
// Two tiers: a per-scope Redis hash first, Postgres on miss (filling the
// hash with a TTL on the way out). Secret values stay encrypted in both
// tiers and in the map handed to callers; only `get` decrypts. A stale
// cache can therefore never leak cleartext.

use std::collections::HashMap;
use std::time::Duration;

use bifrost_core::config::{parse_value, ConfigEntry, ConfigType, ConfigValue};
use bifrost_core::settings::config_cache_key;
use bifrost_core::{Error, Result, Scope};
use bifrost_storage::{Database, EncryptionService, UpsertConfig};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ConfigResolver {
    db: Arc<Database>,
    redis: ConnectionManager,
    encryption: EncryptionService,
    cache_ttl: Duration,
}

impl ConfigResolver {
    pub fn new(
        db: Arc<Database>,
        redis: ConnectionManager,
        encryption: EncryptionService,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            db,
            redis,
            encryption,
            cache_ttl,
        }
    }

    /// Full {key -> entry} map for a scope: global entries overlaid with
    /// the scope's own. Secrets remain ciphertext in the returned map.
    pub async fn load_scope(&self, scope: Scope) -> Result<HashMap<String, ConfigEntry>> {
        let cache_key = config_cache_key(&scope.cache_segment());

        match self.read_cache(&cache_key).await {
            Ok(Some(cached)) => {
                debug!(scope = %scope, entries = cached.len(), "config cache hit");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => warn!(scope = %scope, error = %e, "config cache read failed"),
        }

        // Rows come ordered global-first, so inserting in order makes the
        // org entry win on key collision.
        let rows = self.db.list_config_for_scope(scope.org_id()).await?;
        let mut map = HashMap::new();
        for row in rows {
            let config_type: ConfigType = row.config_type.parse()?;
            map.insert(
                row.key,
                ConfigEntry {
                    value: row.value,
                    config_type,
                },
            );
        }

        self.fill_cache(&cache_key, &map).await;
        Ok(map)
    }

    /// Typed lookup in a loaded scope map. Secrets decrypt here and only
    /// here; parse rules follow the declared type.
    pub async fn get(
        &self,
        scope: Scope,
        key: &str,
        data: &HashMap<String, ConfigEntry>,
        default: Option<ConfigValue>,
    ) -> Result<ConfigValue> {
        let Some(entry) = data.get(key) else {
            return match default {
                Some(value) => Ok(value),
                None => Err(Error::not_found(format!(
                    "configuration key '{key}' not found for scope '{scope}'"
                ))),
            };
        };

        if entry.config_type == ConfigType::Secret {
            let cleartext = self.encryption.decrypt(&entry.value).map_err(|e| {
                Error::decryption(format!("failed to decrypt secret config '{key}': {e}"))
            })?;
            return Ok(ConfigValue::String(cleartext));
        }

        parse_value(&entry.value, entry.config_type)
    }

    /// Store a config entry, encrypting secrets before they touch any
    /// tier, and drop the scope's cache hash.
    pub async fn set(
        &self,
        scope: Scope,
        key: &str,
        value: &str,
        config_type: ConfigType,
        description: Option<String>,
    ) -> Result<()> {
        let stored_value = if config_type == ConfigType::Secret {
            self.encryption.encrypt(value)?
        } else {
            value.to_string()
        };

        self.db
            .upsert_config(UpsertConfig {
                key: key.to_string(),
                value: stored_value,
                config_type: config_type.as_str().to_string(),
                description,
                organization_id: scope.org_id(),
            })
            .await?;

        self.invalidate(scope).await;
        Ok(())
    }

    pub async fn delete(&self, scope: Scope, key: &str) -> Result<bool> {
        let removed = self.db.delete_config(key, scope.org_id()).await?;
        self.invalidate(scope).await;
        Ok(removed)
    }

    /// Drop a scope's cache hash; next load repopulates from Postgres.
    pub async fn invalidate(&self, scope: Scope) {
        let mut conn = self.redis.clone();
        let result: redis::RedisResult<()> =
            conn.del(config_cache_key(&scope.cache_segment())).await;
        if let Err(e) = result {
            warn!(scope = %scope, error = %e, "config cache invalidation failed");
        }
    }

    async fn read_cache(&self, cache_key: &str) -> Result<Option<HashMap<String, ConfigEntry>>> {
        let mut conn = self.redis.clone();
        let raw: HashMap<String, String> = conn
            .hgetall(cache_key)
            .await
            .map_err(|e| Error::transient(format!("config cache read failed: {e}")))?;

        if raw.is_empty() {
            return Ok(None);
        }

        let mut map = HashMap::new();
        for (key, payload) in raw {
            match serde_json::from_str::<ConfigEntry>(&payload) {
                Ok(entry) => {
                    map.insert(key, entry);
                }
                Err(_) => {
                    // A malformed hash means a foreign writer; fall back
                    // to the authoritative store.
                    return Ok(None);
                }
            }
        }
        Ok(Some(map))
    }

    async fn fill_cache(&self, cache_key: &str, map: &HashMap<String, ConfigEntry>) {
        if map.is_empty() {
            return;
        }

        let mut conn = self.redis.clone();
        let pairs: Vec<(String, String)> = map
            .iter()
            .filter_map(|(k, v)| serde_json::to_string(v).ok().map(|p| (k.clone(), p)))
            .collect();

        let result: redis::RedisResult<()> = conn.hset_multiple(cache_key, &pairs).await;
        if let Err(e) = result {
            warn!(error = %e, "config cache fill failed");
            return;
        }

        let ttl = self.cache_ttl.as_secs() as i64;
        let result: redis::RedisResult<()> = conn.expire(cache_key, ttl).await;
        if let Err(e) = result {
            warn!(error = %e, "config cache expire failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scope-merge precedence is plain map-insert ordering; exercise it
    // the way load_scope builds the map.
    #[test]
    fn org_entries_override_global_on_collision() {
        let mut map: HashMap<String, ConfigEntry> = HashMap::new();
        // Global first...
        map.insert(
            "retries".into(),
            ConfigEntry {
                value: "3".into(),
                config_type: ConfigType::Int,
            },
        );
        map.insert(
            "endpoint".into(),
            ConfigEntry {
                value: "https://global.example".into(),
                config_type: ConfigType::String,
            },
        );
        // ...then the org overlay.
        map.insert(
            "retries".into(),
            ConfigEntry {
                value: "5".into(),
                config_type: ConfigType::Int,
            },
        );

        assert_eq!(map["retries"].value, "5");
        assert_eq!(map["endpoint"].value, "https://global.example");
    }
}
