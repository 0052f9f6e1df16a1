// Per-path workspace cache entries (loop suppression state)

use serde::{Deserialize, Serialize};

/// State stored per path in the `workspace:cache` Redis hash.
///
/// Written immediately BEFORE the underlying mutation, by both the origin
/// node and every subscriber, so a watcher observing the mutation can
/// recognize it as already-known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hex SHA-256 of the content; None for folders and deletions
    pub hash: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl CacheEntry {
    pub fn live(hash: impl Into<String>) -> Self {
        Self {
            hash: Some(hash.into()),
            is_deleted: false,
        }
    }

    pub fn folder() -> Self {
        Self {
            hash: None,
            is_deleted: false,
        }
    }

    pub fn deleted() -> Self {
        Self {
            hash: None,
            is_deleted: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips() {
        let entry = CacheEntry::live("abc123");
        let raw = serde_json::to_string(&entry).unwrap();
        assert_eq!(serde_json::from_str::<CacheEntry>(&raw).unwrap(), entry);
    }

    #[test]
    fn is_deleted_defaults_false() {
        let entry: CacheEntry = serde_json::from_str(r#"{"hash": "ff"}"#).unwrap();
        assert!(!entry.is_deleted);
    }
}
