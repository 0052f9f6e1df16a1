// Multi-tenant scope: global (organization null) or a specific organization

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scope of a namespaced entity or config key.
///
/// "Org wins over global" is decided by callers issuing the org-scoped
/// query first; this type only names the two tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Org(Uuid),
}

impl Scope {
    pub fn from_org(org_id: Option<Uuid>) -> Self {
        match org_id {
            Some(id) => Scope::Org(id),
            None => Scope::Global,
        }
    }

    pub fn org_id(&self) -> Option<Uuid> {
        match self {
            Scope::Global => None,
            Scope::Org(id) => Some(*id),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }

    /// Segment used in Redis cache keys, e.g. `bifrost:config:{scope}`
    pub fn cache_segment(&self) -> String {
        match self {
            Scope::Global => "global".to_string(),
            Scope::Org(id) => id.to_string(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cache_segment())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_segment_is_global_or_uuid() {
        assert_eq!(Scope::Global.cache_segment(), "global");
        let id = Uuid::new_v4();
        assert_eq!(Scope::Org(id).cache_segment(), id.to_string());
    }

    #[test]
    fn from_org_round_trips() {
        let id = Uuid::new_v4();
        assert_eq!(Scope::from_org(Some(id)).org_id(), Some(id));
        assert_eq!(Scope::from_org(None), Scope::Global);
    }
}
