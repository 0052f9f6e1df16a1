// Entity DTOs: workflows, tools and data providers discovered in the workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a decorated declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Workflow,
    Tool,
    DataProvider,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Workflow => "workflow",
            EntityType::Tool => "tool",
            EntityType::DataProvider => "data_provider",
        }
    }

    /// Decorator name in user source for this entity type
    pub fn decorator(&self) -> &'static str {
        self.as_str()
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow" => Ok(EntityType::Workflow),
            "tool" => Ok(EntityType::Tool),
            "data_provider" => Ok(EntityType::DataProvider),
            other => Err(format!("unknown entity type '{other}'")),
        }
    }
}

/// Who may reach an entity through its endpoint/form surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Role,
    Authenticated,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Role => "role",
            AccessLevel::Authenticated => "authenticated",
        }
    }
}

/// A registered entity as exposed to collaborating subsystems
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub name: String,
    pub entity_type: EntityType,
    pub function_name: String,
    pub path: String,
    /// None = global scope
    pub organization_id: Option<Uuid>,
    pub is_active: bool,
    pub endpoint_enabled: bool,
    pub schedule: Option<String>,
    pub access_level: AccessLevel,
    pub parameters_schema: serde_json::Value,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_matches_decorator_names() {
        assert_eq!(EntityType::Workflow.decorator(), "workflow");
        assert_eq!(EntityType::DataProvider.decorator(), "data_provider");
        assert_eq!("tool".parse::<EntityType>().unwrap(), EntityType::Tool);
        assert!("widget".parse::<EntityType>().is_err());
    }
}
