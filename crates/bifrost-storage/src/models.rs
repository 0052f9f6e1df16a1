// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Organizations
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct OrganizationRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Entities (workflow / tool / data_provider)
// ============================================

/// Entity row from database
#[derive(Debug, Clone, FromRow)]
pub struct EntityRow {
    pub id: Uuid,
    pub name: String,
    pub entity_type: String,
    pub function_name: String,
    pub path: String,
    pub organization_id: Option<Uuid>,
    pub integration_id: Option<Uuid>,
    pub is_active: bool,
    pub endpoint_enabled: bool,
    pub schedule: Option<String>,
    pub access_level: String,
    pub parameters_schema: sqlx::types::JsonValue,
    pub category: Option<String>,
    pub tags: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRow {
    /// Project onto the boundary DTO handed to collaborating subsystems.
    pub fn to_entity(&self) -> bifrost_contracts::Entity {
        bifrost_contracts::Entity {
            id: self.id,
            name: self.name.clone(),
            entity_type: self
                .entity_type
                .parse()
                .unwrap_or(bifrost_contracts::EntityType::Workflow),
            function_name: self.function_name.clone(),
            path: self.path.clone(),
            organization_id: self.organization_id,
            is_active: self.is_active,
            endpoint_enabled: self.endpoint_enabled,
            schedule: self.schedule.clone(),
            access_level: match self.access_level.as_str() {
                "authenticated" => bifrost_contracts::AccessLevel::Authenticated,
                _ => bifrost_contracts::AccessLevel::Role,
            },
            parameters_schema: self.parameters_schema.clone(),
            tags: serde_json::from_value(self.tags.clone()).unwrap_or_default(),
            category: self.category.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Input for upserting an entity discovered in the workspace.
/// `id` is the UUID carried by the source decorator, when present.
#[derive(Debug, Clone)]
pub struct UpsertEntity {
    pub id: Option<Uuid>,
    pub name: String,
    pub entity_type: String,
    pub function_name: String,
    pub path: String,
    pub organization_id: Option<Uuid>,
    pub endpoint_enabled: bool,
    pub schedule: Option<String>,
    pub access_level: String,
    pub parameters_schema: serde_json::Value,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// Filters for entity listings
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub entity_type: Option<String>,
    pub active_only: bool,
    /// Platform-admin relaxation: ignore org scoping entirely
    pub include_all_orgs: bool,
    pub category: Option<String>,
}

// ============================================
// Configuration
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ConfigRow {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    pub config_type: String,
    pub description: Option<String>,
    pub organization_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating/updating a config entry.
/// Secret values must already be encrypted by the caller.
#[derive(Debug, Clone)]
pub struct UpsertConfig {
    pub key: String,
    pub value: String,
    pub config_type: String,
    pub description: Option<String>,
    pub organization_id: Option<Uuid>,
}

// ============================================
// Workspace file index
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WorkspaceFileRow {
    pub path: String,
    pub content: Vec<u8>,
    pub content_hash: String,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing row without the bytes
#[derive(Debug, Clone, FromRow)]
pub struct WorkspaceFileMeta {
    pub path: String,
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Executions
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub script_name: Option<String>,
    pub status: String,
    pub parameters: sqlx::types::JsonValue,
    pub organization_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub form_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub peak_memory_kb: Option<i64>,
    pub cpu_seconds: Option<f64>,
    pub result: Option<sqlx::types::JsonValue>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub logs: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a pending execution
#[derive(Debug, Clone)]
pub struct CreateExecution {
    pub id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub script_name: Option<String>,
    pub parameters: serde_json::Value,
    pub organization_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub form_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
}

// ============================================
// Workflow access (precomputed authorization)
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowAccessRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub principal_type: String,
    pub role_id: Option<Uuid>,
    pub source_type: String,
    pub source_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A user-selector a source entity grants: either any authenticated user
/// in scope, or holders of a specific role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessPrincipal {
    Authenticated,
    Role(Uuid),
}

impl AccessPrincipal {
    pub fn principal_type(&self) -> &'static str {
        match self {
            AccessPrincipal::Authenticated => "authenticated",
            AccessPrincipal::Role(_) => "role",
        }
    }

    pub fn role_id(&self) -> Option<Uuid> {
        match self {
            AccessPrincipal::Authenticated => None,
            AccessPrincipal::Role(id) => Some(*id),
        }
    }
}

/// One desired access tuple for a source entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessGrant {
    pub workflow_id: Uuid,
    pub principal: AccessPrincipal,
}
