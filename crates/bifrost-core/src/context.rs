// Execution context handed across the Redis boundary
//
// A plain serializable struct: dispatch writes it under
// `bifrost:exec:{id}:context`, the worker hydrates it before running.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity snapshot of whoever triggered the execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: Option<Uuid>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub is_platform_admin: bool,
    /// Set when the trigger authenticated with a workflow API key
    pub api_key_id: Option<Uuid>,
}

/// Full pending-execution context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    /// None for inline-script executions
    pub workflow_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub caller: CallerIdentity,
    pub parameters: serde_json::Value,
    /// Form that triggered the execution, if any
    pub form_id: Option<Uuid>,
    /// Launch-workflow results carried into the execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<serde_json::Value>,
}

impl ExecutionContext {
    pub fn new(execution_id: Uuid, workflow_id: Option<Uuid>) -> Self {
        Self {
            execution_id,
            workflow_id,
            organization_id: None,
            caller: CallerIdentity::default(),
            parameters: serde_json::Value::Object(Default::default()),
            form_id: None,
            startup: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_round_trips_through_json() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), Some(Uuid::new_v4()));
        ctx.parameters = serde_json::json!({"x": "a"});
        let encoded = serde_json::to_string(&ctx).unwrap();
        let decoded: ExecutionContext = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.execution_id, ctx.execution_id);
        assert_eq!(decoded.workflow_id, ctx.workflow_id);
        assert_eq!(decoded.parameters, ctx.parameters);
    }

    #[test]
    fn startup_is_omitted_when_absent() {
        let ctx = ExecutionContext::new(Uuid::new_v4(), None);
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("startup").is_none());
    }
}
