// Messages on the `workflow-executions` queue
//
// Minimal by design: the worker reads the full context from Redis. The
// presence of `code` marks an inline-script execution.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionQueueMessage {
    pub execution_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    /// Base64-encoded inline script, mutually exclusive with workflow_id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,
    #[serde(default)]
    pub sync: bool,
}

impl ExecutionQueueMessage {
    pub fn for_workflow(execution_id: Uuid, workflow_id: Uuid, sync: bool) -> Self {
        Self {
            execution_id,
            workflow_id: Some(workflow_id),
            code: None,
            script_name: None,
            sync,
        }
    }

    pub fn for_code(execution_id: Uuid, script_name: String, code_b64: String, sync: bool) -> Self {
        Self {
            execution_id,
            workflow_id: None,
            code: Some(code_b64),
            script_name: Some(script_name),
            sync,
        }
    }

    pub fn is_inline_code(&self) -> bool {
        self.code.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_message_omits_code_fields() {
        let msg = ExecutionQueueMessage::for_workflow(Uuid::new_v4(), Uuid::new_v4(), true);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("code").is_none());
        assert!(json.get("script_name").is_none());
        assert_eq!(json["sync"], true);
    }

    #[test]
    fn code_message_is_inline() {
        let msg = ExecutionQueueMessage::for_code(
            Uuid::new_v4(),
            "adhoc.py".into(),
            "cHJpbnQoMSk=".into(),
            false,
        );
        assert!(msg.is_inline_code());
        assert!(msg.workflow_id.is_none());
    }
}
