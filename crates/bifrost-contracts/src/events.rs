// Workspace sync events carried on the `bifrost:workspace:sync` channel
//
// Ordering between messages is not guaranteed; each event names a single
// path and carries enough state for idempotent application. Unknown event
// tags fail deserialization instead of being silently dropped.

use serde::{Deserialize, Serialize};

/// A workspace change event, tagged by `event` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkspaceEvent {
    WorkspaceFileWrite {
        path: String,
        /// Base64-encoded file bytes
        content_b64: String,
        /// Hex SHA-256 of the decoded bytes
        content_hash: String,
    },
    WorkspaceFileDelete {
        path: String,
    },
    /// Optional; subscribers may apply as delete(old) + write(new)
    WorkspaceFileRename {
        old_path: String,
        new_path: String,
    },
    WorkspaceFolderCreate {
        path: String,
    },
    WorkspaceFolderDelete {
        path: String,
    },
}

impl WorkspaceEvent {
    /// The path this event primarily concerns (new path for renames)
    pub fn path(&self) -> &str {
        match self {
            WorkspaceEvent::WorkspaceFileWrite { path, .. } => path,
            WorkspaceEvent::WorkspaceFileDelete { path } => path,
            WorkspaceEvent::WorkspaceFileRename { new_path, .. } => new_path,
            WorkspaceEvent::WorkspaceFolderCreate { path } => path,
            WorkspaceEvent::WorkspaceFolderDelete { path } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_event_wire_shape() {
        let event = WorkspaceEvent::WorkspaceFileWrite {
            path: "workflows/x.py".into(),
            content_b64: "QQ==".into(),
            content_hash: "559aead08264d5795d3909718cdd05abd49572e84fe55590eef31a88a08fdffd".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "workspace_file_write");
        assert_eq!(json["path"], "workflows/x.py");
        assert_eq!(json["content_b64"], "QQ==");
    }

    #[test]
    fn delete_and_folder_events_round_trip() {
        for event in [
            WorkspaceEvent::WorkspaceFileDelete {
                path: "a.py".into(),
            },
            WorkspaceEvent::WorkspaceFolderCreate {
                path: "pkg/".into(),
            },
            WorkspaceEvent::WorkspaceFolderDelete {
                path: "pkg/".into(),
            },
            WorkspaceEvent::WorkspaceFileRename {
                old_path: "a.py".into(),
                new_path: "b.py".into(),
            },
        ] {
            let encoded = serde_json::to_string(&event).unwrap();
            let decoded: WorkspaceEvent = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn unknown_event_tag_is_rejected() {
        let raw = r#"{"event": "workspace_total_wipe", "path": "x"}"#;
        assert!(serde_json::from_str::<WorkspaceEvent>(raw).is_err());
    }
}
