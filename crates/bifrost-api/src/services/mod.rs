// Control-plane services

pub mod access_sync;
pub mod config_resolver;
pub mod dispatch;
pub mod execution_auth;
pub mod org_cache;

pub use access_sync::{AccessSyncService, SourceType, SourceWorkflowRefs};
pub use config_resolver::ConfigResolver;
pub use dispatch::{DispatchOutcome, DispatchService, MqPublisher};
pub use execution_auth::ExecutionAuthService;
pub use org_cache::OrgCache;
