// Workspace plane: cluster-coherent view of the authored file tree
//
// Postgres owns canonical bytes, S3 mirrors them for out-of-process
// consumers, Redis carries the loop-suppression cache and the sync
// channel, local disk is the working copy every node executes from.

pub mod cache;
pub mod discovery;
pub mod file_index;
pub mod filter;
pub mod mirror;
pub mod modules;
pub mod pubsub;
pub mod redis_conn;
pub mod rewriter;
pub mod sync;
pub mod watcher;

pub use cache::WorkspaceCache;
pub use discovery::{DiscoveryService, ReindexReport};
pub use file_index::{sha256_hex, FileIndexStore};
pub use filter::PathFilter;
pub use mirror::S3Mirror;
pub use modules::{ModuleCacheStore, ModuleResolution};
pub use pubsub::SyncBus;
pub use rewriter::{
    inject_ids, read_decorators, write_properties, DecoratorInfo, PropertyValue,
};
pub use sync::WorkspaceSyncService;
pub use watcher::WorkspaceWatcher;
