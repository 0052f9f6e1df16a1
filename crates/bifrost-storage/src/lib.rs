// Postgres storage layer with sqlx

pub mod access_store;
pub mod config_store;
pub mod encryption;
pub mod entity_store;
pub mod execution_store;
pub mod file_store;
pub mod models;
pub mod org_store;
pub mod repositories;

pub use encryption::{generate_encryption_key, EncryptionService};
pub use models::*;
pub use repositories::Database;
