// Core domain types shared by every Bifrost crate

pub mod config;
pub mod context;
pub mod error;
pub mod scope;
pub mod settings;

pub use config::{ConfigEntry, ConfigType, ConfigValue};
pub use context::{CallerIdentity, ExecutionContext};
pub use error::{Error, Result};
pub use scope::Scope;
pub use settings::Settings;
