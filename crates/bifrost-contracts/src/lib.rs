// Public contracts crossing the Redis/RabbitMQ boundaries
// This crate defines workspace sync events, queue messages and execution payloads

pub mod entity;
pub mod events;
pub mod execution;
pub mod queue;
pub mod state;

pub use entity::*;
pub use events::*;
pub use execution::*;
pub use queue::*;
pub use state::*;
