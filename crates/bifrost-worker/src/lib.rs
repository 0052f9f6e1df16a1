// Worker internals, exposed as a library for the binary and for tests

pub mod bootstrap;
pub mod consumer;
pub mod executor;
pub mod runtime;
pub mod sandbox;

pub use consumer::WorkerPool;
pub use executor::Executor;
pub use runtime::{PythonRuntime, RunOutput, RunRequest, ScriptRuntime};
pub use sandbox::Sandbox;
