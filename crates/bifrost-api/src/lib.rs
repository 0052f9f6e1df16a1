// Control-plane service library
//
// The external HTTP/trigger surface consumes these services; the
// bifrost-api binary wires them to the process lifecycle.

pub mod services;

use bifrost_storage::Database;
use std::sync::Arc;

/// Long-lived service handles shared by the external trigger surface
pub struct AppState {
    pub db: Arc<Database>,
    pub dispatch: Arc<services::DispatchService>,
    pub auth: Arc<services::ExecutionAuthService>,
    pub config: Arc<services::ConfigResolver>,
}
