pub mod registry;
pub mod server;
pub mod session;
pub mod types;

pub use registry::SessionRegistry;
pub use server::{create_router, serve, start_server, AppState};
pub use types::{HealthResponse, RelaySettings};
