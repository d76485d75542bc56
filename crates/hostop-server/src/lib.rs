//! HTTP and WebSocket front end plus the device socket listener.

pub mod devices;
pub mod error;
pub mod handlers;
pub mod server;
pub mod shutdown;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use shutdown::ShutdownCoordinator;
