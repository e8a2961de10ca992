pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::{ClientRegistry, DisconnectReason};
pub use config::{ConfigError, ServerConfig};
pub use protocol::{ClientEvent, ServerEvent};
pub use server::{build_router, start, AppState, ServerError, ServerHandle};
pub use session::{CoordinatorConfig, SessionCoordinator};
