pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod server;
pub mod uploads;

pub use config::ServerConfig;
pub use error::ServerError;
pub use hub::{Hub, HubCommand, HubHandle};
pub use server::{build_router, start, AppState, ServerHandle};
