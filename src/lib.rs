//! jsongate: JSON-RPC over HTTP with cookie-backed sessions and per-method privilege levels.

pub mod error;
pub mod config;
pub mod identity;
pub mod rpc;
pub mod events;
pub mod server;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use server::Gateway;
