//! WebSocket server: the accept loop and the per-connection handler.

pub mod core;
pub mod handlers;

pub use self::core::HubServer;
