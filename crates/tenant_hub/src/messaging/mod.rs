//! Message handling and routing.
//!
//! This module provides the wire format shared by the hub and its clients and
//! the routing of incoming frames into the hub's event handling.

pub mod router;
pub mod types;

pub use router::route_client_message;
pub use types::*;
