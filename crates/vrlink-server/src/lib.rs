//! VRLink Server - Shared path tree over a connection
//!
//! The server owns the authoritative path tree and route list and
//! broadcasts them to clients through a system device; clients keep a
//! replica and resolve logical paths against it.

pub mod client;
pub mod error;
pub mod messages;
pub mod server;

pub use client::{ClientContext, InterfaceHandle};
pub use error::ServerError;
pub use messages::{RoutesUpdate, TreeUpdate, SYSTEM_DEVICE_NAME};
pub use server::Server;
