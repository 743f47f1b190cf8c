//! Error types for connections, transports and device tokens

use thiserror::Error;
use vrlink_core::WireError;

use crate::token::ObjectHandle;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Invalid interface address: {0}")]
    InvalidInterface(String),
    #[error("Invalid port: {0}")]
    InvalidPort(u16),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Device {0} has been stopped")]
    Stopped(String),
    #[error("Unknown object handle {0:?}")]
    UnknownObject(ObjectHandle),
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Serialization failed: {0}")]
    Wire(#[from] WireError),
}
