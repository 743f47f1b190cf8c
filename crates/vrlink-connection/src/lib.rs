//! VRLink Connection - Message transport and device tokens
//!
//! This crate multiplexes producer devices onto a shared transport:
//! - `Connection` registers message types and devices and pumps the transport
//! - `DeviceToken` binds a producer to its `ConnectionDevice`, either polled
//!   on the processing thread (sync) or running its own worker thread (async)
//! - `LoopbackHub` is an in-process transport for tests and local use

pub mod clock;
pub mod connection;
pub mod device;
pub mod error;
pub mod message;
pub mod token;
pub mod transport;

pub use clock::{Clock, FixedClock, SystemClock, TimeValue};
pub use connection::{Connection, DEFAULT_PORT};
pub use device::{ConnectionDevice, ConnectionDevicePtr, DeviceInitObject, InboundMessage};
pub use error::{ConnectionError, TokenError, TransportError};
pub use message::{MessageType, MessageTypeRegistry};
pub use token::{
    AsyncDeviceWait, AsyncSender, DeviceToken, ObjectHandle, SendGuard, SyncDeviceUpdate,
    SyncSender,
};
pub use transport::{Endpoint, Frame, LoopbackHub, Transport, TransportEvent, TransportFactory};
