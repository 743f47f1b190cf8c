//! Connection: message types, devices and the per-tick transport pump

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::device::{ConnectionDevice, ConnectionDevicePtr, DeviceInitObject, InboundMessage};
use crate::error::ConnectionError;
use crate::message::{MessageType, MessageTypeRegistry};
use crate::transport::{Endpoint, Frame, LoopbackHub, Transport, TransportEvent, TransportFactory};

/// Default listening port
pub const DEFAULT_PORT: u16 = 3883;

type Handler = Box<dyn FnMut() + Send>;

/// Mediates message-type registration and transport pumping for a set of
/// devices. Driven from a single thread by calling [`Connection::process`].
pub struct Connection {
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    registry: MessageTypeRegistry,
    devices: Vec<ConnectionDevicePtr>,
    connection_handlers: Vec<Handler>,
    descriptor_handlers: Vec<Handler>,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            clock: Arc::new(SystemClock),
            registry: MessageTypeRegistry::new(),
            devices: Vec::new(),
            connection_handlers: Vec::new(),
            descriptor_handlers: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open a connection listening on `interface`:`port`. The interface
    /// defaults to all addresses and the port to [`DEFAULT_PORT`].
    pub fn create_shared(
        interface: Option<&str>,
        port: Option<u16>,
        factory: &dyn TransportFactory,
    ) -> Result<Self, ConnectionError> {
        let address: IpAddr = match interface {
            Some(iface) => iface
                .parse()
                .map_err(|_| ConnectionError::InvalidInterface(iface.to_string()))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port = port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(ConnectionError::InvalidPort(port));
        }
        let endpoint = Endpoint::new(address, port);
        let transport = factory.open(&endpoint)?;
        debug!(interface = %address, port = port, kind = transport.kind(), "Opened connection");
        Ok(Self::new(transport))
    }

    /// Open a connection reachable from this host only
    pub fn create_local(factory: &dyn TransportFactory) -> Result<Self, ConnectionError> {
        Self::create_shared(Some("127.0.0.1"), None, factory)
    }

    /// Two connections joined by a fresh loopback hub
    pub fn create_loopback_pair() -> (Self, Self) {
        let hub = LoopbackHub::new();
        (
            Self::new(Box::new(hub.attach())),
            Self::new(Box::new(hub.attach())),
        )
    }

    pub fn kind(&self) -> &'static str {
        self.transport.kind()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Register a message identifier. Registering the same identifier again
    /// returns the same type.
    pub fn register_message_type(&mut self, id: &str) -> MessageType {
        self.registry.register(id)
    }

    pub fn message_type_name(&self, message_type: MessageType) -> Option<&str> {
        self.registry.name(message_type)
    }

    /// Create a device and append it to the processing order
    pub fn create_connection_device(
        &mut self,
        init: impl Into<DeviceInitObject>,
    ) -> ConnectionDevicePtr {
        let init = init.into();
        let device = ConnectionDevice::new(vec![init.qualified_name()]);
        self.add_device(Arc::clone(&device));
        device
    }

    /// Append an externally constructed device
    pub fn add_device(&mut self, device: ConnectionDevicePtr) {
        match device.names() {
            [name] => debug!(device = %name, "Added device"),
            names => debug!(names = ?names, "Added device with names"),
        }
        self.devices.push(device);
    }

    pub fn devices(&self) -> &[ConnectionDevicePtr] {
        &self.devices
    }

    /// Called whenever a new peer connects
    pub fn register_connection_handler<F>(&mut self, handler: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.connection_handlers.push(Box::new(handler));
    }

    pub fn register_descriptor_handler<F>(&mut self, handler: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.descriptor_handlers.push(Box::new(handler));
    }

    /// Fire every descriptor handler now
    pub fn trigger_descriptor_handlers(&mut self) {
        for handler in &mut self.descriptor_handlers {
            handler();
        }
    }

    /// Pump the transport once, then process every device in registration
    /// order: token interaction, outbound flush, inbound dispatch. Never
    /// blocks.
    pub fn process(&mut self) {
        for event in self.transport.mainloop() {
            match event {
                TransportEvent::PeerConnected => {
                    debug!(kind = self.transport.kind(), "Peer connected");
                    for handler in &mut self.connection_handlers {
                        handler();
                    }
                }
                TransportEvent::Message(frame) => self.route_inbound(frame),
            }
        }

        for device in &self.devices {
            device.interact();
            for message in device.take_outbound() {
                let Some(message_type) = self.registry.name(message.message_type) else {
                    warn!(
                        device = %device.name(),
                        message_type = message.message_type.id(),
                        "Dropping message of unregistered type"
                    );
                    continue;
                };
                let frame = Frame {
                    sender: device.name().to_string(),
                    message_type: message_type.to_string(),
                    timestamp: message.timestamp,
                    payload: message.payload,
                };
                if let Err(err) = self.transport.send(frame) {
                    warn!(device = %device.name(), error = %err, "Send failed");
                }
            }
            device.dispatch_inbound();
        }
    }

    fn route_inbound(&mut self, frame: Frame) {
        let Some(message_type) = self.registry.lookup(&frame.message_type) else {
            trace!(message_type = %frame.message_type, "Ignoring unregistered message type");
            return;
        };
        let mut delivered = false;
        for device in self.devices.iter().filter(|d| d.has_name(&frame.sender)) {
            device.queue_inbound(InboundMessage {
                sender: frame.sender.clone(),
                message_type,
                timestamp: frame.timestamp,
                payload: frame.payload.clone(),
            });
            delivered = true;
        }
        if !delivered {
            trace!(sender = %frame.sender, "No local device for sender");
        }
    }
}
