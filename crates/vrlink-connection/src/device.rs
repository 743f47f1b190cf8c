//! Per-device binding to a connection

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::TimeValue;
use crate::message::MessageType;

pub type ConnectionDevicePtr = Arc<ConnectionDevice>;

pub type MessageHandler = Box<dyn FnMut(&InboundMessage) + Send>;

/// Naming information for a device about to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInitObject {
    plugin: Option<String>,
    name: String,
}

impl DeviceInitObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            plugin: None,
            name: name.into(),
        }
    }

    /// A device owned by `plugin`; its qualified name is `plugin/name`
    pub fn with_plugin(plugin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            plugin: Some(plugin.into()),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    pub fn qualified_name(&self) -> String {
        match &self.plugin {
            Some(plugin) => format!("{}/{}", plugin, self.name),
            None => self.name.clone(),
        }
    }
}

impl From<&str> for DeviceInitObject {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for DeviceInitObject {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// A message received for one of this device's names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: String,
    pub message_type: MessageType,
    pub timestamp: TimeValue,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutboundMessage {
    pub message_type: MessageType,
    pub timestamp: TimeValue,
    pub payload: Vec<u8>,
}

/// Hook through which a device token takes part in connection processing
pub(crate) trait ConnectionInteract: Send + Sync {
    fn connection_interact(&self, device: &ConnectionDevice);
}

/// A device registered on a connection. Outbound messages queue here until
/// the connection flushes them; inbound messages queue until the device is
/// processed and are then handed to the registered handlers.
pub struct ConnectionDevice {
    names: Vec<String>,
    outbound: Mutex<Vec<OutboundMessage>>,
    inbound: Mutex<VecDeque<InboundMessage>>,
    handlers: Mutex<HashMap<MessageType, Vec<MessageHandler>>>,
    interactor: Mutex<Option<Weak<dyn ConnectionInteract>>>,
}

impl ConnectionDevice {
    /// Create a device answering to `names`; the first is its primary name
    /// and is used as the sender of outbound messages.
    pub fn new(names: Vec<String>) -> ConnectionDevicePtr {
        Arc::new(Self {
            names,
            outbound: Mutex::new(Vec::new()),
            inbound: Mutex::new(VecDeque::new()),
            handlers: Mutex::new(HashMap::new()),
            interactor: Mutex::new(None),
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or_default()
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Queue a message for the next flush
    pub fn send_data(&self, timestamp: TimeValue, message_type: MessageType, payload: &[u8]) {
        self.push_outbound(OutboundMessage {
            message_type,
            timestamp,
            payload: payload.to_vec(),
        });
    }

    /// Handlers run on the processing thread and must not register further
    /// handlers on the same device.
    pub fn register_message_handler<F>(&self, message_type: MessageType, handler: F)
    where
        F: FnMut(&InboundMessage) + Send + 'static,
    {
        self.handlers
            .lock()
            .entry(message_type)
            .or_default()
            .push(Box::new(handler));
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.lock().len()
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.lock().len()
    }

    /// Let the bound token send, if any. Only the owning connection calls
    /// this, once per tick.
    pub(crate) fn interact(&self) {
        let interactor = self.interactor.lock().as_ref().and_then(Weak::upgrade);
        if let Some(interactor) = interactor {
            interactor.connection_interact(self);
        }
    }

    /// Deliver queued inbound messages to their handlers
    pub(crate) fn dispatch_inbound(&self) {
        let messages: Vec<InboundMessage> = self.inbound.lock().drain(..).collect();
        if messages.is_empty() {
            return;
        }
        let mut handlers = self.handlers.lock();
        for message in &messages {
            match handlers.get_mut(&message.message_type) {
                Some(list) => list.iter_mut().for_each(|handler| handler(message)),
                None => trace!(
                    device = %self.name(),
                    message_type = message.message_type.id(),
                    "No handler for message"
                ),
            }
        }
    }

    pub(crate) fn set_interactor(&self, interactor: Weak<dyn ConnectionInteract>) {
        debug!(device = %self.name(), "Device token bound");
        *self.interactor.lock() = Some(interactor);
    }

    pub(crate) fn push_outbound(&self, message: OutboundMessage) {
        self.outbound.lock().push(message);
    }

    pub(crate) fn take_outbound(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.outbound.lock())
    }

    pub(crate) fn queue_inbound(&self, message: InboundMessage) {
        self.inbound.lock().push_back(message);
    }
}

impl std::fmt::Debug for ConnectionDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDevice")
            .field("names", &self.names)
            .field("pending_outbound", &self.pending_outbound())
            .field("pending_inbound", &self.pending_inbound())
            .finish()
    }
}
