//! Transport abstraction and the in-process loopback transport

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::TimeValue;
use crate::error::TransportError;

/// A message as carried by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Name of the sending device
    pub sender: String,
    /// Message identifier string
    pub message_type: String,
    pub timestamp: TimeValue,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A new peer attached
    PeerConnected,
    Message(Frame),
}

/// Address a transport listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub interface: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(interface: IpAddr, port: u16) -> Self {
        Self { interface, port }
    }

    pub fn localhost(port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }
}

/// Message pump underneath a `Connection`
pub trait Transport: Send {
    /// Short identifier of the transport implementation
    fn kind(&self) -> &'static str;

    /// Collect everything that arrived since the last call. Never blocks.
    fn mainloop(&mut self) -> Vec<TransportEvent>;

    fn send(&mut self, frame: Frame) -> Result<(), TransportError>;
}

pub trait TransportFactory {
    fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, TransportError>;
}

struct HubEndpoint {
    id: u64,
    sender: Sender<TransportEvent>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    endpoints: Vec<HubEndpoint>,
}

/// In-process message bus. Every attached transport receives the frames
/// sent by every other one.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint. Existing endpoints see `PeerConnected`, and
    /// the new endpoint sees one `PeerConnected` per existing endpoint.
    pub fn attach(&self) -> LoopbackTransport {
        let (sender, inbox) = unbounded();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        for endpoint in &inner.endpoints {
            // A dropped receiver is pruned on the next send
            let _ = endpoint.sender.send(TransportEvent::PeerConnected);
            let _ = sender.send(TransportEvent::PeerConnected);
        }
        inner.endpoints.push(HubEndpoint { id, sender });
        debug!(endpoint = id, peers = inner.endpoints.len(), "Loopback endpoint attached");
        LoopbackTransport {
            id,
            hub: Arc::clone(&self.inner),
            inbox,
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.inner.lock().endpoints.len()
    }

    /// Detach every endpoint; later sends fail with `TransportError::Closed`
    pub fn close(&self) {
        self.inner.lock().endpoints.clear();
    }
}

impl TransportFactory for LoopbackHub {
    fn open(&self, _endpoint: &Endpoint) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(self.attach()))
    }
}

pub struct LoopbackTransport {
    id: u64,
    hub: Arc<Mutex<HubInner>>,
    inbox: Receiver<TransportEvent>,
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> &'static str {
        "loopback"
    }

    fn mainloop(&mut self) -> Vec<TransportEvent> {
        self.inbox.try_iter().collect()
    }

    fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        trace!(
            sender = %frame.sender,
            message_type = %frame.message_type,
            len = frame.payload.len(),
            "Loopback send"
        );
        let mut inner = self.hub.lock();
        let own_id = self.id;
        if !inner.endpoints.iter().any(|endpoint| endpoint.id == own_id) {
            return Err(TransportError::Closed);
        }
        inner.endpoints.retain(|endpoint| {
            endpoint.id == own_id
                || endpoint
                    .sender
                    .send(TransportEvent::Message(frame.clone()))
                    .is_ok()
        });
        Ok(())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        let own_id = self.id;
        self.hub
            .lock()
            .endpoints
            .retain(|endpoint| endpoint.id != own_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: u8) -> Frame {
        Frame {
            sender: "dev".to_string(),
            message_type: "test".to_string(),
            timestamp: TimeValue::default(),
            payload: vec![payload],
        }
    }

    #[test]
    fn test_peer_connected_both_ways() {
        let hub = LoopbackHub::new();
        let mut a = hub.attach();
        let mut b = hub.attach();
        assert_eq!(a.mainloop(), vec![TransportEvent::PeerConnected]);
        assert_eq!(b.mainloop(), vec![TransportEvent::PeerConnected]);
        assert!(a.mainloop().is_empty());
    }

    #[test]
    fn test_frames_reach_other_endpoints_only() {
        let hub = LoopbackHub::new();
        let mut a = hub.attach();
        let mut b = hub.attach();
        let mut c = hub.attach();
        for t in [&mut a, &mut b, &mut c] {
            t.mainloop();
        }
        a.send(frame(1)).unwrap();
        a.send(frame(2)).unwrap();
        assert!(a.mainloop().is_empty());
        let expected = vec![
            TransportEvent::Message(frame(1)),
            TransportEvent::Message(frame(2)),
        ];
        assert_eq!(b.mainloop(), expected);
        assert_eq!(c.mainloop(), expected);
    }

    #[test]
    fn test_drop_detaches() {
        let hub = LoopbackHub::new();
        let mut a = hub.attach();
        {
            let _b = hub.attach();
            assert_eq!(hub.endpoint_count(), 2);
        }
        assert_eq!(hub.endpoint_count(), 1);
        assert!(a.send(frame(0)).is_ok());
    }

    #[test]
    fn test_send_after_close() {
        let hub = LoopbackHub::new();
        let mut a = hub.attach();
        hub.close();
        assert_eq!(a.send(frame(0)), Err(TransportError::Closed));
    }

    #[test]
    fn test_factory_opens_endpoints() {
        let hub = LoopbackHub::new();
        let transport = hub.open(&Endpoint::localhost(3883)).unwrap();
        assert_eq!(transport.kind(), "loopback");
        assert_eq!(hub.endpoint_count(), 1);
    }
}
