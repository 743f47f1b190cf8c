//! Device tokens: how a producer hands reports to its connection
//!
//! A token is either synchronous or asynchronous, fixed at creation.
//!
//! A synchronous token's update callback runs once per
//! [`Connection::process`] on the processing thread, and its sends go
//! straight to the device without locking. Sends from any other thread are
//! a usage error, caught by a debug assertion.
//!
//! An asynchronous token owns a worker thread that calls its wait callback
//! in a loop until the token is stopped. Sends from the worker lock the
//! token's outbound buffer (the send guard); the processing thread drains
//! that buffer during the device's connection interaction. Messages reach
//! the far end in the order they were sent on the token.
//!
//! Stopping is cooperative: the worker is signalled and joined, so a wait
//! callback that never returns blocks shutdown.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, Sender, TryRecvError};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};
use vrlink_core::wire::{serialize, Buffer};
use vrlink_core::Message;

use crate::clock::{Clock, TimeValue};
use crate::connection::Connection;
use crate::device::{
    ConnectionDevice, ConnectionDevicePtr, ConnectionInteract, DeviceInitObject, OutboundMessage,
};
use crate::error::TokenError;
use crate::message::MessageType;

/// Polled once per connection tick on the processing thread
pub trait SyncDeviceUpdate: Send {
    fn update(&mut self, sender: &SyncSender) -> anyhow::Result<()>;
}

impl<F> SyncDeviceUpdate for F
where
    F: FnMut(&SyncSender) -> anyhow::Result<()> + Send,
{
    fn update(&mut self, sender: &SyncSender) -> anyhow::Result<()> {
        self(sender)
    }
}

/// Called in a loop on the token's worker thread; expected to block on I/O
/// between reports
pub trait AsyncDeviceWait: Send {
    fn wait(&mut self, sender: &AsyncSender) -> anyhow::Result<()>;
}

impl<F> AsyncDeviceWait for F
where
    F: FnMut(&AsyncSender) -> anyhow::Result<()> + Send,
{
    fn wait(&mut self, sender: &AsyncSender) -> anyhow::Result<()> {
        self(sender)
    }
}

fn encode<M: Message>(message: &mut M) -> Result<Vec<u8>, TokenError> {
    let mut buf = Buffer::new();
    serialize(&mut buf, message)?;
    Ok(buf.into_inner())
}

/// Send handle for synchronous tokens
pub struct SyncSender {
    device: ConnectionDevicePtr,
    clock: Arc<dyn Clock>,
    owner: ThreadId,
}

impl SyncSender {
    pub fn send_data(&self, message_type: MessageType, payload: &[u8]) -> Result<(), TokenError> {
        self.send_data_at(self.clock.now(), message_type, payload)
    }

    pub fn send_data_at(
        &self,
        timestamp: TimeValue,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), TokenError> {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "synchronous device {} sent from a foreign thread",
            self.device.name()
        );
        self.device.send_data(timestamp, message_type, payload);
        Ok(())
    }

    pub fn send_message<M: Message>(
        &self,
        message_type: MessageType,
        message: &mut M,
    ) -> Result<(), TokenError> {
        let payload = encode(message)?;
        self.send_data(message_type, &payload)
    }
}

#[derive(Default)]
struct OutboundBuffer {
    messages: VecDeque<OutboundMessage>,
    closed: bool,
}

impl OutboundBuffer {
    fn push(&mut self, name: &str, message: OutboundMessage) -> Result<(), TokenError> {
        if self.closed {
            return Err(TokenError::Stopped(name.to_string()));
        }
        self.messages.push_back(message);
        Ok(())
    }
}

/// Send handle for asynchronous tokens, usable from any thread
#[derive(Clone)]
pub struct AsyncSender {
    name: Arc<str>,
    outbound: Arc<Mutex<OutboundBuffer>>,
    clock: Arc<dyn Clock>,
}

impl AsyncSender {
    pub fn send_data(&self, message_type: MessageType, payload: &[u8]) -> Result<(), TokenError> {
        self.get_send_guard().send_data(message_type, payload)
    }

    pub fn send_data_at(
        &self,
        timestamp: TimeValue,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), TokenError> {
        self.get_send_guard()
            .send_data_at(timestamp, message_type, payload)
    }

    pub fn send_message<M: Message>(
        &self,
        message_type: MessageType,
        message: &mut M,
    ) -> Result<(), TokenError> {
        let payload = encode(message)?;
        self.send_data(message_type, &payload)
    }

    /// Hold the send guard across several sends so they reach the
    /// connection in one interaction
    pub fn get_send_guard(&self) -> SendGuard<'_> {
        SendGuard {
            name: &self.name,
            clock: &*self.clock,
            target: GuardTarget::Buffer(self.outbound.lock()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.outbound.lock().closed
    }
}

enum GuardTarget<'a> {
    Buffer(MutexGuard<'a, OutboundBuffer>),
    Device(&'a ConnectionDevice),
}

/// Scoped permission to send. For asynchronous tokens it holds the lock on
/// the outbound buffer; for other tokens it writes straight through.
pub struct SendGuard<'a> {
    name: &'a str,
    clock: &'a dyn Clock,
    target: GuardTarget<'a>,
}

impl SendGuard<'_> {
    pub fn send_data(
        &mut self,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), TokenError> {
        let now = self.clock.now();
        self.send_data_at(now, message_type, payload)
    }

    pub fn send_data_at(
        &mut self,
        timestamp: TimeValue,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), TokenError> {
        match &mut self.target {
            GuardTarget::Buffer(buffer) => buffer.push(
                self.name,
                OutboundMessage {
                    message_type,
                    timestamp,
                    payload: payload.to_vec(),
                },
            ),
            GuardTarget::Device(device) => {
                device.send_data(timestamp, message_type, payload);
                Ok(())
            }
        }
    }

    pub fn send_message<M: Message>(
        &mut self,
        message_type: MessageType,
        message: &mut M,
    ) -> Result<(), TokenError> {
        let payload = encode(message)?;
        self.send_data(message_type, &payload)
    }
}

enum TokenKind {
    Sync {
        update: Mutex<Box<dyn SyncDeviceUpdate>>,
        sender: SyncSender,
    },
    Async {
        outbound: Arc<Mutex<OutboundBuffer>>,
    },
    Virtual,
}

type PreInteract = Box<dyn FnMut() + Send>;

struct TokenCore {
    name: String,
    pre_interact: Mutex<Option<PreInteract>>,
    kind: TokenKind,
}

impl ConnectionInteract for TokenCore {
    fn connection_interact(&self, device: &ConnectionDevice) {
        if let Some(callback) = self.pre_interact.lock().as_mut() {
            callback();
        }
        match &self.kind {
            TokenKind::Sync { update, sender } => {
                if let Err(err) = update.lock().update(sender) {
                    warn!(device = %self.name, error = %err, "Update callback failed");
                }
            }
            TokenKind::Async { outbound } => {
                let drained: Vec<OutboundMessage> =
                    outbound.lock().messages.drain(..).collect();
                for message in drained {
                    device.push_outbound(message);
                }
            }
            TokenKind::Virtual => {}
        }
    }
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Opaque handle to an object owned by a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(u64);

/// Objects whose lifetime is tied to a token. Each is dropped exactly once:
/// on release or when the registry is cleared.
#[derive(Default)]
struct ObjectRegistry {
    next: u64,
    objects: IndexMap<ObjectHandle, Box<dyn Any + Send>>,
}

impl ObjectRegistry {
    fn acquire(&mut self, object: Box<dyn Any + Send>) -> ObjectHandle {
        let handle = ObjectHandle(self.next);
        self.next += 1;
        self.objects.insert(handle, object);
        handle
    }

    fn release(&mut self, handle: ObjectHandle) -> Result<(), TokenError> {
        match self.objects.shift_remove(&handle) {
            Some(object) => {
                drop(object);
                Ok(())
            }
            None => Err(TokenError::UnknownObject(handle)),
        }
    }

    fn clear(&mut self) {
        // Drop in acquisition order
        for (_, object) in self.objects.drain(..) {
            drop(object);
        }
    }
}

/// A producer's handle to its device on a connection
pub struct DeviceToken {
    name: String,
    device: ConnectionDevicePtr,
    core: Arc<TokenCore>,
    clock: Arc<dyn Clock>,
    worker: Option<Worker>,
    objects: ObjectRegistry,
}

impl DeviceToken {
    fn bind(
        init: DeviceInitObject,
        connection: &mut Connection,
        kind: impl FnOnce(ConnectionDevicePtr) -> TokenKind,
    ) -> Self {
        let name = init.qualified_name();
        let device = connection.create_connection_device(init);
        let core = Arc::new(TokenCore {
            name: name.clone(),
            pre_interact: Mutex::new(None),
            kind: kind(Arc::clone(&device)),
        });
        let interactor: Arc<dyn ConnectionInteract> = core.clone();
        device.set_interactor(Arc::downgrade(&interactor));
        Self {
            name,
            device,
            core,
            clock: connection.clock(),
            worker: None,
            objects: ObjectRegistry::default(),
        }
    }

    /// Create a token whose `update` runs once per [`Connection::process`]
    /// on the thread creating the token.
    pub fn create_sync_device<U>(
        init: impl Into<DeviceInitObject>,
        connection: &mut Connection,
        update: U,
    ) -> Self
    where
        U: SyncDeviceUpdate + 'static,
    {
        let clock = connection.clock();
        let token = Self::bind(init.into(), connection, |device| TokenKind::Sync {
            update: Mutex::new(Box::new(update)),
            sender: SyncSender {
                device,
                clock,
                owner: thread::current().id(),
            },
        });
        debug!(device = %token.name, "Created synchronous device");
        token
    }

    /// Create a token with a worker thread calling `wait` until stopped
    pub fn create_async_device<W>(
        init: impl Into<DeviceInitObject>,
        connection: &mut Connection,
        wait: W,
    ) -> Result<Self, TokenError>
    where
        W: AsyncDeviceWait + 'static,
    {
        let outbound = Arc::new(Mutex::new(OutboundBuffer::default()));
        let buffer = Arc::clone(&outbound);
        let mut token = Self::bind(init.into(), connection, |_| TokenKind::Async {
            outbound: buffer,
        });

        let sender = AsyncSender {
            name: Arc::from(token.name.as_str()),
            outbound,
            clock: connection.clock(),
        };
        let (stop, stop_rx) = bounded::<()>(1);
        let thread_name = format!("vrlink-{}", token.name);
        let mut wait = wait;
        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            debug!(device = %sender.name, "Wait loop starting");
            loop {
                match stop_rx.try_recv() {
                    Err(TryRecvError::Empty) => {}
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                }
                if let Err(err) = wait.wait(&sender) {
                    debug!(device = %sender.name, error = %err, "Wait callback failed");
                }
            }
            debug!(device = %sender.name, "Wait loop exiting");
        })?;
        token.worker = Some(Worker { stop, handle });
        debug!(device = %token.name, "Created asynchronous device");
        Ok(token)
    }

    /// Create a token with no callback; sends go straight to the device
    pub fn create_virtual_device(
        init: impl Into<DeviceInitObject>,
        connection: &mut Connection,
    ) -> Self {
        Self::bind(init.into(), connection, |_| TokenKind::Virtual)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &ConnectionDevicePtr {
        &self.device
    }

    pub fn is_async(&self) -> bool {
        matches!(self.core.kind, TokenKind::Async { .. })
    }

    pub fn send_data(&self, message_type: MessageType, payload: &[u8]) -> Result<(), TokenError> {
        self.get_send_guard().send_data(message_type, payload)
    }

    pub fn send_data_at(
        &self,
        timestamp: TimeValue,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), TokenError> {
        self.get_send_guard()
            .send_data_at(timestamp, message_type, payload)
    }

    pub fn send_message<M: Message>(
        &self,
        message_type: MessageType,
        message: &mut M,
    ) -> Result<(), TokenError> {
        self.get_send_guard().send_message(message_type, message)
    }

    pub fn get_send_guard(&self) -> SendGuard<'_> {
        let target = match &self.core.kind {
            TokenKind::Async { outbound } => GuardTarget::Buffer(outbound.lock()),
            TokenKind::Sync { sender, .. } => {
                debug_assert_eq!(
                    thread::current().id(),
                    sender.owner,
                    "synchronous device {} sent from a foreign thread",
                    self.name
                );
                GuardTarget::Device(&self.device)
            }
            TokenKind::Virtual => GuardTarget::Device(&self.device),
        };
        SendGuard {
            name: &self.name,
            clock: &*self.clock,
            target,
        }
    }

    /// Run `callback` at the start of every connection interaction
    pub fn set_pre_connection_interact<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        *self.core.pre_interact.lock() = Some(Box::new(callback));
    }

    /// Signal the worker to exit and wait for it. Further sends on an
    /// asynchronous token fail with [`TokenError::Stopped`].
    pub fn stop_threads(&mut self) {
        if let TokenKind::Async { outbound } = &self.core.kind {
            outbound.lock().closed = true;
        }
        let Some(worker) = self.worker.take() else {
            return;
        };
        // The worker may already have exited and dropped the receiver
        let _ = worker.stop.send(());
        if worker.handle.join().is_err() {
            warn!(device = %self.name, "Worker thread panicked");
        }
        debug!(device = %self.name, "Worker thread stopped");
    }

    pub fn acquire_object<T: Any + Send>(&mut self, object: T) -> ObjectHandle {
        self.objects.acquire(Box::new(object))
    }

    /// Drop an owned object now. Releasing twice is reported, not fatal.
    pub fn release_object(&mut self, handle: ObjectHandle) -> Result<(), TokenError> {
        self.objects.release(handle).inspect_err(|err| {
            warn!(device = %self.name, error = %err, "Release of unknown object");
        })
    }

    pub fn owned_object_count(&self) -> usize {
        self.objects.objects.len()
    }
}

impl Drop for DeviceToken {
    fn drop(&mut self) {
        self.stop_threads();
        self.objects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::device::InboundMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn collect_payloads(
        connection: &mut Connection,
        name: &str,
        message_type: &str,
    ) -> Arc<Mutex<Vec<Vec<u8>>>> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let message_type = connection.register_message_type(message_type);
        let device = connection.create_connection_device(name);
        device.register_message_handler(message_type, move |message: &InboundMessage| {
            sink.lock().push(message.payload.clone());
        });
        received
    }

    #[test]
    fn test_sync_update_once_per_process() {
        let (mut server, _client) = Connection::create_loopback_pair();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _token = DeviceToken::create_sync_device(
            "cam0",
            &mut server,
            move |_: &SyncSender| -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );
        server.process();
        server.process();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sync_sends_reach_peer() {
        let (mut server, mut client) = Connection::create_loopback_pair();
        let pose = server.register_message_type("pose");
        let received = collect_payloads(&mut client, "cam0", "pose");
        let mut tick = 0u8;
        let _token = DeviceToken::create_sync_device(
            "cam0",
            &mut server,
            move |sender: &SyncSender| -> anyhow::Result<()> {
                tick += 1;
                sender.send_data(pose, &[tick])?;
                Ok(())
            },
        );
        server.process();
        server.process();
        client.process();
        assert_eq!(*received.lock(), vec![vec![1], vec![2]]);
    }

    #[test]
    fn test_pre_interact_runs_before_update() {
        let (mut server, _client) = Connection::create_loopback_pair();
        let order = Arc::new(Mutex::new(Vec::new()));
        let update_order = Arc::clone(&order);
        let token = DeviceToken::create_sync_device(
            "cam0",
            &mut server,
            move |_: &SyncSender| -> anyhow::Result<()> {
                update_order.lock().push("update");
                Ok(())
            },
        );
        let pre_order = Arc::clone(&order);
        token.set_pre_connection_interact(move || pre_order.lock().push("pre"));
        server.process();
        assert_eq!(*order.lock(), vec!["pre", "update"]);
    }

    #[test]
    fn test_async_sends_keep_order() {
        let (mut server, mut client) = Connection::create_loopback_pair();
        let pose = server.register_message_type("pose");
        let received = collect_payloads(&mut client, "tracker", "pose");
        let mut token = DeviceToken::create_async_device(
            "tracker",
            &mut server,
            |_: &AsyncSender| -> anyhow::Result<()> {
                thread::sleep(Duration::from_millis(1));
                Ok(())
            },
        )
        .unwrap();
        assert!(token.is_async());

        for i in 0..10u8 {
            token.send_data(pose, &[i]).unwrap();
        }
        server.process();
        client.process();
        let expected: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i]).collect();
        assert_eq!(*received.lock(), expected);
        token.stop_threads();
    }

    #[test]
    fn test_async_worker_reports() {
        let (mut server, mut client) = Connection::create_loopback_pair();
        let pose = server.register_message_type("pose");
        let received = collect_payloads(&mut client, "tracker", "pose");
        let mut count = 0u32;
        let mut token = DeviceToken::create_async_device(
            "tracker",
            &mut server,
            move |sender: &AsyncSender| -> anyhow::Result<()> {
                thread::sleep(Duration::from_millis(1));
                count += 1;
                let mut guard = sender.get_send_guard();
                guard.send_data(pose, &count.to_be_bytes())?;
                Ok(())
            },
        )
        .unwrap();

        for _ in 0..2000 {
            server.process();
            client.process();
            if received.lock().len() >= 3 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        token.stop_threads();

        let received = received.lock();
        assert!(received.len() >= 3);
        let values: Vec<u32> = received
            .iter()
            .map(|bytes| u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_stop_threads_is_idempotent() {
        let (mut server, _client) = Connection::create_loopback_pair();
        let pose = server.register_message_type("pose");
        let mut token = DeviceToken::create_async_device(
            "tracker",
            &mut server,
            |_: &AsyncSender| -> anyhow::Result<()> {
                thread::sleep(Duration::from_millis(1));
                Ok(())
            },
        )
        .unwrap();
        token.stop_threads();
        token.stop_threads();
        assert!(matches!(
            token.send_data(pose, &[0]),
            Err(TokenError::Stopped(_))
        ));
    }

    #[test]
    fn test_timestamps_come_from_connection_clock() {
        let stamp = TimeValue::new(42, 7);
        let (server, mut client) = Connection::create_loopback_pair();
        let mut server = server.with_clock(Arc::new(FixedClock(stamp)));
        let pose = server.register_message_type("pose");
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stamps);
        let client_pose = client.register_message_type("pose");
        client
            .create_connection_device("cam0")
            .register_message_handler(client_pose, move |message| {
                sink.lock().push(message.timestamp);
            });
        let token = DeviceToken::create_virtual_device("cam0", &mut server);
        token.send_data(pose, &[]).unwrap();
        server.process();
        client.process();
        assert_eq!(*stamps.lock(), vec![stamp]);
    }

    #[test]
    fn test_send_message_serializes() {
        let (mut server, mut client) = Connection::create_loopback_pair();
        let time = server.register_message_type("time");
        let received = collect_payloads(&mut client, "clock", "time");
        let token = DeviceToken::create_virtual_device("clock", &mut server);
        token.send_message(time, &mut TimeValue::new(1, 2)).unwrap();
        server.process();
        client.process();
        let received = received.lock();
        assert_eq!(
            vrlink_core::wire::from_bytes::<TimeValue>(&received[0]).unwrap(),
            TimeValue::new(1, 2)
        );
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_owned_objects_released_once() {
        let (mut server, _client) = Connection::create_loopback_pair();
        let drops = Arc::new(AtomicUsize::new(0));
        let mut token = DeviceToken::create_virtual_device("cam0", &mut server);
        let first = token.acquire_object(DropCounter(Arc::clone(&drops)));
        let _second = token.acquire_object(DropCounter(Arc::clone(&drops)));
        assert_eq!(token.owned_object_count(), 2);

        token.release_object(first).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(matches!(
            token.release_object(first),
            Err(TokenError::UnknownObject(handle)) if handle == first
        ));
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        drop(token);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }
}
