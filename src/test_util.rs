//! Hand-rolled fakes for the collaborator seams, for tests that need observable state across
//!  several interacting calls (mockall covers the single-expectation cases).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::Mutex;

use crate::clock::{Clock, Timestamp};
use crate::connection_id::ConnectionId;
use crate::dispatcher::DispatcherDelegate;
use crate::session::{NewSessionContext, ReceivedPacket, Session, SessionFactory};
use crate::transport::{PacketTransport, SendResult, TransportDelegate};

/// A clock that moves only when the test says so.
pub struct ManualClock {
    now: std::sync::Mutex<Timestamp>,
}
impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock {
            now: std::sync::Mutex::new(Timestamp::ZERO),
        }
    }

    pub fn set_micros(&self, micros: u64) {
        *self.now.lock().unwrap() = Timestamp::from_micros(micros);
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
    }
}
impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

/// An in-memory transport: tests push inbound packets and writable events through it, and it
///  keeps the weak delegate reference exactly as a real transport would.
pub struct FakeTransport {
    delegate: std::sync::Mutex<Option<Weak<dyn TransportDelegate>>>,
}
impl FakeTransport {
    pub fn new() -> FakeTransport {
        FakeTransport {
            delegate: std::sync::Mutex::new(None),
        }
    }

    fn live_delegate(&self) -> Option<Arc<dyn TransportDelegate>> {
        self.delegate.lock().unwrap()
            .as_ref()
            .and_then(|weak| weak.upgrade())
    }

    /// Simulates an inbound packet. A detached or dropped delegate makes this a no-op.
    pub async fn deliver(&self, data: Bytes) {
        if let Some(delegate) = self.live_delegate() {
            delegate.on_transport_received(data).await;
        }
    }

    pub async fn fire_writable(&self) {
        if let Some(delegate) = self.live_delegate() {
            delegate.on_transport_can_write().await;
        }
    }
}
#[async_trait]
impl PacketTransport for FakeTransport {
    async fn send_packet(&self, _packet: &[u8]) -> SendResult {
        SendResult::Accepted
    }

    fn set_delegate(&self, delegate: Option<Weak<dyn TransportDelegate>>) {
        *self.delegate.lock().unwrap() = delegate;
    }
}

/// Records everything the dispatcher or scheduler feeds into a session.
pub struct FakeSession {
    connection_id: ConnectionId,
    max_datagram_payload: usize,
    packets: Mutex<Vec<ReceivedPacket>>,
    datagrams: Mutex<Vec<Bytes>>,
    datagram_result: std::sync::Mutex<SendResult>,
    writable_count: AtomicUsize,
    close_count: AtomicUsize,
    /// shared across sessions so a test can observe cross-session notification order
    writable_log: Option<Arc<std::sync::Mutex<Vec<ConnectionId>>>>,
}
impl FakeSession {
    pub fn new(connection_id: ConnectionId, max_datagram_payload: usize) -> FakeSession {
        FakeSession::with_writable_log(connection_id, max_datagram_payload, None)
    }

    fn with_writable_log(connection_id: ConnectionId, max_datagram_payload: usize, writable_log: Option<Arc<std::sync::Mutex<Vec<ConnectionId>>>>) -> FakeSession {
        FakeSession {
            connection_id,
            max_datagram_payload,
            packets: Mutex::new(Vec::new()),
            datagrams: Mutex::new(Vec::new()),
            datagram_result: std::sync::Mutex::new(SendResult::Accepted),
            writable_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            writable_log,
        }
    }

    pub async fn packets(&self) -> Vec<ReceivedPacket> {
        self.packets.lock().await.clone()
    }

    /// Every datagram offered for sending, whether or not it was accepted.
    pub async fn datagrams(&self) -> Vec<Bytes> {
        self.datagrams.lock().await.clone()
    }

    pub fn set_datagram_result(&self, result: SendResult) {
        *self.datagram_result.lock().unwrap() = result;
    }

    pub fn writable_count(&self) -> usize {
        self.writable_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}
#[async_trait]
impl Session for FakeSession {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id.clone()
    }

    fn max_datagram_payload(&self) -> usize {
        self.max_datagram_payload
    }

    async fn on_packet(&self, packet: ReceivedPacket) {
        self.packets.lock().await.push(packet);
    }

    async fn on_transport_writable(&self) {
        self.writable_count.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.writable_log {
            log.lock().unwrap().push(self.connection_id.clone());
        }
    }

    async fn send_datagram(&self, payload: Bytes) -> SendResult {
        self.datagrams.lock().await.push(payload);
        *self.datagram_result.lock().unwrap()
    }

    async fn close(&self, _code: u32, _reason: String) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds [FakeSession]s and keeps handles to everything it built.
pub struct RecordingFactory {
    max_datagram_payload: usize,
    created: Mutex<Vec<Arc<FakeSession>>>,
    writable_log: Arc<std::sync::Mutex<Vec<ConnectionId>>>,
}
impl RecordingFactory {
    pub fn new(max_datagram_payload: usize) -> RecordingFactory {
        RecordingFactory {
            max_datagram_payload,
            created: Mutex::new(Vec::new()),
            writable_log: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub async fn created(&self) -> Vec<Arc<FakeSession>> {
        self.created.lock().await.clone()
    }

    /// Writable notifications across all built sessions, in the order they were observed.
    pub async fn writable_order(&self) -> Vec<ConnectionId> {
        self.writable_log.lock().unwrap().clone()
    }
}
#[async_trait]
impl SessionFactory for RecordingFactory {
    async fn create_session(&self, context: NewSessionContext) -> Arc<dyn Session> {
        let session = Arc::new(FakeSession::with_writable_log(
            context.connection_id,
            self.max_datagram_payload,
            Some(self.writable_log.clone()),
        ));
        self.created.lock().await.push(session.clone());
        session
    }
}

pub struct RecordingDelegate {
    sessions: Mutex<Vec<Arc<dyn Session>>>,
}
impl RecordingDelegate {
    pub fn new() -> RecordingDelegate {
        RecordingDelegate {
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub async fn sessions_created(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
#[async_trait]
impl DispatcherDelegate for RecordingDelegate {
    async fn on_session_created(&self, session: Arc<dyn Session>) {
        self.sessions.lock().await.push(session);
    }

    async fn on_connect_error(&self, _code: u32, _details: String) {}
}

pub fn long_form_packet(version: u32, connection_id: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(0x80);
    buf.put_u32(version);
    buf.put_u8(connection_id.len() as u8);
    buf.put_slice(connection_id);
    buf.put_slice(b"opaque payload");
    buf.freeze()
}

pub fn short_form_packet(connection_id: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(0x40);
    buf.put_slice(connection_id);
    buf.put_slice(b"opaque payload");
    buf.freeze()
}
