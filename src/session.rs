use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;

use crate::bitrate::Bitrate;
use crate::clock::{Clock, Timestamp};
use crate::config::{CertificateCache, CryptoConfig, EndpointConfig};
use crate::connection_id::ConnectionId;
use crate::transport::SendResult;

/// A raw packet as the dispatcher hands it to a session: payload plus the receive timestamp and
///  the (possibly synthesized) addresses it was processed under.
#[derive(Clone, Debug)]
pub struct ReceivedPacket {
    pub data: Bytes,
    pub receive_time: Timestamp,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// Which side initiated a connection close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseSource {
    Local,
    Peer,
}

/// The per-connection collaborator: handshake and stream state machine for exactly one
///  connection id. This core never implements it - it creates sessions through a
///  [SessionFactory], feeds them packets, and forwards writability.
///
/// A session is bound to its connection id at creation and owned by the registry entry that
///  created it; it is removed from the registry only through its own close path, never
///  implicitly.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Session: Send + Sync + 'static {
    fn connection_id(&self) -> ConnectionId;

    /// The largest unreliable-message payload this session guarantees to accept.
    fn max_datagram_payload(&self) -> usize;

    /// A packet for this session's connection id arrived. Packets for one id are delivered in
    ///  arrival order.
    async fn on_packet(&self, packet: ReceivedPacket);

    /// The underlying transport can accept more data.
    async fn on_transport_writable(&self);

    /// Sends one unreliable message. Rejection means the session has no capacity right now;
    ///  callers do not retry.
    async fn send_datagram(&self, payload: Bytes) -> SendResult;

    async fn close(&self, code: u32, reason: String);
}

/// Everything a factory needs to build a server-role session. The shared configuration objects
///  are owned by the dispatcher and handed over by [Arc] - they outlive every session.
pub struct NewSessionContext {
    pub connection_id: ConnectionId,
    pub peer_addr: SocketAddr,
    /// application protocol hint, if the deployment surfaces one at dispatch time
    pub alpn: Option<String>,
    pub version: u32,
    pub config: Arc<EndpointConfig>,
    pub crypto_config: Arc<CryptoConfig>,
    pub certificate_cache: Arc<CertificateCache>,
    pub clock: Arc<dyn Clock>,
}

/// Builds the session collaborator for a first-contact connection. Implemented outside this
///  core (the handshake machinery lives there); mocked in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    async fn create_session(&self, context: NewSessionContext) -> Arc<dyn Session>;
}

/// Lifecycle notifications a session fires into its owner. One flat interface per notification
///  surface; whoever needs to observe a session implements this.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionEventListener: Send + Sync + 'static {
    async fn on_handshake_complete(&self);

    /// The session can send again after having been blocked.
    async fn on_session_writable(&self);

    /// The congestion controller produced a new estimate. This core only consumes these values,
    ///  it never computes them.
    async fn on_congestion_update(&self, bandwidth_estimate: Bitrate, pacing_rate: Bitrate, latest_rtt: Duration);

    /// The peer opened an incoming stream.
    async fn on_incoming_stream(&self);

    /// An unreliable message arrived on the session.
    async fn on_message_received(&self, payload: Bytes);

    async fn on_session_closed(&self, code: u32, details: String, source: CloseSource);
}
