use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::sync::Mutex;
use tracing::{debug, span, Instrument, Level};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{CertificateCache, CryptoConfig, EndpointConfig};
use crate::connection_id::ConnectionId;
use crate::packet_info::PacketInfo;
use crate::registry::SessionRegistry;
use crate::session::{NewSessionContext, ReceivedPacket, Session, SessionFactory};
use crate::transport::{PacketTransport, TransportDelegate};

/// Hooks for owning code to attach behavior to dispatch events without the dispatcher
///  depending on it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DispatcherDelegate: Send + Sync + 'static {
    async fn on_session_created(&self, session: Arc<dyn Session>);

    async fn on_connect_error(&self, code: u32, details: String);
}

/// The expected length of connection ids in short-form packets. The dispatcher cannot know the
///  negotiated length before any connection exists, so it learns it from the long-form packets
///  it sees; the first successful session creation locks it permanently, because changing it
///  afterwards would desynchronize demultiplexing for the connection it was negotiated with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExpectedConnectionIdLen {
    Learning(usize),
    Locked(usize),
}
impl ExpectedConnectionIdLen {
    fn get(&self) -> usize {
        match self {
            ExpectedConnectionIdLen::Learning(len) => *len,
            ExpectedConnectionIdLen::Locked(len) => *len,
        }
    }

    fn learn(&mut self, len: usize) {
        if let ExpectedConnectionIdLen::Learning(current) = self {
            *current = len;
        }
    }

    fn lock(&mut self) {
        *self = ExpectedConnectionIdLen::Locked(self.get());
    }
}

struct DispatcherInner {
    registry: SessionRegistry,
    expected_connection_id_len: ExpectedConnectionIdLen,
}

/// Demultiplexes inbound packets from a single (possibly rewired) transport onto live sessions,
///  creating server-role sessions on first contact from unrecognized connection ids.
///
/// The dispatcher is the only transport delegate; it registers itself at construction and
///  unregisters when detached or dropped, so no callback can ever reach a dead dispatcher.
pub struct Dispatcher {
    config: Arc<EndpointConfig>,
    crypto_config: Arc<CryptoConfig>,
    certificate_cache: Arc<CertificateCache>,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn PacketTransport>,
    session_factory: Arc<dyn SessionFactory>,
    delegate: Arc<dyn DispatcherDelegate>,
    inner: Mutex<DispatcherInner>,
}

/// Some transports surface no real peer address at all. The dispatcher synthesizes this fixed
///  placeholder for both source and destination before processing such packets.
///
/// The port must never be 0 - downstream processing rejects port-0 addresses, and packets
///  carrying this placeholder must never be observed failing for that reason.
pub const PLACEHOLDER_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 1);

impl Dispatcher {
    pub fn new(
        config: Arc<EndpointConfig>,
        crypto_config: Arc<CryptoConfig>,
        certificate_cache: Arc<CertificateCache>,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn PacketTransport>,
        session_factory: Arc<dyn SessionFactory>,
        delegate: Arc<dyn DispatcherDelegate>,
    ) -> anyhow::Result<Arc<Dispatcher>> {
        config.validate()?;

        let dispatcher = Arc::new(Dispatcher {
            inner: Mutex::new(DispatcherInner {
                registry: SessionRegistry::new(),
                expected_connection_id_len: ExpectedConnectionIdLen::Learning(config.initial_connection_id_len),
            }),
            config,
            crypto_config,
            certificate_cache,
            clock,
            transport,
            session_factory,
            delegate,
        });

        // NB: This must happen after the Arc is fully built - the transport may call the
        //  delegate back synchronously from set_delegate(). The unsizing happens in a separate
        //  binding so the annotation does not steer downgrade()'s type parameter.
        let weak = Arc::downgrade(&dispatcher);
        let weak: Weak<dyn TransportDelegate> = weak;
        dispatcher.transport.set_delegate(Some(weak));

        Ok(dispatcher)
    }

    /// Unregisters this dispatcher from the transport so no further callback can reach it.
    ///  Also invoked from [Drop]; teardown must detach before anything owned is released.
    pub fn detach(&self) {
        self.transport.set_delegate(None);
    }

    pub async fn expected_connection_id_len(&self) -> usize {
        self.inner.lock().await
            .expected_connection_id_len.get()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await
            .registry.len()
    }

    /// A session's close path calls this to drop its registry entry. Idempotent.
    pub async fn remove_session(&self, connection_id: &ConnectionId) {
        self.inner.lock().await
            .registry.remove(connection_id);
    }

    /// Routes one raw inbound packet: existing session, new session, or silent drop.
    ///
    /// Every drop in here is expected traffic noise (malformed headers, unsupported versions,
    ///  identifier drift) - logged at debug level and never reported upward as an error.
    pub async fn on_packet_received(&self, data: Bytes, source: SocketAddr, destination: SocketAddr) {
        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "packet_received", ?correlation_id);

        async {
            let expected_len = self.inner.lock().await.expected_connection_id_len.get();

            let info = match PacketInfo::parse(&data, expected_len) {
                Ok(info) => info,
                Err(e) => {
                    debug!("received packet with unusable header from {:?} ({}) - dropping", source, e);
                    return;
                }
            };

            let session = {
                let mut inner = self.inner.lock().await;

                if info.is_long_form() {
                    // while no session exists, long-form packets teach us the id length to
                    //  expect in short-form packets
                    inner.expected_connection_id_len.learn(info.connection_id.len());
                }

                inner.registry.lookup(&info.connection_id)
            };

            if let Some(session) = session {
                session.on_packet(self.received_packet(data, source, destination)).await;
                return;
            }

            // first contact for this connection id
            let version = match info.version {
                Some(version) => version,
                None => {
                    debug!("short-form packet for unknown connection id {:?} - dropping", info.connection_id);
                    return;
                }
            };
            if !self.config.supported_versions.contains(&version) {
                debug!("unsupported protocol version {:#x} from {:?} - dropping", version, source);
                return;
            }
            if let ExpectedConnectionIdLen::Locked(len) = self.inner.lock().await.expected_connection_id_len {
                if info.connection_id.len() != len {
                    debug!("connection id length {} drifted from the negotiated {} - dropping", info.connection_id.len(), len);
                    return;
                }
            }

            self.create_session(info.connection_id, source, version, self.received_packet(data, source, destination)).await;
        }
        .instrument(span)
        .await
    }

    /// Builds and registers a server-role session for a first-contact packet, then forwards
    ///  the packet to it.
    ///
    /// The registry's insert-if-absent is the sole serialization point: if two deliveries of
    ///  the same first packet race, the loser's session is closed and discarded without any
    ///  delegate notification, and the packet goes to the registered winner instead so per-id
    ///  arrival order survives the race.
    async fn create_session(&self, connection_id: ConnectionId, peer_addr: SocketAddr, version: u32, packet: ReceivedPacket) {
        debug!("creating session for {:?}", connection_id);

        let session = self.session_factory.create_session(NewSessionContext {
            connection_id: connection_id.clone(),
            peer_addr,
            alpn: None,
            version,
            config: self.config.clone(),
            crypto_config: self.crypto_config.clone(),
            certificate_cache: self.certificate_cache.clone(),
            clock: self.clock.clone(),
        }).await;

        let winner = {
            let mut inner = self.inner.lock().await;
            if inner.registry.insert(connection_id.clone(), session.clone()) {
                // a connection exists now: the expected connection id length stops adapting
                inner.expected_connection_id_len.lock();
                None
            }
            else {
                inner.registry.lookup(&connection_id)
            }
        };

        match winner {
            None => {
                self.delegate.on_session_created(session.clone()).await;
                session.on_packet(packet).await;
            }
            Some(winner) => {
                debug!("session for {:?} already exists, discarding duplicate creation", connection_id);
                session.close(0, "duplicate session for connection id".to_string()).await;
                winner.on_packet(packet).await;
            }
        }
    }

    /// Forwards a writable notification to every registered session, each exactly once, in
    ///  registry insertion order (deterministic within one process).
    pub async fn on_transport_writable(&self) {
        let sessions: Vec<Arc<dyn Session>> = self.inner.lock().await
            .registry.sessions().cloned().collect();

        for session in sessions {
            session.on_transport_writable().await;
        }
    }

    fn received_packet(&self, data: Bytes, source: SocketAddr, destination: SocketAddr) -> ReceivedPacket {
        ReceivedPacket {
            data,
            receive_time: self.clock.now(),
            source,
            destination,
        }
    }
}

#[async_trait]
impl TransportDelegate for Dispatcher {
    async fn on_transport_can_write(&self) {
        self.on_transport_writable().await;
    }

    async fn on_transport_received(&self, data: Bytes) {
        self.on_packet_received(data, PLACEHOLDER_ADDR, PLACEHOLDER_ADDR).await;
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.detach();
    }
}
