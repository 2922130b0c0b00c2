use anyhow::bail;
use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::connection_id::MAX_CONNECTION_ID_LEN;

/// Endpoint-wide configuration, shared read-only by the dispatcher and every session it creates.
pub struct EndpointConfig {
    /// Protocol versions this endpoint accepts in first-contact packets. Packets declaring any
    ///  other version are dropped silently - that is expected traffic noise, not an error.
    pub supported_versions: Vec<u32>,

    /// The connection id length the dispatcher expects in short-form packets before it has seen
    ///  any long-form packet. This is a starting point only: the dispatcher adapts it to observed
    ///  long-form headers until the first session is created, and freezes it afterwards.
    pub initial_connection_id_len: usize,

    /// The largest unreliable-message payload a session guarantees to accept. Data source frame
    ///  sizes are clamped to this, so no produced frame can exceed it.
    ///
    /// The underlying transport enforces its own packet size limit; this value must leave room
    ///  for per-packet protocol overhead below that limit. Determining it is the application's
    ///  responsibility, as with any MTU-derived setting.
    pub max_datagram_payload: usize,
}

impl EndpointConfig {
    /// Defaults for running over a data-channel style transport with ~1200 byte datagrams.
    pub fn default_datachannel() -> EndpointConfig {
        EndpointConfig {
            supported_versions: vec![1],
            initial_connection_id_len: 8,
            max_datagram_payload: 1200,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.supported_versions.is_empty() {
            bail!("at least one supported protocol version is required");
        }
        if self.initial_connection_id_len > MAX_CONNECTION_ID_LEN {
            bail!("initial connection id length {} exceeds the maximum of {}", self.initial_connection_id_len, MAX_CONNECTION_ID_LEN);
        }
        if self.max_datagram_payload < 64 {
            bail!("max datagram payload is too small");
        }
        Ok(())
    }
}

/// Opaque crypto material for server-role sessions. The core never looks inside: it owns this
///  so it outlives every session, and hands it to the session factory by reference.
pub struct CryptoConfig {
    pub serialized: Bytes,
}

impl CryptoConfig {
    pub fn new(serialized: Bytes) -> CryptoConfig {
        CryptoConfig { serialized }
    }
}

/// Pre-built cache of compressed certificate chains, read-shared by all sessions. Populated
///  during endpoint setup and never mutated once sessions start reading it.
#[derive(Default)]
pub struct CertificateCache {
    chains: FxHashMap<String, Bytes>,
}

impl CertificateCache {
    pub fn new() -> CertificateCache {
        Default::default()
    }

    pub fn insert(&mut self, key: String, chain: Bytes) {
        self.chains.insert(key, chain);
    }

    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.chains.get(key)
    }
}
