use std::fmt::Debug;

use bytes::Bytes;

/// The maximum connection id length a packet header may declare (QUIC invariant).
pub const MAX_CONNECTION_ID_LEN: usize = 20;

/// A variable-length byte string naming one connection at the wire level, independent of any
///  network address. Used only as a map key: two ids are equal iff they are byte-equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(Bytes);

impl ConnectionId {
    pub fn from_slice(bytes: &[u8]) -> ConnectionId {
        ConnectionId(Bytes::copy_from_slice(bytes))
    }

    pub fn from_bytes(bytes: Bytes) -> ConnectionId {
        ConnectionId(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}
impl Debug for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CID[")?;
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "]")
    }
}
