use std::sync::Weak;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;

/// Outcome of handing a packet or datagram to the layer below. Rejection is a normal condition
///  (the channel is momentarily full), never an error: the caller's next scheduled attempt is
///  the retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendResult {
    Accepted,
    Rejected,
}

/// The packet transport underneath the dispatcher: anything that can move opaque datagrams,
///  a UDP socket as much as a data channel. It surfaces exactly two events - data arrived,
///  channel became writable - and accepts packets for sending.
///
/// The dispatcher registers itself as the sole delegate. The delegate is held as a [Weak]
///  reference: once the dispatcher is dropped, the transport cannot call into it any more,
///  whether or not it was detached explicitly.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketTransport: Send + Sync + 'static {
    async fn send_packet(&self, packet: &[u8]) -> SendResult;

    /// Replaces the registered delegate. `None` detaches.
    ///
    /// NB: A transport may invoke the freshly registered delegate synchronously from this call
    ///  (e.g. an immediate writable notification), so callers must only register objects that
    ///  are fully constructed.
    fn set_delegate(&self, delegate: Option<Weak<dyn TransportDelegate>>);
}

/// The two notifications a transport fires into its registered delegate.
#[async_trait]
pub trait TransportDelegate: Send + Sync + 'static {
    async fn on_transport_can_write(&self);

    async fn on_transport_received(&self, data: Bytes);
}
