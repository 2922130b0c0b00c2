//! Connection dispatch and data multiplexing for a datagram-oriented, QUIC-style transport.
//!
//! This crate is the demultiplexing core that sits between a raw packet transport (a UDP
//!  socket, a WebRTC-style data channel, anything that moves opaque datagrams) and the
//!  per-connection session machinery: it decides, packet by packet, which connection a
//!  datagram belongs to, creates server-role sessions on first contact, and schedules the
//!  outbound data of multiple independent sources onto one connection's bandwidth budget.
//!
//! ## Design goals
//!
//! * Dispatch is by *connection id*, not by peer address
//!   * several connections can share one underlying transport, and a transport may surface
//!     no usable peer address at all (data channels); a synthesized placeholder address is
//!     used in that case
//!   * connection ids have variable length. The expected length for short-form packets is
//!     learned from the long-form packets seen before the first connection exists, and
//!     frozen permanently once one does - re-adapting afterwards would desynchronize
//!     demultiplexing for the connection the length was negotiated with
//! * Wire noise is dropped silently
//!   * malformed headers, unsupported protocol versions and unknown short-form connection
//!     ids are expected traffic on an open port, logged at debug level and never surfaced
//!     as errors
//! * Exactly one session per connection id, ever
//!   * the registry's insert-if-absent is the single serialization point; a session that
//!     loses the registration race is discarded before anyone is told about it
//! * Teardown is safe by construction
//!   * the transport holds its delegate weakly, so a dropped dispatcher structurally cannot
//!     receive callbacks, detached or not
//! * Sending adapts continuously to the congestion controller
//!   * each data source produces frames on its own cadence, sized by `allocated bitrate ×
//!     elapsed time` within configured bounds, so a source that fell behind catches up with
//!     a larger frame instead of losing throughput
//!   * the pacing rate is divided across sources by water-filling: sources wanting less
//!     than their equal share are capped at their target and the remainder is redistributed
//! * This crate computes no congestion state and performs no handshake
//!   * sessions, handshake and congestion control are collaborators behind traits; this
//!     core only consumes their notifications
//!
//! ## Packet headers, as consumed here
//!
//! Dispatch reads only the prefix of each packet; everything after the connection id is
//!  opaque and handed to the session verbatim. All numbers in network byte order (BE):
//!
//! ```ascii
//! long form (bit 7 of the first byte set, first-contact packets):
//!   0: flags (u8)
//!   1: protocol version (u32)
//!   5: connection id length (u8, at most 20)
//!   6: connection id (variable)
//!
//! short form (bit 7 clear):
//!   0: flags (u8)
//!   1: connection id, exactly the currently expected length
//! ```
//!
//! Data frames produced by the sources carry their own small header in the datagram payload:
//!
//! ```ascii
//! 0:  source id (u32)
//! 4:  sequence number within the source (u64)
//! 12: send timestamp, microseconds since the sender's epoch (u64) - opaque to the receiver
//!      except for computing one-way-delay style deltas between frames of one source
//! 20: filler up to the scheduled frame size
//! ```
//!
//! ## Related:
//! * QUIC (RFC 8999/9000)
//!   * the long/short header split and the version-then-id-length layout follow its
//!     version-independent invariants
//!   * QUIC's dispatcher additionally handles version negotiation, retry and stateless
//!     reset; here unsupported versions are simply dropped
//! * WebRTC data channels
//!   * the motivating address-less transport: SCTP over DTLS surfaces no per-packet peer
//!     address, hence the placeholder
//! * Aeron
//!   * similar multi-source flow control over a shared bandwidth budget, but broker-based
//!     and with pre-allocated per-peer buffers

pub mod bitrate;
pub mod clock;
pub mod config;
pub mod connection_id;
pub mod data_source;
pub mod dispatcher;
pub mod frame;
pub mod packet_info;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod transport;

mod safe_converter;

#[cfg(test)]
pub(crate) mod test_util;
