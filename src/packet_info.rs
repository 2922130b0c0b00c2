use anyhow::bail;
use bitflags::bitflags;
use bytes::Buf;

use crate::connection_id::{ConnectionId, MAX_CONNECTION_ID_LEN};

bitflags! {
    #[derive(PartialEq, Eq, Copy, Clone)]
    struct HeaderFlags: u8 {
        const LONG_FORM = 0b1000_0000;
    }
}

/// The slice of a packet header that dispatch needs: which connection the packet belongs to,
///  and - for long-form (first-contact) packets - which protocol version it declares.
///
/// This is deliberately *not* a packet codec. Everything after the connection id is opaque here
///  and handed to the session verbatim; full parsing, decryption and validation are the
///  session's business.
///
/// Header layout as consumed here:
/// ```ascii
/// long form (bit 7 of the first byte set):
///   0: flags (u8)
///   1: protocol version (u32)
///   5: connection id length (u8)
///   6: connection id (variable)
/// short form (bit 7 clear):
///   0: flags (u8)
///   1: connection id, exactly the currently expected length
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketInfo {
    pub connection_id: ConnectionId,
    /// declared protocol version; `None` for short-form packets, which carry no version
    pub version: Option<u32>,
}

impl PacketInfo {
    pub fn is_long_form(&self) -> bool {
        self.version.is_some()
    }

    /// Extracts connection id and version from the start of a raw packet.
    ///
    /// `expected_connection_id_len` applies to short-form packets only; long-form packets carry
    ///  their id length explicitly.
    pub fn parse(packet: &[u8], expected_connection_id_len: usize) -> anyhow::Result<PacketInfo> {
        let mut buf = packet;

        let flags = HeaderFlags::from_bits_truncate(buf.try_get_u8()?);

        if flags.contains(HeaderFlags::LONG_FORM) {
            let version = buf.try_get_u32()?;
            let connection_id_len = buf.try_get_u8()? as usize;
            if connection_id_len > MAX_CONNECTION_ID_LEN {
                bail!("connection id length {} exceeds the maximum of {}", connection_id_len, MAX_CONNECTION_ID_LEN);
            }
            if buf.remaining() < connection_id_len {
                bail!("packet truncated inside the connection id");
            }
            Ok(PacketInfo {
                connection_id: ConnectionId::from_bytes(buf.copy_to_bytes(connection_id_len)),
                version: Some(version),
            })
        }
        else {
            if buf.remaining() < expected_connection_id_len {
                bail!("short-form packet shorter than the expected connection id length {}", expected_connection_id_len);
            }
            Ok(PacketInfo {
                connection_id: ConnectionId::from_bytes(buf.copy_to_bytes(expected_connection_id_len)),
                version: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn long_form(version: u32, cid: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x80];
        packet.extend_from_slice(&version.to_be_bytes());
        packet.push(cid.len() as u8);
        packet.extend_from_slice(cid);
        packet.extend_from_slice(&[0xee; 10]); // opaque remainder
        packet
    }

    fn short_form(cid: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x40];
        packet.extend_from_slice(cid);
        packet.extend_from_slice(&[0xee; 10]);
        packet
    }

    #[rstest]
    #[case::cid_8(1, vec![1, 2, 3, 4, 5, 6, 7, 8])]
    #[case::cid_4(1, vec![9, 9, 9, 9])]
    #[case::cid_empty(7, vec![])]
    #[case::cid_max(0xdead_beef, vec![0xab; MAX_CONNECTION_ID_LEN])]
    fn test_parse_long_form(#[case] version: u32, #[case] cid: Vec<u8>) {
        // the expected length must not matter for long-form packets
        let parsed = PacketInfo::parse(&long_form(version, &cid), 3).unwrap();
        assert_eq!(parsed.version, Some(version));
        assert_eq!(parsed.connection_id, ConnectionId::from_slice(&cid));
        assert!(parsed.is_long_form());
    }

    #[rstest]
    #[case::len_1(vec![7], 1)]
    #[case::len_8(vec![1, 2, 3, 4, 5, 6, 7, 8], 8)]
    fn test_parse_short_form(#[case] cid: Vec<u8>, #[case] expected_len: usize) {
        let parsed = PacketInfo::parse(&short_form(&cid), expected_len).unwrap();
        assert_eq!(parsed.version, None);
        assert_eq!(parsed.connection_id, ConnectionId::from_slice(&cid));
        assert!(!parsed.is_long_form());
    }

    #[test]
    fn test_parse_short_form_takes_expected_len_prefix() {
        // a short-form packet has no length marker of its own: the expected length decides
        //  where the id ends
        let parsed = PacketInfo::parse(&short_form(&[1, 2, 3, 4]), 2).unwrap();
        assert_eq!(parsed.connection_id, ConnectionId::from_slice(&[1, 2]));
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::long_form_no_version(vec![0x80, 0, 0])]
    #[case::long_form_no_cid_len(vec![0x80, 0, 0, 0, 1])]
    #[case::long_form_truncated_cid(vec![0x80, 0, 0, 0, 1, 8, 1, 2, 3])]
    #[case::long_form_cid_too_long(long_form(1, &[0u8; MAX_CONNECTION_ID_LEN + 1]))]
    #[case::short_form_too_short(vec![0x40, 1, 2])]
    fn test_parse_rejects(#[case] packet: Vec<u8>) {
        assert!(PacketInfo::parse(&packet, 8).is_err());
    }
}
