use bytes::{Buf, BufMut};

use crate::clock::Timestamp;

/// Header at the start of every produced data frame. Everything after it is filler up to the
///  frame size chosen by the producing source.
///
/// Wire format (network byte order):
/// ```ascii
/// 0:  source id (u32)
/// 4:  sequence number (u64) - per source, starting at 0
/// 12: send timestamp (u64) - microseconds on the sender's clock; opaque to the receiver
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataFrameHeader {
    pub source_id: u32,
    pub sequence: u64,
    pub send_time: Timestamp,
}

impl DataFrameHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u32>() + size_of::<u64>() + size_of::<u64>();

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.source_id);
        buf.put_u64(self.sequence);
        buf.put_u64(self.send_time.as_micros());
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<DataFrameHeader> {
        let source_id = buf.try_get_u32()?;
        let sequence = buf.try_get_u64()?;
        let send_time = Timestamp::from_micros(buf.try_get_u64()?);
        Ok(DataFrameHeader {
            source_id,
            sequence,
            send_time,
        })
    }
}
