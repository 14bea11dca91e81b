use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Maximum number of int fields a Thor request may carry.
pub const MAX_INTS: usize = 14;
/// Maximum number of string fields a Thor request may carry.
pub const MAX_STRS: usize = 5;
/// Width in bytes of a single string field.
pub const STR_LEN: usize = 32;

pub const REQUEST_SIZE: usize = 1024;
pub const RESPONSE_SIZE: usize = 4 + 4 + 4 + 5 * 4 + 3 * STR_LEN;
pub const DATA_RESPONSE_SIZE: usize = 8;

const RESP_STRS: usize = 3;
const RESP_INTS: usize = 5;

/// A decoded Thor response packet. `ack == 0` means success; any other value is
/// a device-level error the session controller surfaces verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    pub id: i32,
    pub sub_id: i32,
    pub ack: i32,
    pub int_data: [i32; RESP_INTS],
    pub str_data: [[u8; STR_LEN]; RESP_STRS],
}

/// A decoded data-response: the 8-byte ack paired with each body chunk.
/// `cnt` is the 1-based sequence number of the chunk being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataResponse {
    pub ack: i32,
    pub cnt: i32,
}

/// An encoded Thor request, always exactly [`REQUEST_SIZE`] bytes on the wire.
pub struct RequestPacket;

impl RequestPacket {
    /// Builds a request packet. `ints` and `strs` must not exceed [`MAX_INTS`]
    /// and [`MAX_STRS`] respectively; each string must be at most 31 bytes so it
    /// fits NUL-terminated in a 32-byte field. The MD5 field is reserved and
    /// always emitted as zeros.
    pub fn encode(group: i32, sub_id: i32, ints: &[i32], strs: &[&[u8]]) -> Result<[u8; REQUEST_SIZE]> {
        if ints.len() > MAX_INTS {
            return Err(Error::InvalidArgument(format!(
                "request carries {} ints, max is {}",
                ints.len(),
                MAX_INTS
            )));
        }
        if strs.len() > MAX_STRS {
            return Err(Error::InvalidArgument(format!(
                "request carries {} strings, max is {}",
                strs.len(),
                MAX_STRS
            )));
        }
        for s in strs {
            if s.len() > STR_LEN - 1 {
                return Err(Error::InvalidArgument(format!(
                    "string field {} bytes long, max is {}",
                    s.len(),
                    STR_LEN - 1
                )));
            }
        }

        let mut buf = [0u8; REQUEST_SIZE];
        LittleEndian::write_i32(&mut buf[0..4], group);
        LittleEndian::write_i32(&mut buf[4..8], sub_id);

        for (i, v) in ints.iter().enumerate() {
            let off = 8 + i * 4;
            LittleEndian::write_i32(&mut buf[off..off + 4], *v);
        }

        let str_base = 8 + MAX_INTS * 4;
        for (i, s) in strs.iter().enumerate() {
            let off = str_base + i * STR_LEN;
            buf[off..off + s.len()].copy_from_slice(s);
            // remainder of the field (including the NUL terminator) is already zero
        }

        // md5 field and the rest of the 1024-byte frame stay zero-filled.
        Ok(buf)
    }
}

impl ResponsePacket {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RESPONSE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "response buffer is {} bytes, need at least {}",
                buf.len(),
                RESPONSE_SIZE
            )));
        }
        let id = LittleEndian::read_i32(&buf[0..4]);
        let sub_id = LittleEndian::read_i32(&buf[4..8]);
        let ack = LittleEndian::read_i32(&buf[8..12]);
        let mut int_data = [0i32; RESP_INTS];
        for (i, slot) in int_data.iter_mut().enumerate() {
            let off = 12 + i * 4;
            *slot = LittleEndian::read_i32(&buf[off..off + 4]);
        }
        let str_base = 12 + RESP_INTS * 4;
        let mut str_data = [[0u8; STR_LEN]; RESP_STRS];
        for (i, slot) in str_data.iter_mut().enumerate() {
            let off = str_base + i * STR_LEN;
            slot.copy_from_slice(&buf[off..off + STR_LEN]);
        }
        Ok(ResponsePacket { id, sub_id, ack, int_data, str_data })
    }
}

impl DataResponse {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < DATA_RESPONSE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "data-response buffer is {} bytes, need {}",
                buf.len(),
                DATA_RESPONSE_SIZE
            )));
        }
        let ack = LittleEndian::read_i32(&buf[0..4]);
        let cnt = LittleEndian::read_i32(&buf[4..8]);
        Ok(DataResponse { ack, cnt })
    }
}
