use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

pub const REQUEST_SIZE: usize = 1024;
pub const RESPONSE_SIZE: usize = 8;

/// A packed Odin request: `id`, `subid` and a single payload word, at offsets
/// 0, 4 and 8 of a 1024-byte buffer, zero elsewhere.
pub struct OdinRequest;

/// An unpacked Odin response: the echoed `id` and a single payload word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OdinResponse {
    pub id: u32,
    pub word: u32,
}

impl OdinRequest {
    fn pack(expected_id: u32, id: u32, subid: u32, word: u32) -> Result<[u8; REQUEST_SIZE]> {
        if id != expected_id {
            return Err(Error::InvalidArgument(format!(
                "odin request id {:#x} does not match expected {:#x}",
                id, expected_id
            )));
        }
        let mut buf = [0u8; REQUEST_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], id);
        LittleEndian::write_u32(&mut buf[4..8], subid);
        LittleEndian::write_u32(&mut buf[8..12], word);
        Ok(buf)
    }

    /// DL-INIT. `word` is `xfer_size` (0 when negotiating, the chosen unit in
    /// the device's echoed response).
    pub fn pack_dl_init(id: u32, subid: u32, xfer_size: u32) -> Result<[u8; REQUEST_SIZE]> {
        Self::pack(crate::proto_ids::odin_id::DL_INIT, id, subid, xfer_size)
    }

    /// DL-END. `word` is an unused field, always zero on the wire.
    pub fn pack_dl_end(id: u32, subid: u32, unknown: u32) -> Result<[u8; REQUEST_SIZE]> {
        Self::pack(crate::proto_ids::odin_id::DL_END, id, subid, unknown)
    }

    /// PIT. `word` is `part_off` for `PART` requests, unused otherwise.
    pub fn pack_pit(id: u32, subid: u32, part_off: u32) -> Result<[u8; REQUEST_SIZE]> {
        Self::pack(crate::proto_ids::odin_id::PIT, id, subid, part_off)
    }
}

impl OdinResponse {
    fn unpack(buf: &[u8], expected_id: u32) -> Result<Self> {
        if buf.len() < RESPONSE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "odin response buffer is {} bytes, need {}",
                buf.len(),
                RESPONSE_SIZE
            )));
        }
        let id = LittleEndian::read_u32(&buf[0..4]);
        if id != expected_id {
            return Err(Error::FramingError(format!(
                "odin response id {:#x} does not match expected {:#x}",
                id, expected_id
            )));
        }
        let word = LittleEndian::read_u32(&buf[4..8]);
        Ok(OdinResponse { id, word })
    }

    /// Unpacks a DL-INIT response; `word` is the device-chosen `xfer_size`.
    pub fn unpack_dl_init(buf: &[u8]) -> Result<Self> {
        Self::unpack(buf, crate::proto_ids::odin_id::DL_INIT)
    }

    /// Unpacks a DL-END response.
    pub fn unpack_dl_end(buf: &[u8]) -> Result<Self> {
        Self::unpack(buf, crate::proto_ids::odin_id::DL_END)
    }

    /// Unpacks a PIT response; `word` is `total_len` for a DUMP request.
    pub fn unpack_pit(buf: &[u8]) -> Result<Self> {
        Self::unpack(buf, crate::proto_ids::odin_id::PIT)
    }
}
