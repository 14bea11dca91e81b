//! Odin PIT dump receiver: a simpler pull loop than the pipelined sender —
//! request a part, read exactly one chunk, repeat until the advertised
//! length is exhausted, then send the transfer-end marker.

use crate::codec::odin::{OdinRequest, OdinResponse, RESPONSE_SIZE};
use crate::error::{Error, Result};
use crate::proto_ids::{odin_id, odin_xfer};
use crate::source::DataSink;
use crate::transport::{BulkTransport, DEFAULT_TIMEOUT, PIT_EMPTY_READ_TIMEOUT};

/// Fixed bulk-read unit for the PIT dump path: empirically observed, and
/// independent of the transfer unit negotiated for ordinary file bodies.
pub const PIT_CHUNK_SIZE: u64 = 500;

/// Requests the device's partition table and streams it into `sink`.
/// `on_progress` is called after each chunk with `(bytes_received, bytes_left)`.
pub fn dump_pit<D: BulkTransport>(
    device: &D,
    sink: &mut dyn DataSink,
    mut on_progress: impl FnMut(u64, u64),
) -> Result<()> {
    let req = OdinRequest::pack_pit(odin_id::PIT, odin_xfer::DUMP, 0)?;
    device.bulk_send(&req, DEFAULT_TIMEOUT)?;
    let mut buf = [0u8; RESPONSE_SIZE];
    device.bulk_recv_exact(&mut buf, DEFAULT_TIMEOUT)?;
    let resp = OdinResponse::unpack_pit(&buf)?;
    let total_len = resp.word as u64;
    sink.set_length(total_len)?;

    let mut data_left = total_len;
    let mut part_off: u32 = 0;
    while data_left > 0 {
        let req = OdinRequest::pack_pit(odin_id::PIT, odin_xfer::PART, part_off)?;
        device.bulk_send(&req, DEFAULT_TIMEOUT)?;

        let this_chunk = std::cmp::min(data_left, PIT_CHUNK_SIZE) as usize;
        let mut payload = vec![0u8; this_chunk];
        device.bulk_recv_exact(&mut payload, DEFAULT_TIMEOUT)?;
        sink.write(&payload)?;

        data_left -= this_chunk as u64;
        on_progress(total_len - data_left, data_left);
        part_off = part_off
            .checked_add(1)
            .ok_or_else(|| Error::Unsupported("PIT dump exceeded the part-offset counter's range".to_string()))?;
    }

    // Some bootloaders (Galaxy Tab S2) require an empty bulk-in before they
    // process end-pit-dump; others (Galaxy S8) don't. Ignore the result.
    let mut empty: [u8; 0] = [];
    let _ = device.bulk_recv(&mut empty, PIT_EMPTY_READ_TIMEOUT);

    let req = OdinRequest::pack_pit(odin_id::PIT, odin_xfer::XFER_END, 0)?;
    device.bulk_send(&req, DEFAULT_TIMEOUT)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Flavor;
    use byteorder::{ByteOrder, LittleEndian};
    use std::cell::RefCell;
    use std::time::Duration;

    struct MockDevice {
        flavor: Flavor,
        sent: RefCell<Vec<Vec<u8>>>,
        total_len: u32,
        data: Vec<u8>,
    }

    impl BulkTransport for MockDevice {
        fn bulk_send(&self, buf: &[u8], _timeout: Duration) -> Result<()> {
            self.sent.borrow_mut().push(buf.to_vec());
            Ok(())
        }

        fn bulk_recv(&self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            let sent = self.sent.borrow();
            let last = sent.last().expect("recv before any send");
            let id = LittleEndian::read_u32(&last[0..4]);
            let subid = LittleEndian::read_u32(&last[4..8]);
            if id != odin_id::PIT {
                return Ok(0);
            }
            if subid == odin_xfer::DUMP {
                if buf.len() < RESPONSE_SIZE {
                    return Ok(0);
                }
                LittleEndian::write_u32(&mut buf[0..4], odin_id::PIT);
                LittleEndian::write_u32(&mut buf[4..8], self.total_len);
                Ok(RESPONSE_SIZE)
            } else if subid == odin_xfer::PART {
                let part_off = LittleEndian::read_u32(&last[8..12]) as usize;
                let off = part_off * PIT_CHUNK_SIZE as usize;
                let n = std::cmp::min(buf.len(), self.data.len().saturating_sub(off));
                buf[..n].copy_from_slice(&self.data[off..off + n]);
                Ok(n)
            } else {
                // XFER_END and the tail empty-read: nothing to deliver.
                Ok(0)
            }
        }

        fn flavor(&self) -> Flavor {
            self.flavor
        }
    }

    struct VecSink {
        buf: Vec<u8>,
        cursor: usize,
    }

    impl DataSink for VecSink {
        fn set_length(&mut self, n: u64) -> Result<()> {
            self.buf = vec![0u8; n as usize];
            self.cursor = 0;
            Ok(())
        }

        fn write(&mut self, buf: &[u8]) -> Result<()> {
            self.buf[self.cursor..self.cursor + buf.len()].copy_from_slice(buf);
            self.cursor += buf.len();
            Ok(())
        }
    }

    #[test]
    fn pit_dump_ten_chunks_then_xfer_end() {
        let total = 5000u32;
        let data: Vec<u8> = (0..total).map(|i| (i % 256) as u8).collect();
        let device = MockDevice { flavor: Flavor::Odin, sent: RefCell::new(Vec::new()), total_len: total, data };
        let mut sink = VecSink { buf: Vec::new(), cursor: 0 };

        let mut progress_calls = 0;
        dump_pit(&device, &mut sink, |_, _| progress_calls += 1).unwrap();

        assert_eq!(progress_calls, 10);
        assert_eq!(sink.buf.len(), 5000);
        assert_eq!(sink.buf, device_data(&device));

        let sent = device.sent.borrow();
        assert_eq!(sent.len(), 1 + 10 + 1); // DUMP, ten PARTs, XFER_END
        assert_eq!(LittleEndian::read_u32(&sent[0][4..8]), odin_xfer::DUMP);
        for (i, req) in sent[1..11].iter().enumerate() {
            assert_eq!(LittleEndian::read_u32(&req[4..8]), odin_xfer::PART);
            assert_eq!(LittleEndian::read_u32(&req[8..12]), i as u32);
        }
        assert_eq!(LittleEndian::read_u32(&sent[11][4..8]), odin_xfer::XFER_END);
    }

    fn device_data(device: &MockDevice) -> Vec<u8> {
        device.data.clone()
    }
}
