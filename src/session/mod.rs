//! Session state machine: handshake, start/end session, per-file envelope,
//! reboot. Exists in Thor and Odin flavors.

use log::{debug, trace};

use crate::codec::odin::{OdinRequest, OdinResponse};
use crate::codec::thor::{RequestPacket, ResponsePacket};
use crate::error::{Error, Result};
use crate::proto_ids::{cmd, dl, group, odin_dl_end, odin_dl_init, odin_id};
use crate::transport::{BulkTransport, Flavor, DEFAULT_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opened,
    Handshaked,
    InSession,
    InFile,
    Closed,
}

/// Drives a [`BulkTransport`] through the session state machine, converting
/// high-level calls into wire exchanges. Generic over the transport so the
/// state machine can be exercised against a scripted mock in tests as well
/// as a real `DeviceSession`.
pub struct SessionController<D: BulkTransport> {
    device: D,
    state: SessionState,
    /// The Odin DL-INIT-negotiated unit, reported for diagnostics; the unit
    /// actually used to size a file's chunks always comes from that file's
    /// `FILE_INFO` response (see DESIGN.md).
    odin_unit: Option<u32>,
}

impl<D: BulkTransport> SessionController<D> {
    pub fn new(device: D) -> Self {
        SessionController { device, state: SessionState::Opened, odin_unit: None }
    }

    pub fn flavor(&self) -> Flavor {
        self.device.flavor()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn require_state(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidArgument(format!(
                "session in state {:?}, operation requires {:?}",
                self.state, expected
            )));
        }
        Ok(())
    }

    /// Sends a Thor request and reads back a response packet. Does not
    /// inspect `ack` — callers decide whether a nonzero ack is fatal.
    fn exec(&self, group: i32, sub_id: i32, ints: &[i32], strs: &[&[u8]]) -> Result<ResponsePacket> {
        let req = RequestPacket::encode(group, sub_id, ints, strs)?;
        self.device.bulk_send(&req, DEFAULT_TIMEOUT)?;
        let mut buf = vec![0u8; crate::codec::thor::RESPONSE_SIZE];
        self.device.bulk_recv_exact(&mut buf, DEFAULT_TIMEOUT)?;
        let resp = ResponsePacket::decode(&buf)?;
        trace!("exec({}, {}) -> ack={}", group, sub_id, resp.ack);
        Ok(resp)
    }

    fn require_ack_zero(resp: &ResponsePacket) -> Result<()> {
        if resp.ack != 0 {
            return Err(Error::DeviceError(resp.ack));
        }
        Ok(())
    }

    /// Thor: send `THOR`, require `ROHT`. Odin: send `ODIN`, require `LOKE`.
    pub fn handshake(&mut self) -> Result<()> {
        self.require_state(SessionState::Opened)?;

        let (challenge, expected): (&[u8; 4], &[u8; 4]) = match self.flavor() {
            Flavor::Thor => (b"THOR", b"ROHT"),
            Flavor::Odin => (b"ODIN", b"LOKE"),
        };
        self.device.bulk_send(challenge, DEFAULT_TIMEOUT)?;
        let mut buf = [0u8; 4];
        self.device.bulk_recv_exact(&mut buf, DEFAULT_TIMEOUT)?;
        if &buf != expected {
            return Err(Error::InvalidArgument(format!(
                "handshake failed: expected {:?}, got {:?}",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(&buf)
            )));
        }
        debug!("handshake ok ({:?})", self.flavor());
        self.state = SessionState::Handshaked;
        Ok(())
    }

    /// Thor: `exec(DL, INIT, ints=[total_bytes])`. Odin: DL-INIT with subid
    /// `BEGIN`, `xfer_size=0`; the device's echoed `xfer_size` MUST be
    /// nonzero. Returns the Odin-negotiated unit, or `None` for Thor.
    pub fn start_session(&mut self, total_bytes: i64) -> Result<Option<u32>> {
        self.require_state(SessionState::Handshaked)?;

        let unit = match self.flavor() {
            Flavor::Thor => {
                let resp = self.exec(group::DL, dl::INIT, &[total_bytes as i32], &[])?;
                Self::require_ack_zero(&resp)?;
                None
            }
            Flavor::Odin => {
                let req = OdinRequest::pack_dl_init(odin_id::DL_INIT, odin_dl_init::BEGIN, 0)?;
                self.device.bulk_send(&req, DEFAULT_TIMEOUT)?;
                let mut buf = [0u8; crate::codec::odin::RESPONSE_SIZE];
                self.device.bulk_recv_exact(&mut buf, DEFAULT_TIMEOUT)?;
                let resp = OdinResponse::unpack_dl_init(&buf)?;
                if resp.word == 0 {
                    return Err(Error::FramingError("Odin DL-INIT returned xfer_size 0".to_string()));
                }
                Some(resp.word)
            }
        };
        self.odin_unit = unit;
        debug!("start_session ok, total_bytes={} odin_unit={:?}", total_bytes, unit);
        self.state = SessionState::InSession;
        Ok(unit)
    }

    /// The Odin DL-INIT-negotiated unit, if any (diagnostics only).
    pub fn odin_unit(&self) -> Option<u32> {
        self.odin_unit
    }

    /// `exec(DL, FILE_INFO, ints=[data_type, file_length], strs=[name])`.
    /// Returns the device-chosen transfer unit for this file's body.
    pub fn file_info(&mut self, type_tag: i32, length: u64, name: &str) -> Result<u32> {
        self.require_state(SessionState::InSession)?;
        if name.as_bytes().len() > 31 {
            return Err(Error::InvalidArgument(format!("entry name '{}' exceeds 31 bytes", name)));
        }
        let resp = self.exec(group::DL, dl::FILE_INFO, &[type_tag, length as i32], &[name.as_bytes()])?;
        Self::require_ack_zero(&resp)?;
        if resp.int_data[0] <= 0 {
            return Err(Error::FramingError(format!("device reported non-positive transfer unit {}", resp.int_data[0])));
        }
        let unit = resp.int_data[0] as u32;
        let resp = self.exec(group::DL, dl::FILE_START, &[], &[])?;
        Self::require_ack_zero(&resp)?;
        self.state = SessionState::InFile;
        Ok(unit)
    }

    /// `exec(DL, FILE_END)`.
    pub fn file_end(&mut self) -> Result<()> {
        self.require_state(SessionState::InFile)?;
        let resp = self.exec(group::DL, dl::FILE_END, &[], &[])?;
        Self::require_ack_zero(&resp)?;
        self.state = SessionState::InSession;
        Ok(())
    }

    /// Thor: `exec(DL, EXIT)`. Odin: DL-END with subid `REG`. A missing
    /// `DL_EXIT` response is logged as a warning, not fatal (quirk of some
    /// bootloaders).
    pub fn end_session(&mut self) -> Result<()> {
        self.require_state(SessionState::InSession)?;
        match self.flavor() {
            Flavor::Thor => match self.exec(group::DL, dl::EXIT, &[], &[]) {
                Ok(resp) => {
                    if resp.ack != 0 {
                        log::warn!("end_session: device returned ack={}", resp.ack);
                    }
                }
                Err(e) => log::warn!("end_session: no DL_EXIT response ({}), continuing", e),
            },
            Flavor::Odin => {
                let req = OdinRequest::pack_dl_end(odin_id::DL_END, odin_dl_end::REG, 0)?;
                if let Err(e) = self.device.bulk_send(&req, DEFAULT_TIMEOUT) {
                    log::warn!("end_session: DL-END send failed ({}), continuing", e);
                } else {
                    let mut buf = [0u8; crate::codec::odin::RESPONSE_SIZE];
                    if let Err(e) = self.device.bulk_recv_exact(&mut buf, DEFAULT_TIMEOUT) {
                        log::warn!("end_session: no DL-END response ({}), continuing", e);
                    }
                }
            }
        }
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Thor: `exec(CMD, REBOOT)`. Odin: DL-END with subid `REBOOT`.
    pub fn reboot(&mut self) -> Result<()> {
        match self.flavor() {
            Flavor::Thor => {
                let resp = self.exec(group::CMD, cmd::REBOOT, &[], &[])?;
                Self::require_ack_zero(&resp)?;
            }
            Flavor::Odin => {
                let req = OdinRequest::pack_dl_end(odin_id::DL_END, odin_dl_end::REBOOT, 0)?;
                self.device.bulk_send(&req, DEFAULT_TIMEOUT)?;
                let mut buf = [0u8; crate::codec::odin::RESPONSE_SIZE];
                // Some bootloaders drop the link as soon as they see REBOOT; a
                // missing response here is not treated as fatal either.
                let _ = self.device.bulk_recv_exact(&mut buf, DEFAULT_TIMEOUT);
            }
        }
        Ok(())
    }
}
