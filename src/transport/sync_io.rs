use std::time::Duration;

use rusb::{DeviceHandle, UsbContext};

use crate::error::{Error, Result};
use crate::transport::{Flavor, DEFAULT_TIMEOUT};

/// A stateful binding to one opened device endpoint pair. Owned by the
/// session controller, released on close.
pub struct DeviceSession {
    handle: DeviceHandle<rusb::Context>,
    ep_in: u8,
    ep_out: u8,
    timeout: Duration,
    flavor: Flavor,
}

impl DeviceSession {
    pub fn new(handle: DeviceHandle<rusb::Context>, ep_in: u8, ep_out: u8, flavor: Flavor) -> Self {
        DeviceSession { handle, ep_in, ep_out, timeout: DEFAULT_TIMEOUT, flavor }
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn ep_in(&self) -> u8 {
        self.ep_in
    }

    pub fn ep_out(&self) -> u8 {
        self.ep_out
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn handle(&self) -> &DeviceHandle<rusb::Context> {
        &self.handle
    }

    pub fn context(&self) -> &rusb::Context {
        self.handle.context()
    }

    /// Wraps a single USB bulk OUT transfer. A short write (fewer bytes
    /// transferred than requested) is an `IoError` rather than looping to
    /// paper over it.
    pub fn bulk_send(&self, buf: &[u8], timeout: Duration) -> Result<()> {
        let n = self
            .handle
            .write_bulk(self.ep_out, buf, timeout)
            .map_err(|e| Error::IoError(format!("bulk write failed: {}", e)))?;
        if n != buf.len() {
            return Err(Error::IoError(format!("short write: sent {} of {} bytes", n, buf.len())));
        }
        Ok(())
    }

    /// Wraps a single USB bulk IN transfer into `buf`, returning the number
    /// of bytes actually transferred. Unlike `bulk_send`, a short read is not
    /// automatically an error here — callers that need an exact count (e.g.
    /// control packets) check it themselves; the Odin PIT empty-read quirk
    /// relies on being able to observe 0 bytes without an error.
    pub fn bulk_recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match self.handle.read_bulk(self.ep_in, buf, timeout) {
            Ok(n) => Ok(n),
            Err(rusb::Error::Timeout) => Ok(0),
            Err(e) => Err(Error::IoError(format!("bulk read failed: {}", e))),
        }
    }

    /// Like `bulk_recv`, but requires the full buffer to be filled.
    pub fn bulk_recv_exact(&self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let n = self.bulk_recv(buf, timeout)?;
        if n != buf.len() {
            return Err(Error::IoError(format!("short read: got {} of {} bytes", n, buf.len())));
        }
        Ok(())
    }
}

impl crate::transport::BulkTransport for DeviceSession {
    fn bulk_send(&self, buf: &[u8], timeout: Duration) -> Result<()> {
        DeviceSession::bulk_send(self, buf, timeout)
    }

    fn bulk_recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        DeviceSession::bulk_recv(self, buf, timeout)
    }

    fn flavor(&self) -> Flavor {
        self.flavor
    }
}
