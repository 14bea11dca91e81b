//! Bulk send/receive with timeouts, and the async transfer primitive the
//! pipelined sender drives.

pub mod async_io;
pub mod discover;
pub mod sync_io;

use std::time::Duration;

use crate::error::Result;

pub use async_io::{AsyncTransfer, Outcome};

/// Which protocol the bound device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Thor,
    Odin,
}

/// Default per-call timeout for control packets and out-transfers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(4000);
/// Timeout for data-response in-transfers: twice the default, because the
/// device may take extra time between chunks.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(8000);
/// Timeout for the Odin PIT tail empty-read quirk.
pub const PIT_EMPTY_READ_TIMEOUT: Duration = Duration::from_millis(1);

pub use sync_io::DeviceSession;

/// The synchronous control-packet surface the session controller and the PIT
/// dump receiver need. `DeviceSession` implements this against a real `rusb`
/// handle; tests implement it against an in-memory script, which is what
/// lets the state machine in `session` and the pull loop in `pit` be
/// exercised without a physical device.
pub trait BulkTransport {
    fn bulk_send(&self, buf: &[u8], timeout: Duration) -> Result<()>;
    fn bulk_recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    fn bulk_recv_exact(&self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let n = self.bulk_recv(buf, timeout)?;
        if n != buf.len() {
            return Err(crate::error::Error::IoError(format!("short read: got {} of {} bytes", n, buf.len())));
        }
        Ok(())
    }

    fn flavor(&self) -> Flavor;
}

/// A single in-flight async bulk transfer, abstracted away from the real
/// libusb transfer lifecycle so the pipelined sender can be driven against a
/// scripted mock in tests.
pub trait Transfer {
    fn poll(&self) -> Option<Outcome>;
    fn cancel(&self);
    fn buffer(&self) -> &[u8];
    fn buffer_mut(&mut self) -> &mut [u8];
}

/// Allocates and drives [`Transfer`]s on the bulk-in/bulk-out pair. The real
/// implementation (`async_io::RusbDriver`) submits libusb transfers against a
/// `DeviceSession`; a test mock can instead script completions synchronously
/// inside `pump`.
pub trait BulkDriver {
    type Transfer: Transfer;

    fn alloc(&self, size: usize) -> Result<Self::Transfer>;
    fn submit_out(&self, transfer: &mut Self::Transfer, timeout: Duration) -> Result<()>;
    fn submit_in(&self, transfer: &mut Self::Transfer, timeout: Duration) -> Result<()>;
    fn pump(&self, timeout: Duration) -> Result<()>;
}
