//! Drives the session controller across a list of images: opens the device
//! (handed in by the caller), collects sources, aggregates total size,
//! enforces the size thresholds, then runs
//! start_session/file_info/file_start/body/file_end per source, end_session,
//! reboot.
//!
//! Images upload PIT first, then tar archives in argument order. Throughput
//! is tracked with `std::time::Instant` rather than a wall-clock syscall.

use std::time::Instant;

use crate::error::{Error, Result};
use crate::pipeline;
use crate::proto_ids::data_type;
use crate::session::SessionController;
use crate::source::DataSource;
use crate::transport::async_io::RusbDriver;
use crate::transport::DeviceSession;

/// Files larger than this are rejected outright (4 GiB − 1 KiB).
pub const MAX_IMAGE_BYTES: u64 = 4 * 1024 * 1024 * 1024 - 1024;
/// Files larger than this produce a warning, not an error (2 GiB − 1 KiB).
pub const WARN_IMAGE_BYTES: u64 = 2 * 1024 * 1024 * 1024 - 1024;

/// One image to upload: a source plus the `FILE_INFO` data-type tag it
/// should be sent under (`data_type::PIT` for a raw PIT file, `NORMAL`
/// otherwise).
pub struct Image {
    pub source: Box<dyn DataSource>,
    pub data_type: i32,
}

impl Image {
    pub fn normal(source: Box<dyn DataSource>) -> Self {
        Image { source, data_type: data_type::NORMAL }
    }

    pub fn pit(source: Box<dyn DataSource>) -> Self {
        Image { source, data_type: data_type::PIT }
    }
}

/// A progress sample handed to the orchestrator's caller after every
/// acknowledged chunk.
#[derive(Debug, Clone)]
pub struct Progress<'a> {
    pub file_name: &'a str,
    pub file_sent: u64,
    pub file_total: u64,
    pub overall_sent: u64,
    pub overall_total: u64,
    pub instantaneous_mbps: f64,
    pub average_mbps: f64,
}

/// Rejects oversized totals before any device I/O, and warns above the
/// firmware-quirk threshold.
pub fn check_total_size(total: u64) -> Result<()> {
    if total > MAX_IMAGE_BYTES {
        return Err(Error::Unsupported(format!(
            "total image size {} bytes exceeds the {} byte limit",
            total, MAX_IMAGE_BYTES
        )));
    }
    if total > WARN_IMAGE_BYTES {
        log::warn!(
            "total image size {} bytes exceeds {} bytes; some bootloaders mishandle images this large",
            total,
            WARN_IMAGE_BYTES
        );
    }
    Ok(())
}

/// Tracks instantaneous and average throughput from a monotonic clock.
struct RateTracker {
    start: Instant,
    last_tick: Instant,
    last_bytes: u64,
}

impl RateTracker {
    fn new() -> Self {
        let now = Instant::now();
        RateTracker { start: now, last_tick: now, last_bytes: 0 }
    }

    fn sample(&mut self, bytes_now: u64) -> (f64, f64) {
        let now = Instant::now();
        let inst_elapsed = now.duration_since(self.last_tick).as_secs_f64().max(1e-6);
        let inst_mbps = (bytes_now.saturating_sub(self.last_bytes)) as f64 / inst_elapsed / 1_000_000.0;
        let avg_elapsed = now.duration_since(self.start).as_secs_f64().max(1e-6);
        let avg_mbps = bytes_now as f64 / avg_elapsed / 1_000_000.0;
        self.last_tick = now;
        self.last_bytes = bytes_now;
        (inst_mbps, avg_mbps)
    }
}

/// Drives `session` through the full flashing run: handshake, start-session,
/// every image's file-info/file-start/body/file-end, end-session, reboot.
///
/// Tied to the real [`DeviceSession`] rather than generic over
/// [`BulkTransport`]: the pipelined body transfer needs a
/// [`transport::async_io::RusbDriver`] borrowing the same device, and a
/// lifetime-generic driver factory would need a higher-ranked closure bound
/// (effectively a GAT) for no real benefit here. The pipelined sender and
/// session controller — the testable parts of the engine — stay generic and
/// are exercised against mocks directly.
pub fn run(
    session: &mut SessionController<DeviceSession>,
    mut images: Vec<Image>,
    mut on_progress: impl FnMut(Progress),
) -> Result<()> {
    let total: u64 = images.iter().map(|img| img.source.total_size()).sum();
    check_total_size(total)?;

    session.handshake()?;
    session.start_session(total as i64)?;

    let mut tracker = RateTracker::new();
    let mut overall_sent: u64 = 0;

    for image in images.iter_mut() {
        while image.source.next_entry()? {
            let name = image.source.name().to_string();
            let length = image.source.length();
            log::info!("uploading '{}' ({} bytes)", name, length);

            let unit = session.file_info(image.data_type, length, &name)?;
            let file_start_sent = overall_sent;

            {
                let driver = RusbDriver::new(session.device());
                pipeline::send_raw_data(&driver, image.source.as_mut(), length, unit, |sent, _left, chunk_number| {
                    let (instantaneous_mbps, average_mbps) = tracker.sample(file_start_sent + sent);
                    log::trace!("'{}' chunk {} acked, {} of {} bytes sent", name, chunk_number, sent, length);
                    on_progress(Progress {
                        file_name: &name,
                        file_sent: sent,
                        file_total: length,
                        overall_sent: file_start_sent + sent,
                        overall_total: total,
                        instantaneous_mbps,
                        average_mbps,
                    });
                })?;
            }

            overall_sent = file_start_sent + length;
            session.file_end()?;
            log::info!("'{}' complete", name);
        }
    }

    session.end_session()?;
    session.reboot()?;
    Ok(())
}
