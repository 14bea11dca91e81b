//! Pipelined bulk sender: exactly three chunks in flight at once, each
//! paired with its own data-response acknowledgement.
//!
//! An out-transfer carries one chunk's body, matched with an in-transfer
//! reading that chunk's 8-byte ack, both submitted together. A chunk is
//! only safe to refill once *both* legs have completed.
//!
//! Generic over [`BulkDriver`] rather than a concrete `DeviceSession` so this
//! module can be driven against a scripted mock (see `tests/engine.rs`)
//! instead of a real USB device.

use crate::codec::thor::{DataResponse, DATA_RESPONSE_SIZE};
use crate::error::{Error, Result};
use crate::source::DataSource;
use crate::transport::{BulkDriver, Outcome, Transfer, DEFAULT_TIMEOUT, RESPONSE_TIMEOUT};

/// Number of chunks kept in flight simultaneously. Fixed by the protocol,
/// not configurable.
const WINDOW: usize = 3;

struct Chunk<T: Transfer> {
    data_transfer: T,
    resp_transfer: T,
    useful_size: usize,
    chunk_number: i32,
    data_finished: bool,
    resp_finished: bool,
}

impl<T: Transfer> Chunk<T> {
    fn new<D: BulkDriver<Transfer = T>>(driver: &D, trans_unit_size: usize) -> Result<Self> {
        Ok(Chunk {
            data_transfer: driver.alloc(trans_unit_size)?,
            resp_transfer: driver.alloc(DATA_RESPONSE_SIZE)?,
            useful_size: 0,
            chunk_number: 0,
            data_finished: true,
            resp_finished: true,
        })
    }

    fn is_idle(&self) -> bool {
        self.data_finished && self.resp_finished
    }
}

struct TransferState {
    data_left: u64,
    data_in_progress: u64,
    data_sent: u64,
    next_chunk_number: i32,
    completed: bool,
    ret: Option<Error>,
}

fn read_exact_from_source(source: &mut dyn DataSource, buf: &mut [u8]) -> Result<()> {
    let mut off = 0;
    while off < buf.len() {
        let n = source.read(&mut buf[off..])?;
        if n == 0 {
            return Err(Error::FramingError(format!(
                "data source exhausted with {} bytes still expected",
                buf.len() - off
            )));
        }
        off += n;
    }
    Ok(())
}

/// Drives a pipelined send of exactly `total_len` bytes pulled from `source`,
/// in `trans_unit_size`-byte chunks, over `driver`. `on_progress` is called
/// after each chunk is acknowledged with `(bytes_sent, bytes_left, chunk_number)`.
pub fn send_raw_data<D: BulkDriver>(
    driver: &D,
    source: &mut dyn DataSource,
    total_len: u64,
    trans_unit_size: u32,
    mut on_progress: impl FnMut(u64, u64, i32),
) -> Result<()> {
    if trans_unit_size == 0 {
        return Err(Error::InvalidArgument("transfer unit size must be nonzero".to_string()));
    }
    let unit = trans_unit_size as usize;

    let mut chunks = Vec::with_capacity(WINDOW);
    for _ in 0..WINDOW {
        chunks.push(Chunk::new(driver, unit)?);
    }

    let mut state = TransferState {
        data_left: total_len,
        data_in_progress: 0,
        data_sent: 0,
        next_chunk_number: 1,
        completed: false,
        ret: None,
    };

    for i in 0..WINDOW {
        if state.data_left - state.data_in_progress == 0 {
            break;
        }
        if let Err(e) = prep_next_chunk(&mut chunks[i], &mut state, source, driver, unit) {
            state.ret = Some(e);
            break;
        }
    }

    // Edge case: nothing to send. No chunk was primed above, so nothing will
    // ever drive `completed`; the driver loop must not spin forever.
    if state.ret.is_none() && state.data_in_progress == 0 && state.data_left == 0 {
        state.completed = true;
    }

    if state.ret.is_none() {
        while !state.completed {
            driver.pump(DEFAULT_TIMEOUT)?;
            poll_all(&mut chunks, &mut state, source, driver, unit, &mut on_progress)?;
        }
    }

    if state.data_in_progress != 0 {
        for chunk in chunks.iter() {
            chunk.data_transfer.cancel();
            chunk.resp_transfer.cancel();
        }
        while state.data_in_progress != 0 {
            driver.pump(DEFAULT_TIMEOUT)?;
            poll_all(&mut chunks, &mut state, source, driver, unit, &mut on_progress)?;
        }
    }

    match state.ret {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn poll_all<D: BulkDriver>(
    chunks: &mut [Chunk<D::Transfer>],
    state: &mut TransferState,
    source: &mut dyn DataSource,
    driver: &D,
    unit: usize,
    on_progress: &mut impl FnMut(u64, u64, i32),
) -> Result<()> {
    for i in 0..chunks.len() {
        if !chunks[i].data_finished {
            if let Some(outcome) = chunks[i].data_transfer.poll() {
                on_data_finished(chunks, i, outcome, state, source, driver, unit);
            }
        }
        if !chunks[i].resp_finished {
            if let Some(outcome) = chunks[i].resp_transfer.poll() {
                on_resp_finished(chunks, i, outcome, state, source, driver, unit, on_progress);
            }
        }
    }
    Ok(())
}

fn on_data_finished<D: BulkDriver>(
    chunks: &mut [Chunk<D::Transfer>],
    i: usize,
    outcome: Outcome,
    state: &mut TransferState,
    source: &mut dyn DataSource,
    driver: &D,
    unit: usize,
) {
    chunks[i].data_finished = true;

    if matches!(outcome, Outcome::Cancelled) || state.ret.is_some() {
        return;
    }
    if let Outcome::Failed(msg) = outcome {
        state.ret = Some(Error::IoError(msg));
        state.completed = true;
        return;
    }
    if chunks[i].resp_finished {
        check_next_chunk(chunks, i, state, source, driver, unit);
    }
}

fn on_resp_finished<D: BulkDriver>(
    chunks: &mut [Chunk<D::Transfer>],
    i: usize,
    outcome: Outcome,
    state: &mut TransferState,
    source: &mut dyn DataSource,
    driver: &D,
    unit: usize,
    on_progress: &mut impl FnMut(u64, u64, i32),
) {
    chunks[i].resp_finished = true;
    state.data_in_progress -= chunks[i].useful_size as u64;

    if matches!(outcome, Outcome::Cancelled) || state.ret.is_some() {
        if state.data_in_progress == 0 {
            state.completed = true;
        }
        return;
    }
    if let Outcome::Failed(msg) = outcome {
        state.ret = Some(Error::IoError(msg));
        state.completed = true;
        return;
    }

    let resp = match DataResponse::decode(chunks[i].resp_transfer.buffer()) {
        Ok(r) => r,
        Err(e) => {
            state.ret = Some(e);
            state.completed = true;
            return;
        }
    };
    if resp.cnt != chunks[i].chunk_number {
        state.ret = Some(Error::FramingError(format!(
            "data-response sequence mismatch: expected {}, got {}",
            chunks[i].chunk_number, resp.cnt
        )));
        state.completed = true;
        return;
    }

    state.data_sent += chunks[i].useful_size as u64;
    state.data_left -= chunks[i].useful_size as u64;
    on_progress(state.data_sent, state.data_left, chunks[i].chunk_number);

    if chunks[i].data_finished {
        check_next_chunk(chunks, i, state, source, driver, unit);
    }
}

fn check_next_chunk<D: BulkDriver>(
    chunks: &mut [Chunk<D::Transfer>],
    i: usize,
    state: &mut TransferState,
    source: &mut dyn DataSource,
    driver: &D,
    unit: usize,
) {
    if state.data_left - state.data_in_progress > 0 {
        if let Err(e) = prep_next_chunk(&mut chunks[i], state, source, driver, unit) {
            state.ret = Some(e);
            state.completed = true;
        }
    } else if state.data_in_progress == 0 {
        state.completed = true;
    }
}

fn prep_next_chunk<D: BulkDriver>(
    chunk: &mut Chunk<D::Transfer>,
    state: &mut TransferState,
    source: &mut dyn DataSource,
    driver: &D,
    unit: usize,
) -> Result<()> {
    let to_read = state.data_left - state.data_in_progress;
    if to_read == 0 {
        return Err(Error::InvalidArgument("prep_next_chunk called with nothing left to send".to_string()));
    }
    let useful_size = std::cmp::min(to_read, unit as u64) as usize;

    read_exact_from_source(source, &mut chunk.data_transfer.buffer_mut()[..useful_size])?;
    for b in &mut chunk.data_transfer.buffer_mut()[useful_size..] {
        *b = 0;
    }
    for b in chunk.resp_transfer.buffer_mut().iter_mut() {
        *b = 0;
    }

    chunk.useful_size = useful_size;
    chunk.chunk_number = state.next_chunk_number;
    state.next_chunk_number += 1;
    chunk.data_finished = false;
    chunk.resp_finished = false;

    driver.submit_out(&mut chunk.data_transfer, DEFAULT_TIMEOUT)?;
    if let Err(e) = driver.submit_in(&mut chunk.resp_transfer, RESPONSE_TIMEOUT) {
        chunk.data_transfer.cancel();
        return Err(e);
    }

    state.data_in_progress += useful_size as u64;
    Ok(())
}
