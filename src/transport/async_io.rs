//! The asynchronous bulk transfer primitive the pipelined sender is built on:
//! submit, a completion callback, cancel, cleanup.
//!
//! Modeled on the real libusb async-transfer lifecycle — see the retrieved
//! `rusb`-based reference transfer implementation, which allocates a raw
//! `libusb_transfer` via `libusb_alloc_transfer`, fills it with
//! `libusb_fill_bulk_transfer`, submits it, and recovers shared state in an
//! `extern "system"` completion callback via a round-tripped `Arc` pointer.
//! That reference targets a multi-threaded async executor and so guards its
//! shared state with `Arc<Mutex<_>>` plus a `Waker`. The engine here runs a
//! single-threaded cooperative model: every callback fires on the one thread
//! pumping `libusb_handle_events_timeout`, so a plain `Rc<RefCell<_>>` is
//! enough and nothing needs a lock.

use std::cell::RefCell;
use std::os::raw::c_void;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Duration;

use rusb::constants::{
    LIBUSB_TRANSFER_CANCELLED, LIBUSB_TRANSFER_COMPLETED, LIBUSB_TRANSFER_ERROR,
    LIBUSB_TRANSFER_NO_DEVICE, LIBUSB_TRANSFER_OVERFLOW, LIBUSB_TRANSFER_STALL,
    LIBUSB_TRANSFER_TIMED_OUT,
};
use rusb::ffi::{
    libusb_alloc_transfer, libusb_cancel_transfer, libusb_fill_bulk_transfer,
    libusb_free_transfer, libusb_handle_events_timeout, libusb_submit_transfer, libusb_transfer,
};
use rusb::UsbContext;

use crate::error::{Error, Result};

/// Terminal outcome of a submitted transfer.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed { actual_length: usize },
    Cancelled,
    Failed(String),
}

#[derive(Debug)]
enum State {
    Pending,
    Done(Outcome),
}

struct Shared {
    state: State,
}

extern "system" fn on_complete(transfer_ptr: *mut libusb_transfer) {
    if transfer_ptr.is_null() {
        return;
    }
    // SAFETY: transfer_ptr is non-null and was filled by `AsyncTransfer::submit`,
    // which always sets user_data to a pointer obtained from `Rc::into_raw`.
    let transfer: &mut libusb_transfer = unsafe { &mut *transfer_ptr };
    let user_data = transfer.user_data;
    if user_data.is_null() {
        return;
    }
    let shared = unsafe { Rc::from_raw(user_data as *const RefCell<Shared>) };
    let outcome = match transfer.status {
        LIBUSB_TRANSFER_COMPLETED => Outcome::Completed { actual_length: transfer.actual_length as usize },
        LIBUSB_TRANSFER_CANCELLED => Outcome::Cancelled,
        LIBUSB_TRANSFER_TIMED_OUT => Outcome::Failed("transfer timed out".to_string()),
        LIBUSB_TRANSFER_STALL => Outcome::Failed("endpoint stalled".to_string()),
        LIBUSB_TRANSFER_NO_DEVICE => Outcome::Failed("device disconnected".to_string()),
        LIBUSB_TRANSFER_OVERFLOW => Outcome::Failed("transfer overflowed".to_string()),
        LIBUSB_TRANSFER_ERROR => Outcome::Failed("transfer error".to_string()),
        other => Outcome::Failed(format!("unexpected libusb transfer status {}", other)),
    };
    shared.borrow_mut().state = State::Done(outcome);
    // shared is dropped here, releasing the reference this callback held;
    // the submitter's own Rc keeps the Shared alive until it observes Done.
}

/// A single in-flight bulk transfer. Submit once, poll [`poll`](Self::poll)
/// from the driver loop after pumping events, [`cancel`](Self::cancel)
/// cooperatively, then [`cleanup`](Self::cleanup) once a terminal outcome has
/// been observed.
pub struct AsyncTransfer {
    transfer: NonNull<libusb_transfer>,
    shared: Rc<RefCell<Shared>>,
    buffer: Box<[u8]>,
    submitted: bool,
}

impl AsyncTransfer {
    /// Allocates a transfer for `buffer` against `endpoint`, but does not
    /// submit it yet.
    pub fn new(buffer: Box<[u8]>) -> Result<Self> {
        let ptr = unsafe { libusb_alloc_transfer(0) };
        let transfer = NonNull::new(ptr)
            .ok_or_else(|| Error::ResourceExhausted("libusb_alloc_transfer returned null".to_string()))?;
        Ok(AsyncTransfer {
            transfer,
            shared: Rc::new(RefCell::new(Shared { state: State::Pending })),
            buffer,
            submitted: false,
        })
    }

    /// Submits the transfer against `handle`'s `endpoint`, in or out
    /// depending on the endpoint's direction bit. A transfer may be
    /// resubmitted any number of times once its previous submission (if any)
    /// has reached a terminal state — the pipelined sender reuses its fixed
    /// pool of transfers across every chunk of a large file — which is why
    /// this replaces `shared` with a fresh `Pending` cell rather than asserting
    /// first use.
    pub fn submit<T: UsbContext>(&mut self, handle: &rusb::DeviceHandle<T>, endpoint: u8, timeout: Duration) -> Result<()> {
        self.shared = Rc::new(RefCell::new(Shared { state: State::Pending }));
        let state_ptr = Rc::into_raw(self.shared.clone()) as *mut c_void;
        let len = self.buffer.len() as i32;
        unsafe {
            libusb_fill_bulk_transfer(
                self.transfer.as_ptr(),
                handle.as_raw(),
                endpoint,
                self.buffer.as_mut_ptr(),
                len,
                on_complete,
                state_ptr,
                timeout.as_millis() as std::os::raw::c_uint,
            );
            let rc = libusb_submit_transfer(self.transfer.as_ptr());
            if rc != 0 {
                // the callback will never fire; reclaim the Rc we just leaked.
                drop(Rc::from_raw(state_ptr as *const RefCell<Shared>));
                return Err(Error::IoError(format!("libusb_submit_transfer failed: {}", rc)));
            }
        }
        self.submitted = true;
        Ok(())
    }

    /// Requests cancellation. A no-op if the transfer hasn't completed a
    /// submit, or has already reached a terminal state; the actual
    /// cancellation still completes asynchronously through the callback.
    pub fn cancel(&self) {
        if !self.submitted {
            return;
        }
        if matches!(self.shared.borrow().state, State::Pending) {
            unsafe {
                libusb_cancel_transfer(self.transfer.as_ptr());
            }
        }
    }

    /// Returns the terminal outcome, if the callback has already run.
    pub fn poll(&self) -> Option<Outcome> {
        match &self.shared.borrow().state {
            State::Pending => None,
            State::Done(outcome) => Some(outcome.clone()),
        }
    }

    /// Consumes the transfer, returning its buffer. Only valid once [`poll`]
    /// has returned `Some` — calling this on a still-pending transfer would
    /// free a buffer libusb may still be writing into.
    pub fn cleanup(mut self) -> Box<[u8]> {
        debug_assert!(
            !self.submitted || self.poll().is_some(),
            "cleanup called on a transfer that has not reached a terminal state"
        );
        std::mem::replace(&mut self.buffer, Vec::new().into_boxed_slice())
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

impl Drop for AsyncTransfer {
    fn drop(&mut self) {
        unsafe {
            libusb_free_transfer(self.transfer.as_ptr());
        }
    }
}

impl crate::transport::Transfer for AsyncTransfer {
    fn poll(&self) -> Option<Outcome> {
        AsyncTransfer::poll(self)
    }

    fn cancel(&self) {
        AsyncTransfer::cancel(self)
    }

    fn buffer(&self) -> &[u8] {
        AsyncTransfer::buffer(self)
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        AsyncTransfer::buffer_mut(self)
    }
}

/// [`crate::transport::BulkDriver`] over a real, opened device. Submits
/// out-transfers to `device.ep_out()` and in-transfers to `device.ep_in()`,
/// and pumps `device.context()`'s libusb event loop.
pub struct RusbDriver<'a> {
    pub device: &'a crate::transport::DeviceSession,
}

impl<'a> RusbDriver<'a> {
    pub fn new(device: &'a crate::transport::DeviceSession) -> Self {
        RusbDriver { device }
    }
}

impl<'a> crate::transport::BulkDriver for RusbDriver<'a> {
    type Transfer = AsyncTransfer;

    fn alloc(&self, size: usize) -> Result<Self::Transfer> {
        AsyncTransfer::new(vec![0u8; size].into_boxed_slice())
    }

    fn submit_out(&self, transfer: &mut Self::Transfer, timeout: Duration) -> Result<()> {
        transfer.submit(self.device.handle(), self.device.ep_out(), timeout)
    }

    fn submit_in(&self, transfer: &mut Self::Transfer, timeout: Duration) -> Result<()> {
        transfer.submit(self.device.handle(), self.device.ep_in(), timeout)
    }

    fn pump(&self, timeout: Duration) -> Result<()> {
        pump_events(self.device.context(), timeout)
    }
}

/// Pumps the libusb event loop once, with a bounded timeout, so completion
/// callbacks for any in-flight transfer on `ctx` get a chance to run.
pub fn pump_events<T: UsbContext>(ctx: &T, timeout: Duration) -> Result<()> {
    let tv = rusb::ffi::timeval {
        tv_sec: timeout.as_secs() as _,
        tv_usec: timeout.subsec_micros() as _,
    };
    let rc = unsafe { libusb_handle_events_timeout(ctx.as_raw(), &tv) };
    if rc != 0 {
        return Err(Error::IoError(format!("libusb_handle_events_timeout failed: {}", rc)));
    }
    Ok(())
}
