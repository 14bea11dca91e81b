//! End-to-end tests against in-memory mocks: the session state machine
//! against a scripted [`BulkTransport`], and the pipelined sender against a
//! scripted [`BulkDriver`]. Neither touches a real USB device or the
//! toolchain's libusb vendoring.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};

use thor_flash::codec::thor::RESPONSE_SIZE as THOR_RESPONSE_SIZE;
use thor_flash::error::Error;
use thor_flash::pipeline::send_raw_data;
use thor_flash::proto_ids::{cmd, dl, group, odin_id};
use thor_flash::session::SessionController;
use thor_flash::transport::{BulkDriver, BulkTransport, Flavor, Outcome, Transfer};

// ---------------------------------------------------------------------
// Session-level mock: a scripted response queue over `BulkTransport`.
// ---------------------------------------------------------------------

struct ScriptedTransport {
    flavor: Flavor,
    responses: RefCell<VecDeque<Vec<u8>>>,
    sent: RefCell<Vec<Vec<u8>>>,
}

impl ScriptedTransport {
    fn new(flavor: Flavor, responses: Vec<Vec<u8>>) -> Self {
        ScriptedTransport { flavor, responses: RefCell::new(responses.into()), sent: RefCell::new(Vec::new()) }
    }
}

impl BulkTransport for ScriptedTransport {
    fn bulk_send(&self, buf: &[u8], _timeout: Duration) -> thor_flash::error::Result<()> {
        self.sent.borrow_mut().push(buf.to_vec());
        Ok(())
    }

    fn bulk_recv(&self, buf: &mut [u8], _timeout: Duration) -> thor_flash::error::Result<usize> {
        let mut responses = self.responses.borrow_mut();
        match responses.pop_front() {
            Some(resp) => {
                let n = resp.len().min(buf.len());
                buf[..n].copy_from_slice(&resp[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn flavor(&self) -> Flavor {
        self.flavor
    }
}

fn thor_response(id: i32, sub_id: i32, ack: i32, int0: i32) -> Vec<u8> {
    let mut buf = vec![0u8; THOR_RESPONSE_SIZE];
    LittleEndian::write_i32(&mut buf[0..4], id);
    LittleEndian::write_i32(&mut buf[4..8], sub_id);
    LittleEndian::write_i32(&mut buf[8..12], ack);
    LittleEndian::write_i32(&mut buf[12..16], int0);
    buf
}

fn odin_response(id: u32, word: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    LittleEndian::write_u32(&mut buf[0..4], id);
    LittleEndian::write_u32(&mut buf[4..8], word);
    buf
}

fn sent_request_ints(buf: &[u8]) -> (i32, i32) {
    (LittleEndian::read_i32(&buf[0..4]), LittleEndian::read_i32(&buf[4..8]))
}

/// Property: handshake succeeds against an echoed `ROHT`, and fails with
/// `InvalidArgument` against any other 4 bytes.
#[test]
fn handshake_succeeds_on_correct_echo() {
    let transport = ScriptedTransport::new(Flavor::Thor, vec![b"ROHT".to_vec()]);
    let mut session = SessionController::new(transport);
    session.handshake().unwrap();
    assert_eq!(session.device().sent.borrow()[0], b"THOR");
}

#[test]
fn handshake_fails_on_wrong_echo() {
    let transport = ScriptedTransport::new(Flavor::Thor, vec![b"NOPE".to_vec()]);
    let mut session = SessionController::new(transport);
    let err = session.handshake().unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

/// An empty session: handshake, start_session(0), end_session, reboot.
/// Verifies the exact wire sequence: THOR/ROHT, then DL-INIT, DL-EXIT, and
/// CMD-REBOOT requests in order.
#[test]
fn empty_session_sends_init_exit_reboot_in_order() {
    let responses = vec![
        b"ROHT".to_vec(),
        thor_response(group::DL, dl::INIT, 0, 0),
        thor_response(group::DL, dl::EXIT, 0, 0),
        thor_response(group::CMD, cmd::REBOOT, 0, 0),
    ];
    let transport = ScriptedTransport::new(Flavor::Thor, responses);
    let mut session = SessionController::new(transport);

    session.handshake().unwrap();
    session.start_session(0).unwrap();
    session.end_session().unwrap();
    session.reboot().unwrap();

    let sent = session.device().sent.borrow();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[0], b"THOR");
    assert_eq!(sent_request_ints(&sent[1]), (group::DL, dl::INIT));
    assert_eq!(sent_request_ints(&sent[2]), (group::DL, dl::EXIT));
    assert_eq!(sent_request_ints(&sent[3]), (group::CMD, cmd::REBOOT));
}

/// Odin start session: handshake with LOKE, then DL-INIT negotiates a unit.
#[test]
fn odin_start_session_negotiates_unit() {
    let responses = vec![b"LOKE".to_vec(), odin_response(odin_id::DL_INIT, 131072)];
    let transport = ScriptedTransport::new(Flavor::Odin, responses);
    let mut session = SessionController::new(transport);

    session.handshake().unwrap();
    let unit = session.start_session(0).unwrap();
    assert_eq!(unit, Some(131072));
    assert_eq!(session.odin_unit(), Some(131072));
}

#[test]
fn start_session_before_handshake_is_rejected() {
    let transport = ScriptedTransport::new(Flavor::Thor, vec![]);
    let mut session = SessionController::new(transport);
    let err = session.start_session(0).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

// ---------------------------------------------------------------------
// Pipeline-level mock: a scripted `BulkDriver`/`Transfer` pair.
// ---------------------------------------------------------------------

struct MockTransfer {
    buf: Vec<u8>,
    outcome: Rc<RefCell<Option<Outcome>>>,
}

impl Transfer for MockTransfer {
    fn poll(&self) -> Option<Outcome> {
        self.outcome.borrow().clone()
    }

    fn cancel(&self) {
        let mut outcome = self.outcome.borrow_mut();
        if outcome.is_none() {
            *outcome = Some(Outcome::Cancelled);
        }
    }

    fn buffer(&self) -> &[u8] {
        &self.buf
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

struct PendingSlot {
    data: Rc<RefCell<Option<Outcome>>>,
    data_final: Outcome,
    resp: Rc<RefCell<Option<Outcome>>>,
    resp_final: Outcome,
}

/// A driver that resolves one logical chunk's pair of transfers per
/// `pump()` call. Resolution order defaults to the order chunks were
/// submitted (lowest chunk number first); `resolve_order` overrides that
/// when a test needs a chunk's outcome to land before earlier ones are
/// acknowledged (used to exercise mid-flight cancellation).
struct MockDriver {
    next_order: std::cell::Cell<i32>,
    last_order: std::cell::Cell<i32>,
    pending: RefCell<BTreeMap<i32, PendingSlot>>,
    mismatches: BTreeMap<i32, i32>,
    failures: BTreeMap<i32, String>,
    resolve_order: RefCell<Option<VecDeque<i32>>>,
    bodies: RefCell<Vec<(i32, Vec<u8>)>>,
}

impl MockDriver {
    fn new() -> Self {
        MockDriver {
            next_order: std::cell::Cell::new(1),
            last_order: std::cell::Cell::new(0),
            pending: RefCell::new(BTreeMap::new()),
            mismatches: BTreeMap::new(),
            failures: BTreeMap::new(),
            resolve_order: RefCell::new(None),
            bodies: RefCell::new(Vec::new()),
        }
    }

    fn with_mismatch(mut self, order: i32, reported_cnt: i32) -> Self {
        self.mismatches.insert(order, reported_cnt);
        self
    }

    fn with_failure(mut self, order: i32, message: &str) -> Self {
        self.failures.insert(order, message.to_string());
        self
    }

    fn with_resolve_order(self, order: Vec<i32>) -> Self {
        *self.resolve_order.borrow_mut() = Some(order.into());
        self
    }
}

impl BulkDriver for MockDriver {
    type Transfer = MockTransfer;

    fn alloc(&self, size: usize) -> thor_flash::error::Result<Self::Transfer> {
        Ok(MockTransfer { buf: vec![0u8; size], outcome: Rc::new(RefCell::new(None)) })
    }

    fn submit_out(&self, transfer: &mut Self::Transfer, _timeout: Duration) -> thor_flash::error::Result<()> {
        let order = self.next_order.get();
        self.next_order.set(order + 1);
        self.last_order.set(order);

        self.bodies.borrow_mut().push((order, transfer.buf.clone()));
        transfer.outcome = Rc::new(RefCell::new(None));

        self.pending.borrow_mut().insert(
            order,
            PendingSlot {
                data: transfer.outcome.clone(),
                data_final: Outcome::Completed { actual_length: transfer.buf.len() },
                resp: Rc::new(RefCell::new(None)),
                resp_final: Outcome::Cancelled,
            },
        );
        Ok(())
    }

    fn submit_in(&self, transfer: &mut Self::Transfer, _timeout: Duration) -> thor_flash::error::Result<()> {
        let order = self.last_order.get();
        transfer.outcome = Rc::new(RefCell::new(None));

        let final_outcome = if let Some(msg) = self.failures.get(&order) {
            Outcome::Failed(msg.clone())
        } else {
            let cnt = self.mismatches.get(&order).copied().unwrap_or(order);
            LittleEndian::write_i32(&mut transfer.buf[0..4], 0);
            LittleEndian::write_i32(&mut transfer.buf[4..8], cnt);
            Outcome::Completed { actual_length: transfer.buf.len() }
        };

        let mut pending = self.pending.borrow_mut();
        if let Some(slot) = pending.get_mut(&order) {
            slot.resp = transfer.outcome.clone();
            slot.resp_final = final_outcome;
        }
        Ok(())
    }

    fn pump(&self, _timeout: Duration) -> thor_flash::error::Result<()> {
        let mut pending = self.pending.borrow_mut();
        let key = {
            let mut order_queue = self.resolve_order.borrow_mut();
            match order_queue.as_mut() {
                Some(queue) => queue.pop_front(),
                None => pending.keys().next().copied(),
            }
        };
        let Some(key) = key else { return Ok(()) };
        let Some(slot) = pending.remove(&key) else { return Ok(()) };

        if slot.data.borrow().is_none() {
            *slot.data.borrow_mut() = Some(slot.data_final);
        }
        if slot.resp.borrow().is_none() {
            *slot.resp.borrow_mut() = Some(slot.resp_final);
        }
        Ok(())
    }
}

struct VecSource {
    name: String,
    data: Vec<u8>,
    pos: usize,
    yielded: bool,
}

impl VecSource {
    fn new(data: Vec<u8>) -> Self {
        VecSource { name: "body".to_string(), data, pos: 0, yielded: false }
    }
}

impl thor_flash::source::DataSource for VecSource {
    fn next_entry(&mut self) -> thor_flash::error::Result<bool> {
        if self.yielded {
            return Ok(false);
        }
        self.yielded = true;
        Ok(true)
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn length(&self) -> u64 {
        self.data.len() as u64
    }
    fn read(&mut self, buf: &mut [u8]) -> thor_flash::error::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }
    fn close(&mut self) -> thor_flash::error::Result<()> {
        Ok(())
    }
}

/// A 3000-byte body over a 1024-byte unit sends three chunks (1024, 1024,
/// 952, zero-padded in the third), acked 1, 2, 3 in order, with progress
/// called once per ack and the full byte total sent.
#[test]
fn one_file_three_chunks_acked_in_order() {
    let body: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let driver = MockDriver::new();
    let mut source = VecSource::new(body.clone());

    let mut progress = Vec::new();
    send_raw_data(&driver, &mut source, 3000, 1024, |sent, left, chunk_number| {
        progress.push((sent, left, chunk_number));
    })
    .unwrap();

    assert_eq!(progress, vec![(1024, 1976, 1), (2048, 952, 2), (3000, 0, 3)]);

    let bodies = driver.bodies.borrow();
    assert_eq!(bodies.len(), 3);
    assert_eq!(bodies[0].0, 1);
    assert_eq!(bodies[1].0, 2);
    assert_eq!(bodies[2].0, 3);
    assert_eq!(&bodies[0].1, &body[0..1024]);
    assert_eq!(&bodies[1].1, &body[1024..2048]);
    assert_eq!(&bodies[2].1[..952], &body[2048..3000]);
    assert!(bodies[2].1[952..].iter().all(|&b| b == 0), "last chunk's padding must be zero");
}

/// Larger-than-window file: 5 chunks over only 3 physical transfer slots,
/// forcing resubmission. Ordering and totals must still hold.
#[test]
fn ordering_holds_across_resubmission() {
    let body: Vec<u8> = (0..(4 * 1024 + 100)).map(|i| (i % 256) as u8).collect();
    let driver = MockDriver::new();
    let mut source = VecSource::new(body.clone());
    let total = body.len() as u64;

    let mut seen_chunk_numbers = Vec::new();
    send_raw_data(&driver, &mut source, total, 1024, |_sent, _left, chunk_number| {
        seen_chunk_numbers.push(chunk_number);
    })
    .unwrap();

    assert_eq!(seen_chunk_numbers, vec![1, 2, 3, 4, 5]);
    let bodies = driver.bodies.borrow();
    assert_eq!(bodies.len(), 5);
    assert_eq!(&bodies[4].1[..100], &body[4096..4196]);
    assert!(bodies[4].1[100..].iter().all(|&b| b == 0));
}

/// The mock reports the wrong `cnt` for the first chunk's ack. The engine
/// must surface a `FramingError`, send no further chunks past the point of
/// detection, and unwind any still-outstanding transfers cleanly (no panic,
/// no hang).
#[test]
fn sequence_mismatch_yields_framing_error() {
    let driver = MockDriver::new().with_mismatch(1, 2);
    let mut source = VecSource::new(vec![0u8; 3000]);

    let err = send_raw_data(&driver, &mut source, 3000, 1024, |_, _, _| {}).unwrap_err();
    assert!(matches!(err, Error::FramingError(_)));
}

/// The mock fails the third chunk's in-transfer outright while the first two
/// are still in flight (resolved out of submission order, via
/// `resolve_order`). All three chunks must have been submitted before the
/// failure surfaces — proving 1 and 2 really were still outstanding — and
/// the unwind must terminate rather than hang.
#[test]
fn cancellation_unwinds_outstanding_chunks_on_failure() {
    let driver = MockDriver::new().with_failure(3, "simulated device disconnect").with_resolve_order(vec![3, 1, 2]);
    let mut source = VecSource::new(vec![0u8; 3000]);

    let err = send_raw_data(&driver, &mut source, 3000, 1024, |_, _, _| {}).unwrap_err();
    assert!(matches!(err, Error::IoError(_)));

    // all three chunks were in flight simultaneously when chunk 3 failed
    assert_eq!(driver.bodies.borrow().len(), 3);
}

/// Empty transfer completes without priming any chunk (edge case).
#[test]
fn empty_transfer_completes_immediately() {
    let driver = MockDriver::new();
    let mut source = VecSource::new(Vec::new());
    let mut calls = 0;
    send_raw_data(&driver, &mut source, 0, 1024, |_, _, _| calls += 1).unwrap();
    assert_eq!(calls, 0);
}
