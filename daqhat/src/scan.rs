//! Scan state shared between the sampler thread and the consumer.
//!
//! [`ScanShared`] is the only object both threads touch. It exposes the
//! sampler side (`push_row`, `set_flag`, `finish`) and the consumer side
//! (`read`, `status`); no field is reachable directly.

use crate::buffer::{BufferMode, ScanBuffer, WriteOutcome};
use daqhat_common::error::DaqError;
use daqhat_common::types::ScanStatus;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// How many rows a read asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRequest {
    /// Everything currently buffered. Never blocks.
    All,
    /// Up to this many rows (samples per channel).
    Rows(usize),
}

/// How long a [`ReadRequest::Rows`] read may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Return whatever is available now.
    Immediate,
    /// Block up to the given duration.
    For(Duration),
    /// Block until the rows arrive or the scan stops.
    Forever,
}

impl Wait {
    /// Seconds convention: `0` returns immediately, negative blocks
    /// indefinitely, positive blocks up to that many seconds.
    pub fn from_secs_f64(timeout: f64) -> Self {
        if timeout < 0.0 {
            Self::Forever
        } else if timeout == 0.0 || timeout.is_nan() {
            Self::Immediate
        } else {
            Duration::try_from_secs_f64(timeout).map_or(Self::Forever, Self::For)
        }
    }
}

/// Outcome of a read, without the data.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadInfo {
    /// Status flags at the end of the read.
    pub status: ScanStatus,
    /// Rows copied.
    pub rows: usize,
    /// The wait expired before all requested rows arrived.
    pub timed_out: bool,
    /// Fault that stopped the sampler, if any.
    pub fault: Option<DaqError>,
}

/// Rows read from a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRead {
    /// Status flags at the end of the read.
    pub status: ScanStatus,
    /// Interleaved samples, `rows * channels` long.
    pub samples: Vec<f64>,
    /// Rows copied.
    pub rows: usize,
    /// The wait expired before all requested rows arrived.
    pub timed_out: bool,
    /// Fault that stopped the sampler, if any.
    pub fault: Option<DaqError>,
}

impl ScanRead {
    fn new(info: ReadInfo, samples: Vec<f64>) -> Self {
        Self {
            status: info.status,
            samples,
            rows: info.rows,
            timed_out: info.timed_out,
            fault: info.fault,
        }
    }
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Status flags.
    pub status: ScanStatus,
    /// Unread rows.
    pub rows_available: usize,
    /// Rows acquired since the scan started.
    pub rows_acquired: u64,
    /// Fault that stopped the sampler, if any.
    pub fault: Option<DaqError>,
}

struct ScanState {
    buffer: ScanBuffer,
    status: ScanStatus,
    fault: Option<DaqError>,
}

/// Lock-guarded scan state plus the stop request.
pub struct ScanShared {
    address: u8,
    state: Mutex<ScanState>,
    changed: Condvar,
    stop: AtomicBool,
}

impl ScanShared {
    /// Wrap a freshly allocated buffer; the scan starts out `RUNNING`.
    pub fn new(address: u8, buffer: ScanBuffer) -> Self {
        Self {
            address,
            state: Mutex::new(ScanState {
                buffer,
                status: ScanStatus::RUNNING,
                fault: None,
            }),
            changed: Condvar::new(),
            stop: AtomicBool::new(false),
        }
    }

    // ─── Sampler side ───────────────────────────────────────────────

    /// Ask the sampler to leave its loop.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once a stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Store one converted row and wake readers. Returns `false` once a
    /// finite buffer is complete.
    pub fn push_row(&self, row: &[f64]) -> bool {
        let mut state = self.state.lock();
        let outcome = state.buffer.write_row(row);
        if let WriteOutcome::Overwrote { first } = outcome {
            state.status |= ScanStatus::BUFFER_OVERRUN;
            if first {
                warn!(
                    address = self.address,
                    capacity = state.buffer.capacity(),
                    "Scan buffer overrun, unread data overwritten"
                );
            }
        }
        let complete = state.buffer.is_complete();
        drop(state);
        self.changed.notify_all();
        outcome != WriteOutcome::Full && !complete
    }

    /// Set a status flag. Returns `true` if it was not already set.
    pub fn set_flag(&self, flag: ScanStatus) -> bool {
        let mut state = self.state.lock();
        let newly = !state.status.contains(flag);
        state.status |= flag;
        newly
    }

    /// Terminal transition: record the fault (if any), clear `RUNNING`,
    /// wake every waiter. Idempotent; the first fault wins.
    pub fn finish(&self, fault: Option<DaqError>) {
        let mut state = self.state.lock();
        if state.fault.is_none() {
            state.fault = fault;
        }
        state.status.remove(ScanStatus::RUNNING);
        drop(state);
        self.changed.notify_all();
    }

    // ─── Consumer side ──────────────────────────────────────────────

    /// Samples per row.
    pub fn channels(&self) -> usize {
        self.state.lock().buffer.channels()
    }

    /// Buffer capacity in samples.
    pub fn capacity(&self) -> usize {
        self.state.lock().buffer.capacity()
    }

    /// Buffer discipline.
    pub fn mode(&self) -> BufferMode {
        self.state.lock().buffer.mode()
    }

    /// True while the sampler is acquiring.
    pub fn running(&self) -> bool {
        self.state.lock().status.running()
    }

    /// Current status snapshot.
    pub fn status(&self) -> StatusReport {
        let state = self.state.lock();
        StatusReport {
            status: state.status,
            rows_available: state.buffer.available_rows(),
            rows_acquired: state.buffer.rows_written(),
            fault: state.fault.clone(),
        }
    }

    /// Read rows into a new vector.
    pub fn read(&self, request: ReadRequest, wait: Wait) -> ScanRead {
        let mut samples = Vec::new();
        let info = self.read_with(request, wait, usize::MAX, |buffer, _, rows| {
            buffer.drain_rows_into(rows, &mut samples)
        });
        ScanRead::new(info, samples)
    }

    /// Read rows into `out`, bounded by its length in whole rows.
    pub fn read_into(&self, request: ReadRequest, wait: Wait, out: &mut [f64]) -> ReadInfo {
        let channels = self.channels();
        self.read_with(request, wait, out.len() / channels, |buffer, copied, rows| {
            buffer.read_rows(rows, &mut out[copied * channels..])
        })
    }

    /// Drain rows as they arrive until the request is met, the scan stops
    /// or the wait expires. `copy` gets the rows already copied and the
    /// most it may copy now.
    fn read_with(
        &self,
        request: ReadRequest,
        wait: Wait,
        capacity_rows: usize,
        mut copy: impl FnMut(&mut ScanBuffer, usize, usize) -> usize,
    ) -> ReadInfo {
        let (wanted, until) = match request {
            ReadRequest::All => (capacity_rows, Until::Now),
            ReadRequest::Rows(n) => (n.min(capacity_rows), Until::from_wait(wait)),
        };

        let mut state = self.state.lock();
        let mut copied = 0;
        let mut timed_out = false;
        loop {
            copied += copy(&mut state.buffer, copied, wanted - copied);
            if copied >= wanted || !state.status.running() {
                break;
            }
            match until {
                Until::Now => break,
                Until::Deadline(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        copied += copy(&mut state.buffer, copied, wanted - copied);
                        timed_out = copied < wanted && state.status.running();
                        break;
                    }
                }
                Until::Never => self.changed.wait(&mut state),
            }
        }

        ReadInfo {
            status: state.status,
            rows: copied,
            timed_out,
            fault: state.fault.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Until {
    Now,
    Deadline(Instant),
    Never,
}

impl Until {
    fn from_wait(wait: Wait) -> Self {
        match wait {
            Wait::Immediate => Self::Now,
            // Past the end of the clock is as good as forever.
            Wait::For(timeout) => Instant::now()
                .checked_add(timeout)
                .map_or(Self::Never, Self::Deadline),
            Wait::Forever => Self::Never,
        }
    }
}
