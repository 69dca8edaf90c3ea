//! Host-side scan buffer.
//!
//! Interleaved `f64` samples grouped in rows of one sample per active
//! channel. The buffer itself is not synchronized; the scan state that owns
//! it sits behind a mutex shared by the sampler (sole writer) and the
//! consumer (sole reader).
//!
//! Finite mode never wraps. Continuous mode wraps and, when the writer
//! catches the reader, drops the oldest unread row and latches the overrun
//! flag until [`ScanBuffer::reset`].

use daqhat_common::board::BoardInfo;
use daqhat_common::consts::MAX_SCAN_BUFFER_SAMPLES;
use daqhat_common::error::{DaqError, DaqResult};

/// Overwrite discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Fixed row count; full buffer means the scan is complete.
    Finite,
    /// Circular; runs until stopped.
    Continuous,
}

/// Result of writing one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Row stored.
    Stored,
    /// Row stored over the oldest unread row (continuous mode).
    Overwrote {
        /// True only the first time this buffer overruns.
        first: bool,
    },
    /// Finite buffer already holds every requested row; nothing stored.
    Full,
}

/// Fixed-capacity interleaved sample store.
#[derive(Debug)]
pub struct ScanBuffer {
    data: Vec<f64>,
    mode: BufferMode,
    channels: usize,
    write: usize,
    read: usize,
    available: usize,
    rows_written: u64,
    overrun: bool,
}

impl ScanBuffer {
    /// Allocate a buffer for a scan.
    ///
    /// Finite: `requested_rows` rows, which must be non-zero. Continuous:
    /// the larger of `requested_rows` and the rate-tiered default.
    ///
    /// # Errors
    /// - `BadParameter` for zero channels or a zero-row finite scan
    /// - `ResourceUnavailable` above the size ceiling or if allocation fails
    pub fn allocate(
        mode: BufferMode,
        channels: usize,
        requested_rows: usize,
        rate: f64,
    ) -> DaqResult<Self> {
        if channels == 0 {
            return Err(DaqError::bad_parameter("scan buffer needs at least one channel"));
        }
        let rows = match mode {
            BufferMode::Finite if requested_rows == 0 => {
                return Err(DaqError::bad_parameter(
                    "finite scan needs a non-zero sample count",
                ));
            }
            BufferMode::Finite => requested_rows,
            BufferMode::Continuous => BoardInfo::continuous_rows(rate, requested_rows),
        };

        let capacity = rows
            .checked_mul(channels)
            .filter(|samples| *samples <= MAX_SCAN_BUFFER_SAMPLES)
            .ok_or_else(|| {
                DaqError::ResourceUnavailable(format!(
                    "{rows} rows x {channels} channels exceeds the {MAX_SCAN_BUFFER_SAMPLES} sample limit"
                ))
            })?;

        let mut data = Vec::new();
        data.try_reserve_exact(capacity).map_err(|e| {
            DaqError::ResourceUnavailable(format!("scan buffer of {capacity} samples: {e}"))
        })?;
        data.resize(capacity, 0.0);

        Ok(Self {
            data,
            mode,
            channels,
            write: 0,
            read: 0,
            available: 0,
            rows_written: 0,
            overrun: false,
        })
    }

    /// Capacity in samples.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Capacity in rows.
    pub fn capacity_rows(&self) -> usize {
        self.data.len() / self.channels
    }

    /// Samples per row.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Overwrite discipline.
    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Unread samples.
    pub fn available(&self) -> usize {
        self.available
    }

    /// Unread rows.
    pub fn available_rows(&self) -> usize {
        self.available / self.channels
    }

    /// Rows ever written since allocation or reset.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// True once the writer has overwritten unread data.
    pub fn overrun(&self) -> bool {
        self.overrun
    }

    /// True if a finite buffer has received every row.
    pub fn is_complete(&self) -> bool {
        self.mode == BufferMode::Finite && self.rows_written as usize >= self.capacity_rows()
    }

    /// Append one row. `row.len()` must equal the channel count.
    pub fn write_row(&mut self, row: &[f64]) -> WriteOutcome {
        debug_assert_eq!(row.len(), self.channels);
        if self.is_complete() {
            return WriteOutcome::Full;
        }

        let mut outcome = WriteOutcome::Stored;
        if self.available == self.data.len() {
            // Only reachable in continuous mode: a full finite buffer is complete.
            self.read = (self.read + self.channels) % self.data.len();
            self.available -= self.channels;
            outcome = WriteOutcome::Overwrote {
                first: !self.overrun,
            };
            self.overrun = true;
        }

        self.data[self.write..self.write + self.channels].copy_from_slice(row);
        self.write += self.channels;
        if self.write == self.data.len() && self.mode == BufferMode::Continuous {
            self.write = 0;
        }
        self.available += self.channels;
        self.rows_written += 1;
        outcome
    }

    /// Move up to `max_rows` whole rows into `out`, oldest first.
    /// Returns the number of rows copied.
    pub fn read_rows(&mut self, max_rows: usize, out: &mut [f64]) -> usize {
        let rows = max_rows
            .min(self.available_rows())
            .min(out.len() / self.channels);
        let mut remaining = rows * self.channels;
        let mut copied = 0;

        while remaining > 0 {
            let contiguous = remaining.min(self.data.len() - self.read);
            out[copied..copied + contiguous]
                .copy_from_slice(&self.data[self.read..self.read + contiguous]);
            self.read = (self.read + contiguous) % self.data.len();
            copied += contiguous;
            remaining -= contiguous;
        }
        self.available -= copied;
        rows
    }

    /// Move up to `max_rows` rows onto the end of `out`.
    pub fn drain_rows_into(&mut self, max_rows: usize, out: &mut Vec<f64>) -> usize {
        let rows = max_rows.min(self.available_rows());
        let start = out.len();
        out.resize(start + rows * self.channels, 0.0);
        self.read_rows(rows, &mut out[start..])
    }

    /// Discard all data and clear the overrun flag.
    pub fn reset(&mut self) {
        self.write = 0;
        self.read = 0;
        self.available = 0;
        self.rows_written = 0;
        self.overrun = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: f64, channels: usize) -> Vec<f64> {
        vec![value; channels]
    }

    #[test]
    fn finite_never_wraps() {
        let mut buf = ScanBuffer::allocate(BufferMode::Finite, 2, 3, 1000.0).unwrap();
        assert_eq!(buf.capacity(), 6);
        for i in 0..3 {
            assert_eq!(buf.write_row(&row(f64::from(i), 2)), WriteOutcome::Stored);
        }
        assert!(buf.is_complete());
        assert_eq!(buf.write_row(&row(9.0, 2)), WriteOutcome::Full);
        assert_eq!(buf.rows_written(), 3);

        // Draining does not make room in a finite buffer.
        let mut out = Vec::new();
        assert_eq!(buf.drain_rows_into(10, &mut out), 3);
        assert_eq!(out, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
        assert_eq!(buf.write_row(&row(9.0, 2)), WriteOutcome::Full);
        assert!(!buf.overrun());
    }

    #[test]
    fn finite_zero_rows_rejected() {
        assert!(matches!(
            ScanBuffer::allocate(BufferMode::Finite, 1, 0, 1000.0),
            Err(DaqError::BadParameter(_))
        ));
    }

    #[test]
    fn continuous_sizing_uses_tier_or_request() {
        let buf = ScanBuffer::allocate(BufferMode::Continuous, 4, 0, 50.0).unwrap();
        assert_eq!(buf.capacity_rows(), 1_000);
        let buf = ScanBuffer::allocate(BufferMode::Continuous, 4, 5_000, 50.0).unwrap();
        assert_eq!(buf.capacity_rows(), 5_000);
        let buf = ScanBuffer::allocate(BufferMode::Continuous, 1, 10, 5_000.0).unwrap();
        assert_eq!(buf.capacity_rows(), 10_000);
    }

    #[test]
    fn size_ceiling_enforced() {
        let err = ScanBuffer::allocate(BufferMode::Finite, 8, 3_000_000, 1000.0).unwrap_err();
        assert!(matches!(err, DaqError::ResourceUnavailable(_)));
    }

    #[test]
    fn continuous_overrun_drops_oldest() {
        let mut buf = ScanBuffer::allocate(BufferMode::Continuous, 1, 1_000, 10.0).unwrap();
        let cap = buf.capacity_rows();
        for i in 0..cap {
            assert_eq!(buf.write_row(&[i as f64]), WriteOutcome::Stored);
        }
        assert_eq!(
            buf.write_row(&[cap as f64]),
            WriteOutcome::Overwrote { first: true }
        );
        assert_eq!(
            buf.write_row(&[(cap + 1) as f64]),
            WriteOutcome::Overwrote { first: false }
        );
        assert!(buf.overrun());
        assert_eq!(buf.available_rows(), cap);

        let mut out = Vec::new();
        buf.drain_rows_into(3, &mut out);
        assert_eq!(out, vec![2.0, 3.0, 4.0]);

        // Flag persists after draining.
        assert!(buf.overrun());
        buf.reset();
        assert!(!buf.overrun());
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn wrapped_read_preserves_order() {
        let mut buf = ScanBuffer::allocate(BufferMode::Continuous, 2, 1_000, 10.0).unwrap();
        let cap = buf.capacity_rows();
        let mut out = Vec::new();
        // Advance the pointers close to the end, then straddle the wrap.
        for i in 0..cap - 2 {
            buf.write_row(&[i as f64, -(i as f64)]);
        }
        buf.drain_rows_into(cap, &mut out);
        out.clear();
        for i in 0..5 {
            buf.write_row(&[f64::from(i), -f64::from(i)]);
        }
        assert_eq!(buf.drain_rows_into(10, &mut out), 5);
        assert_eq!(out, vec![0.0, -0.0, 1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 4.0, -4.0]);
        assert!(!buf.overrun());
    }

    #[test]
    fn read_bounded_by_output_capacity() {
        let mut buf = ScanBuffer::allocate(BufferMode::Finite, 3, 10, 100.0).unwrap();
        for i in 0..4 {
            buf.write_row(&row(f64::from(i), 3));
        }
        // Room for two whole rows plus a partial one.
        let mut out = [0.0; 8];
        assert_eq!(buf.read_rows(usize::MAX, &mut out), 2);
        assert_eq!(buf.available_rows(), 2);
    }

    proptest::proptest! {
        #[test]
        fn continuous_keeps_newest_rows_in_order(
            ops in proptest::collection::vec((0usize..2_500, 0usize..2_500), 1..12)
        ) {
            let mut buf = ScanBuffer::allocate(BufferMode::Continuous, 1, 1_000, 10.0).unwrap();
            let cap = buf.capacity_rows();
            let mut model = std::collections::VecDeque::new();
            let mut next = 0.0;
            let mut out = Vec::new();

            for (writes, reads) in ops {
                for _ in 0..writes {
                    buf.write_row(&[next]);
                    model.push_back(next);
                    if model.len() > cap {
                        model.pop_front();
                    }
                    next += 1.0;
                }
                out.clear();
                let got = buf.drain_rows_into(reads, &mut out);
                let expected: Vec<f64> = model.drain(..got).collect();
                proptest::prop_assert_eq!(&out, &expected);
                proptest::prop_assert_eq!(buf.available_rows(), model.len());
            }
        }
    }
}
