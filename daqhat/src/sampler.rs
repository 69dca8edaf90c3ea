//! Background acquisition thread.
//!
//! One thread per active scan, driven through these phases:
//!
//! ```text
//! Configure -> [WaitForSync] -> [WaitForTrigger] -> AcquireLoop -> Terminal
//! ```
//!
//! Every hardware access goes through the bus arbiter, one guard per row.
//! Faults stop the loop and are stored on the shared scan state; the thread
//! itself never unwinds into the caller.

use crate::bus::BusArbiter;
use crate::scan::ScanShared;
use daqhat_common::board::{Board, BoardInfo, InputRange, ScanSetup};
use daqhat_common::config::ScanTuning;
use daqhat_common::consts::MAX_CHANNELS;
use daqhat_common::error::{DaqError, DaqResult};
use daqhat_common::types::{Calibration, ScanOptions, ScanStatus, TriggerMode};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Board shared between the handle and its sampler thread.
pub type SharedBoard = Arc<Mutex<Box<dyn Board>>>;

/// Row samples before they are stored.
type Row = heapless::Vec<f64, MAX_CHANNELS>;

/// Sensor sensitivity that leaves scaled values in volts, in mV per unit.
pub const UNITY_SENSITIVITY_MV: f64 = 1000.0;

/// Raw code to caller value, per the scan options.
#[derive(Debug, Clone)]
pub struct SampleConverter {
    info: &'static BoardInfo,
    range: InputRange,
    options: ScanOptions,
    calibration: heapless::Vec<Calibration, MAX_CHANNELS>,
    /// Volts per engineering unit, per active channel.
    volts_per_unit: heapless::Vec<f64, MAX_CHANNELS>,
}

impl SampleConverter {
    /// `calibration[i]` and `sensitivity_mv[i]` belong to the i-th active
    /// channel. Channels without a sensitivity are scaled to volts.
    pub fn new(
        info: &'static BoardInfo,
        range: InputRange,
        options: ScanOptions,
        calibration: &[Calibration],
        sensitivity_mv: &[f64],
    ) -> Self {
        let mut coefficients = heapless::Vec::new();
        for cal in calibration.iter().take(MAX_CHANNELS) {
            let _ = coefficients.push(*cal);
        }
        let mut volts_per_unit = heapless::Vec::new();
        for mv in sensitivity_mv.iter().take(MAX_CHANNELS) {
            let _ = volts_per_unit.push(mv / 1000.0);
        }
        Self {
            info,
            range,
            options,
            calibration: coefficients,
            volts_per_unit,
        }
    }

    /// Convert the raw code of the `slot`-th active channel.
    #[inline]
    pub fn convert(&self, slot: usize, raw: i32) -> f64 {
        let mut value = f64::from(raw);
        if !self.options.contains(ScanOptions::NO_CALIBRATE)
            && let Some(cal) = self.calibration.get(slot)
        {
            value = cal.apply(value);
        }
        if !self.options.contains(ScanOptions::NO_SCALE) {
            value = self.info.scale(value, self.range);
            if let Some(per_unit) = self.volts_per_unit.get(slot) {
                value /= per_unit;
            }
        }
        value
    }
}

/// Edge / level trigger evaluation over successive input samples.
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    mode: TriggerMode,
    previous: Option<bool>,
}

impl TriggerDetector {
    /// Detector with no history.
    pub fn new(mode: TriggerMode) -> Self {
        Self {
            mode,
            previous: None,
        }
    }

    /// Feed the current input level; true once the condition is met.
    ///
    /// Edge modes need a transition since the previous sample, so the first
    /// sample only seeds the history. Level modes fire on the sample itself.
    pub fn update(&mut self, level: bool) -> bool {
        let fired = match self.mode {
            TriggerMode::ActiveHigh => level,
            TriggerMode::ActiveLow => !level,
            TriggerMode::RisingEdge => self.previous == Some(false) && level,
            TriggerMode::FallingEdge => self.previous == Some(true) && !level,
        };
        self.previous = Some(level);
        fired
    }
}

/// Everything the sampler needs, fixed at start.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    /// Hardware configuration
    pub setup: ScanSetup,
    /// Raw-to-value conversion
    pub converter: SampleConverter,
    /// Trigger condition when `EXT_TRIGGER` is set
    pub trigger_mode: TriggerMode,
    /// Poll the sync status before acquiring
    pub wait_for_sync: bool,
    /// Timing knobs
    pub tuning: ScanTuning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanEnd {
    Completed,
    Stopped,
}

/// Sampler thread body.
pub struct Sampler {
    address: u8,
    board: SharedBoard,
    bus: Arc<BusArbiter>,
    shared: Arc<ScanShared>,
    plan: ScanPlan,
}

impl Sampler {
    /// Bundle the thread's state.
    pub fn new(
        address: u8,
        board: SharedBoard,
        bus: Arc<BusArbiter>,
        shared: Arc<ScanShared>,
        plan: ScanPlan,
    ) -> Self {
        Self {
            address,
            board,
            bus,
            shared,
            plan,
        }
    }

    /// Start the thread.
    ///
    /// # Errors
    /// `ResourceUnavailable` if the OS refuses a new thread.
    pub fn spawn(self) -> DaqResult<JoinHandle<()>> {
        let address = self.address;
        thread::Builder::new()
            .name(format!("daqhat-scan-{address}"))
            .spawn(move || self.run())
            .map_err(|e| DaqError::ResourceUnavailable(format!("sampler thread: {e}")))
    }

    fn run(mut self) {
        let shared = self.shared.clone();
        let address = self.address;

        let fault = match panic::catch_unwind(AssertUnwindSafe(|| self.execute())) {
            Ok(Ok(end)) => {
                let report = shared.status();
                info!(
                    address,
                    rows = report.rows_acquired,
                    "Scan {}",
                    if end == ScanEnd::Completed { "complete" } else { "stopped" }
                );
                None
            }
            Ok(Err(e)) => {
                error!(address, "Scan aborted: {}", e);
                Some(e)
            }
            Err(_) => {
                error!(address, "Sampler thread panicked");
                Some(DaqError::comms(address, "sampler thread panicked"))
            }
        };
        shared.finish(fault);
    }

    fn execute(&mut self) -> DaqResult<ScanEnd> {
        let setup = self.plan.setup.clone();
        self.with_board(|board, bus| board.configure_scan(bus, &setup))?;
        debug!(
            address = self.address,
            rate = setup.rate,
            channels = setup.channels.len(),
            "Scan configured"
        );

        let result = self.phases();
        let disarm = self.with_board(|board, bus| board.end_scan(bus));
        let end = result?;
        disarm?;
        Ok(end)
    }

    fn phases(&mut self) -> DaqResult<ScanEnd> {
        if self.plan.wait_for_sync && self.wait_for_sync()? == Some(ScanEnd::Stopped) {
            return Ok(ScanEnd::Stopped);
        }

        if self.plan.setup.options.contains(ScanOptions::EXT_TRIGGER) {
            if self.wait_for_trigger()? == Some(ScanEnd::Stopped) {
                return Ok(ScanEnd::Stopped);
            }
        } else {
            self.shared.set_flag(ScanStatus::TRIGGERED);
        }

        self.acquire_loop()
    }

    fn with_board<R>(
        &self,
        f: impl FnOnce(&mut dyn Board, &mut crate::bus::BusGuard<'_>) -> DaqResult<R>,
    ) -> DaqResult<R> {
        // Lock order: bus, then board.
        let mut bus = self.bus.acquire(self.address)?;
        let mut board = self.board.lock();
        f(&mut **board, &mut bus)
    }

    fn wait_for_sync(&mut self) -> DaqResult<Option<ScanEnd>> {
        let start = Instant::now();
        let deadline = start + self.plan.tuning.sync_timeout();
        let poll = self.plan.tuning.sync_poll();
        debug!(address = self.address, "Waiting for clock sync");

        loop {
            if self.shared.stop_requested() {
                return Ok(Some(ScanEnd::Stopped));
            }
            if self.with_board(|board, bus| board.read_sync_status(bus))? {
                debug!(address = self.address, waited = ?start.elapsed(), "Clock locked");
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DaqError::SyncTimeout {
                    address: self.address,
                    waited: now - start,
                });
            }
            thread::park_timeout(poll.min(deadline - now));
        }
    }

    fn wait_for_trigger(&mut self) -> DaqResult<Option<ScanEnd>> {
        let mut detector = TriggerDetector::new(self.plan.trigger_mode);
        let poll = self.plan.tuning.trigger_poll();
        debug!(address = self.address, mode = ?self.plan.trigger_mode, "Waiting for trigger");

        loop {
            if self.shared.stop_requested() {
                return Ok(Some(ScanEnd::Stopped));
            }
            let level = self.with_board(|board, bus| board.read_trigger_input(bus))?;
            if detector.update(level) {
                self.shared.set_flag(ScanStatus::TRIGGERED);
                info!(address = self.address, "Scan triggered");
                return Ok(None);
            }
            thread::park_timeout(poll);
        }
    }

    fn acquire_loop(&mut self) -> DaqResult<ScanEnd> {
        let rate = self.plan.setup.rate;
        let channels = self.plan.setup.channels.clone();
        let info = self.board.lock().info();
        // Rows the device queue holds before it drops data.
        let fifo_rows = u64::from(info.fifo_samples) / channels.len() as u64;

        let mut origin = Instant::now();
        let mut origin_row: u64 = 0;
        let mut row_index: u64 = 0;
        let mut row = Row::new();

        loop {
            if self.shared.stop_requested() {
                return Ok(ScanEnd::Stopped);
            }

            let due = origin + Duration::from_secs_f64((row_index - origin_row) as f64 / rate);
            let now = Instant::now();
            if now < due {
                thread::park_timeout(due - now);
                continue;
            }

            let behind = ((now - due).as_secs_f64() * rate) as u64;
            if behind > fifo_rows {
                if self.shared.set_flag(ScanStatus::HW_OVERRUN) {
                    warn!(
                        address = self.address,
                        behind, "Hardware overrun, device queue dropped samples"
                    );
                }
                origin = now;
                origin_row = row_index;
            }

            row.clear();
            let converter = &self.plan.converter;
            self.with_board(|board, bus| {
                for (slot, channel) in channels.iter().enumerate() {
                    let raw = board.read_raw_sample(bus, *channel)?;
                    // Capacity equals MAX_CHANNELS >= active channels.
                    let _ = row.push(converter.convert(slot, raw));
                }
                Ok(())
            })?;

            row_index += 1;
            if !self.shared.push_row(&row) {
                return Ok(ScanEnd::Completed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daqhat_common::board::{MCC118_INFO, MCC172_INFO};

    #[test]
    fn rising_edge_needs_transition() {
        let mut detector = TriggerDetector::new(TriggerMode::RisingEdge);
        assert!(!detector.update(true));
        assert!(!detector.update(true));
        assert!(!detector.update(false));
        assert!(detector.update(true));
    }

    #[test]
    fn falling_edge_needs_transition() {
        let mut detector = TriggerDetector::new(TriggerMode::FallingEdge);
        assert!(!detector.update(false));
        assert!(!detector.update(true));
        assert!(detector.update(false));
    }

    #[test]
    fn level_modes_fire_immediately() {
        assert!(TriggerDetector::new(TriggerMode::ActiveHigh).update(true));
        assert!(!TriggerDetector::new(TriggerMode::ActiveHigh).update(false));
        assert!(TriggerDetector::new(TriggerMode::ActiveLow).update(false));
    }

    #[test]
    fn converter_applies_calibration_then_scale() {
        let range = MCC118_INFO.ranges[0];
        let cal = [Calibration {
            slope: 2.0,
            offset: 1.0,
        }];

        let raw = SampleConverter::new(
            &MCC118_INFO,
            range,
            ScanOptions::NO_SCALE | ScanOptions::NO_CALIBRATE,
            &cal,
            &[],
        );
        assert_eq!(raw.convert(0, 100), 100.0);

        let calibrated = SampleConverter::new(&MCC118_INFO, range, ScanOptions::NO_SCALE, &cal, &[]);
        assert_eq!(calibrated.convert(0, 100), 201.0);

        let volts = SampleConverter::new(&MCC118_INFO, range, ScanOptions::empty(), &cal, &[]);
        let expected = MCC118_INFO.scale(201.0, range);
        assert_eq!(volts.convert(0, 100), expected);
    }

    #[test]
    fn converter_scales_signed_codes() {
        let range = MCC172_INFO.ranges[0];
        let converter = SampleConverter::new(&MCC172_INFO, range, ScanOptions::empty(), &[], &[]);
        assert_eq!(converter.convert(0, 0), 0.0);
        assert!((converter.convert(0, 8_388_607) - (5.0 - MCC172_INFO.lsb(range))).abs() < 1e-12);
    }

    #[test]
    fn converter_divides_by_sensitivity() {
        let range = MCC172_INFO.ranges[0];
        // 100 mV/g accelerometer on slot 0, volts on slot 1.
        let converter = SampleConverter::new(
            &MCC172_INFO,
            range,
            ScanOptions::empty(),
            &[],
            &[100.0, UNITY_SENSITIVITY_MV],
        );
        let code = 1_677_722; // about 1 V
        let volts = MCC172_INFO.scale(f64::from(code), range);
        assert!((converter.convert(0, code) - volts * 10.0).abs() < 1e-9);
        assert!((converter.convert(1, code) - volts).abs() < 1e-12);

        let raw = SampleConverter::new(&MCC172_INFO, range, ScanOptions::NO_SCALE, &[], &[100.0]);
        assert_eq!(raw.convert(0, code), f64::from(code));
    }
}
