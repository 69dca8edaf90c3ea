//! Board handle and scan controller.
//!
//! A [`Hat`] owns one board at one address, plus at most one scan. The
//! scan lifecycle is
//!
//! ```text
//! Idle --configure_scan--> Configured --start--> Active/Running
//!   ^                                                 |
//!   |                                  stop / complete / fault
//!   |                                                 v
//!   +------------------cleanup----------------- Active/Stopped
//! ```
//!
//! Starting while Active returns `Busy` and leaves the running scan alone.
//! Reads and status are legal in both Active sub-states; `cleanup` frees
//! the buffer and is refused while the sampler is still running.

use crate::buffer::{BufferMode, ScanBuffer};
use crate::bus::{BusArbiter, BusGuard};
use crate::sampler::{SampleConverter, Sampler, ScanPlan, SharedBoard, UNITY_SENSITIVITY_MV};
use crate::scan::{ReadInfo, ReadRequest, ScanRead, ScanShared, StatusReport, Wait};
use daqhat_common::board::{Board, BoardInfo, BoardModel, InputRange, ScanSetup};
use daqhat_common::config::ScanTuning;
use daqhat_common::consts::MAX_CHANNELS;
use daqhat_common::error::{DaqError, DaqResult};
use daqhat_common::types::{
    Calibration, InputMode, ScanOptions, SourceRole, TriggerMode, channels_from_mask,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct ClockConfig {
    role: SourceRole,
    rate: Option<f64>,
}

struct ActiveScan {
    shared: Arc<ScanShared>,
    thread: Option<JoinHandle<()>>,
}

impl ActiveScan {
    /// Request stop, wake the sampler and wait for it.
    fn stop_and_join(&mut self, address: u8) {
        self.shared.request_stop();
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                self.shared
                    .finish(Some(DaqError::comms(address, "sampler thread panicked")));
            }
        }
    }
}

enum ScanSlot {
    Idle,
    Configured(ScanSetup),
    Active(ActiveScan),
}

struct HatState {
    range_index: usize,
    input_mode: InputMode,
    /// mV per engineering unit, by channel.
    sensitivity: [f64; MAX_CHANNELS],
    clock: ClockConfig,
    trigger: (SourceRole, TriggerMode),
    scan: ScanSlot,
}

/// Handle to one open board.
pub struct Hat {
    address: u8,
    info: &'static BoardInfo,
    board: SharedBoard,
    bus: Arc<BusArbiter>,
    tuning: ScanTuning,
    state: Mutex<HatState>,
}

impl std::fmt::Debug for Hat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hat")
            .field("address", &self.address)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Hat {
    /// Wrap a board created by a driver.
    pub fn new(board: Box<dyn Board>, bus: Arc<BusArbiter>, tuning: ScanTuning) -> Self {
        let address = board.address();
        let info = board.info();
        Self {
            address,
            info,
            board: Arc::new(Mutex::new(board)),
            bus,
            tuning,
            state: Mutex::new(HatState {
                range_index: 0,
                input_mode: InputMode::SingleEnded,
                sensitivity: [UNITY_SENSITIVITY_MV; MAX_CHANNELS],
                clock: ClockConfig {
                    role: SourceRole::Local,
                    rate: None,
                },
                trigger: (SourceRole::Local, TriggerMode::default()),
                scan: ScanSlot::Idle,
            }),
        }
    }

    /// Bus address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Board type.
    pub fn model(&self) -> BoardModel {
        self.info.model
    }

    /// Physical limits.
    pub fn info(&self) -> &'static BoardInfo {
        self.info
    }

    fn busy(&self, reason: &'static str) -> DaqError {
        DaqError::Busy {
            address: self.address,
            reason,
        }
    }

    fn ensure_idle(&self, state: &HatState) -> DaqResult<()> {
        match state.scan {
            ScanSlot::Active(_) => Err(self.busy("scan active")),
            _ => Ok(()),
        }
    }

    /// Channels usable in the current input mode.
    fn channel_count(&self, state: &HatState) -> u8 {
        self.info
            .channels_in(state.input_mode)
            .unwrap_or(self.info.channel_count)
    }

    fn check_channel(&self, channel: u8, count: u8) -> DaqResult<()> {
        if channel >= count {
            return Err(DaqError::bad_parameter(format!(
                "channel {channel} out of range 0..{count} for {}",
                self.info.model
            )));
        }
        Ok(())
    }

    fn check_iepe_channel(&self, channel: u8) -> DaqResult<()> {
        if !self.info.supports_iepe {
            return Err(DaqError::bad_parameter(format!(
                "{} has no IEPE inputs",
                self.info.model
            )));
        }
        self.check_channel(channel, self.info.channel_count)
    }

    /// One hardware transaction. Lock order: bus, then board.
    fn transact<R>(
        &self,
        f: impl FnOnce(&mut dyn Board, &mut BusGuard<'_>) -> DaqResult<R>,
    ) -> DaqResult<R> {
        let mut bus = self.bus.acquire(self.address)?;
        let mut board = self.board.lock();
        f(&mut **board, &mut bus)
    }

    fn active_scan(&self) -> DaqResult<Arc<ScanShared>> {
        match &self.state.lock().scan {
            ScanSlot::Active(active) => Ok(active.shared.clone()),
            _ => Err(DaqError::ResourceUnavailable(format!(
                "no scan active on board {}",
                self.address
            ))),
        }
    }

    // ─── Scan control ───────────────────────────────────────────────

    /// Validate and record a scan configuration; returns the achieved
    /// per-channel rate.
    ///
    /// `samples_per_channel` of 0 is only valid with `CONTINUOUS`, where it
    /// means "default buffer size".
    ///
    /// Boards on a shared clock (master or slave) scan at the configured
    /// clock rate; `rate` is ignored for them.
    ///
    /// # Errors
    /// - `Busy` while a scan is Active
    /// - `BadParameter` for an invalid mask, rate or option combination
    pub fn configure_scan(
        &self,
        channel_mask: u8,
        samples_per_channel: u32,
        rate: f64,
        options: ScanOptions,
    ) -> DaqResult<f64> {
        let mut state = self.state.lock();
        self.ensure_idle(&state)?;

        let channels = channels_from_mask(channel_mask, self.channel_count(&state))?;
        let external_clock = options.contains(ScanOptions::EXT_CLOCK);
        if external_clock && !self.info.supports_external_clock {
            return Err(DaqError::bad_parameter(format!(
                "{} has no external clock input",
                self.info.model
            )));
        }
        if samples_per_channel == 0 && !options.contains(ScanOptions::CONTINUOUS) {
            return Err(DaqError::bad_parameter(
                "finite scan needs a non-zero sample count",
            ));
        }

        let achieved = match state.clock {
            ClockConfig {
                role: SourceRole::Master | SourceRole::Slave,
                rate: Some(clock_rate),
            } => {
                self.info
                    .achievable_rate(channels.len(), clock_rate, external_clock)?
            }
            _ => self
                .info
                .achievable_rate(channels.len(), rate, external_clock)?,
        };

        debug!(
            address = self.address,
            requested = rate,
            achieved,
            channels = channels.len(),
            "Scan configured"
        );
        state.scan = ScanSlot::Configured(ScanSetup {
            channels,
            rate: achieved,
            rows: samples_per_channel,
            options,
        });
        Ok(achieved)
    }

    /// Allocate the buffer and spawn the sampler for the configured scan.
    ///
    /// # Errors
    /// - `Busy` if a scan is already Active (the running scan is untouched)
    /// - `ResourceUnavailable` if nothing is configured or allocation fails
    pub fn start(&self) -> DaqResult<()> {
        let mut state = self.state.lock();
        let setup = match &state.scan {
            ScanSlot::Active(_) => return Err(self.busy("scan already active")),
            ScanSlot::Idle => {
                return Err(DaqError::ResourceUnavailable(format!(
                    "no scan configured on board {}",
                    self.address
                )));
            }
            ScanSlot::Configured(setup) => setup.clone(),
        };

        let mode = if setup.options.contains(ScanOptions::CONTINUOUS) {
            BufferMode::Continuous
        } else {
            BufferMode::Finite
        };
        let buffer = ScanBuffer::allocate(
            mode,
            setup.channels.len(),
            setup.rows as usize,
            setup.rate,
        )?;
        let capacity = buffer.capacity();

        let range = self.info.range(state.range_index)?;
        let calibration: Vec<Calibration> = {
            let board = self.board.lock();
            setup.channels.iter().map(|ch| board.calibration(*ch)).collect()
        };
        let sensitivity: Vec<f64> = setup
            .channels
            .iter()
            .map(|ch| state.sensitivity[usize::from(*ch)])
            .collect();
        let plan = ScanPlan {
            converter: SampleConverter::new(
                self.info,
                range,
                setup.options,
                &calibration,
                &sensitivity,
            ),
            trigger_mode: state.trigger.1,
            wait_for_sync: setup.options.contains(ScanOptions::EXT_CLOCK)
                || state.clock.role == SourceRole::Slave,
            tuning: self.tuning,
            setup,
        };

        let shared = Arc::new(ScanShared::new(self.address, buffer));
        let sampler = Sampler::new(
            self.address,
            self.board.clone(),
            self.bus.clone(),
            shared.clone(),
            plan.clone(),
        );
        let thread = sampler.spawn()?;

        info!(
            address = self.address,
            rate = plan.setup.rate,
            channels = plan.setup.channels.len(),
            rows = plan.setup.rows,
            capacity,
            continuous = mode == BufferMode::Continuous,
            "Scan started"
        );
        state.scan = ScanSlot::Active(ActiveScan {
            shared,
            thread: Some(thread),
        });
        Ok(())
    }

    /// `configure_scan` followed by `start`.
    pub fn start_scan(
        &self,
        channel_mask: u8,
        samples_per_channel: u32,
        rate: f64,
        options: ScanOptions,
    ) -> DaqResult<f64> {
        let achieved = self.configure_scan(channel_mask, samples_per_channel, rate, options)?;
        self.start()?;
        Ok(achieved)
    }

    /// Read buffered rows.
    ///
    /// # Errors
    /// `ResourceUnavailable` if no scan is Active.
    pub fn read(&self, request: ReadRequest, wait: Wait) -> DaqResult<ScanRead> {
        Ok(self.active_scan()?.read(request, wait))
    }

    /// Read buffered rows into `out`, bounded by its length in whole rows.
    ///
    /// # Errors
    /// `ResourceUnavailable` if no scan is Active.
    pub fn read_into(&self, request: ReadRequest, wait: Wait, out: &mut [f64]) -> DaqResult<ReadInfo> {
        Ok(self.active_scan()?.read_into(request, wait, out))
    }

    /// Status flags, row counts and stored fault.
    ///
    /// # Errors
    /// `ResourceUnavailable` if no scan is Active.
    pub fn status(&self) -> DaqResult<StatusReport> {
        Ok(self.active_scan()?.status())
    }

    /// Stop the sampler without discarding buffered data. Blocks until the
    /// thread has exited. A no-op on an already stopped scan.
    ///
    /// # Errors
    /// `ResourceUnavailable` if no scan is Active.
    pub fn stop(&self) -> DaqResult<()> {
        let mut state = self.state.lock();
        match &mut state.scan {
            ScanSlot::Active(active) => {
                active.stop_and_join(self.address);
                Ok(())
            }
            _ => Err(DaqError::ResourceUnavailable(format!(
                "no scan active on board {}",
                self.address
            ))),
        }
    }

    /// Free the scan buffer and return to Idle.
    ///
    /// # Errors
    /// `Busy` while the sampler is still running.
    pub fn cleanup(&self) -> DaqResult<()> {
        let mut state = self.state.lock();
        if let ScanSlot::Active(active) = &mut state.scan {
            if active.shared.running() {
                return Err(self.busy("scan running, stop it before cleanup"));
            }
            // Finished on its own; reap the thread.
            active.stop_and_join(self.address);
            debug!(address = self.address, "Scan cleaned up");
        }
        state.scan = ScanSlot::Idle;
        Ok(())
    }

    /// Buffer capacity in samples.
    ///
    /// # Errors
    /// `ResourceUnavailable` if no scan is Active.
    pub fn buffer_capacity(&self) -> DaqResult<usize> {
        Ok(self.active_scan()?.capacity())
    }

    /// Channels in the active scan; 0 when Idle.
    pub fn scan_channel_count(&self) -> usize {
        self.active_scan().map_or(0, |scan| scan.channels())
    }

    /// True while a scan is Active (running or stopped, not cleaned up).
    pub fn scan_active(&self) -> bool {
        matches!(self.state.lock().scan, ScanSlot::Active(_))
    }

    /// Stop and clean up unconditionally. Used when the last handle closes.
    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        if let ScanSlot::Active(active) = &mut state.scan {
            if active.shared.running() {
                warn!(address = self.address, "Closing board with a running scan");
            }
            active.stop_and_join(self.address);
        }
        state.scan = ScanSlot::Idle;
    }

    // ─── Non-scan operations ────────────────────────────────────────

    /// One conversion on `channel`, calibrated and scaled per `options`.
    ///
    /// # Errors
    /// `Busy` while a scan is Active; `BadParameter` for a bad channel.
    pub fn read_single_value(&self, channel: u8, options: ScanOptions) -> DaqResult<f64> {
        let state = self.state.lock();
        self.ensure_idle(&state)?;
        self.check_channel(channel, self.channel_count(&state))?;
        let range = self.info.range(state.range_index)?;

        let (raw, calibration) = self.transact(|board, bus| {
            Ok((board.read_raw_sample(bus, channel)?, board.calibration(channel)))
        })?;
        let sensitivity = state.sensitivity[usize::from(channel)];
        let converter =
            SampleConverter::new(self.info, range, options, &[calibration], &[sensitivity]);
        Ok(converter.convert(0, raw))
    }

    /// Select the input range used by subsequent reads and scans.
    ///
    /// # Errors
    /// `Busy` while a scan is Active; `BadParameter` for a bad index.
    pub fn set_input_range(&self, index: usize) -> DaqResult<()> {
        let mut state = self.state.lock();
        self.ensure_idle(&state)?;
        let range = self.info.range(index)?;
        self.transact(|board, bus| board.set_input_range(bus, index))?;
        state.range_index = index;
        debug!(address = self.address, min = range.min, max = range.max, "Input range set");
        Ok(())
    }

    /// Currently selected input range.
    pub fn input_range(&self) -> InputRange {
        let index = self.state.lock().range_index;
        self.info.ranges[index]
    }

    /// Calibration coefficients for `channel`.
    ///
    /// # Errors
    /// `BadParameter` for a bad channel.
    pub fn calibration_coefficient(&self, channel: u8) -> DaqResult<Calibration> {
        self.check_channel(channel, self.info.channel_count)?;
        Ok(self.board.lock().calibration(channel))
    }

    /// Replace the calibration coefficients for `channel`.
    ///
    /// # Errors
    /// `Busy` while a scan is Active; `BadParameter` for a bad channel or
    /// non-finite coefficients.
    pub fn set_calibration_coefficient(&self, channel: u8, slope: f64, offset: f64) -> DaqResult<()> {
        let state = self.state.lock();
        self.ensure_idle(&state)?;
        self.check_channel(channel, self.info.channel_count)?;
        let calibration = Calibration { slope, offset };
        calibration.validate()?;
        self.board.lock().set_calibration(channel, calibration);
        Ok(())
    }

    /// Select single-ended or differential inputs. Differential mode
    /// pairs the inputs, so only the lower half of the channels is valid.
    ///
    /// # Errors
    /// `Busy` while a scan is Active; `BadParameter` if the model has no
    /// such mode.
    pub fn set_input_mode(&self, mode: InputMode) -> DaqResult<()> {
        let mut state = self.state.lock();
        self.ensure_idle(&state)?;
        let channels = self.info.channels_in(mode)?;
        self.transact(|board, bus| board.set_input_mode(bus, mode))?;
        state.input_mode = mode;
        // A configured scan may name channels the new mode lacks.
        if matches!(state.scan, ScanSlot::Configured(_)) {
            state.scan = ScanSlot::Idle;
        }
        debug!(address = self.address, ?mode, channels, "Input mode set");
        Ok(())
    }

    /// Current input mode.
    pub fn input_mode(&self) -> InputMode {
        self.state.lock().input_mode
    }

    /// Turn the IEPE excitation current of `channel` on or off.
    ///
    /// # Errors
    /// `Busy` while a scan is Active; `BadParameter` for a bad channel or
    /// a model without IEPE inputs.
    pub fn set_iepe_config(&self, channel: u8, enabled: bool) -> DaqResult<()> {
        let state = self.state.lock();
        self.ensure_idle(&state)?;
        self.check_iepe_channel(channel)?;
        self.transact(|board, bus| board.write_iepe_config(bus, channel, enabled))?;
        debug!(address = self.address, channel, enabled, "IEPE configured");
        Ok(())
    }

    /// True if IEPE excitation is on for `channel`.
    ///
    /// # Errors
    /// `BadParameter` for a bad channel or a model without IEPE inputs.
    pub fn iepe_config(&self, channel: u8) -> DaqResult<bool> {
        self.check_iepe_channel(channel)?;
        self.transact(|board, bus| board.read_iepe_config(bus, channel))
    }

    /// Sensor sensitivity for `channel` in mV per engineering unit. Scaled
    /// values are divided by it; the default of 1000 leaves them in volts.
    ///
    /// # Errors
    /// `Busy` while a scan is Active; `BadParameter` for a bad channel, a
    /// model without IEPE inputs, or a zero or non-finite value.
    pub fn set_sensitivity(&self, channel: u8, mv_per_unit: f64) -> DaqResult<()> {
        let mut state = self.state.lock();
        self.ensure_idle(&state)?;
        self.check_iepe_channel(channel)?;
        if !mv_per_unit.is_finite() || mv_per_unit == 0.0 {
            return Err(DaqError::bad_parameter(format!(
                "sensitivity must be finite and non-zero, got {mv_per_unit}"
            )));
        }
        state.sensitivity[usize::from(channel)] = mv_per_unit;
        Ok(())
    }

    /// Sensor sensitivity for `channel` in mV per engineering unit.
    ///
    /// # Errors
    /// `BadParameter` for a bad channel or a model without IEPE inputs.
    pub fn sensitivity(&self, channel: u8) -> DaqResult<f64> {
        self.check_iepe_channel(channel)?;
        Ok(self.state.lock().sensitivity[usize::from(channel)])
    }

    // ─── Clock / trigger ────────────────────────────────────────────

    /// Set the clock role and rate; returns the achieved rate.
    ///
    /// A slave runs at its master's rate, so pass the master's rate here.
    /// [`SyncCoordinator::configure_group`](crate::sync::SyncCoordinator::configure_group)
    /// does this for every slave of a group.
    ///
    /// # Errors
    /// `Busy` while a scan is Active; `BadParameter` for a non-positive
    /// rate or a shared role on a board without clock sync.
    pub fn configure_clock(&self, role: SourceRole, rate: f64) -> DaqResult<f64> {
        let mut state = self.state.lock();
        self.ensure_idle(&state)?;
        if role != SourceRole::Local && !self.info.supports_clock_sync {
            return Err(DaqError::bad_parameter(format!(
                "{} does not support shared clocks",
                self.info.model
            )));
        }
        if !rate.is_finite() || rate <= 0.0 {
            return Err(DaqError::bad_parameter(format!(
                "clock rate must be positive, got {rate}"
            )));
        }
        let achieved = self.info.rate_model.quantize(rate);
        self.transact(|board, bus| board.write_clock_config(bus, role, achieved))?;
        state.clock = ClockConfig {
            role,
            rate: Some(achieved),
        };
        debug!(address = self.address, ?role, rate = achieved, "Clock configured");
        Ok(achieved)
    }

    /// Current clock role.
    pub fn clock_role(&self) -> SourceRole {
        self.state.lock().clock.role
    }

    /// Rate of the configured clock, if one was set.
    pub fn clock_rate(&self) -> Option<f64> {
        self.state.lock().clock.rate
    }

    /// Record the rate a slave actually runs at once its master is
    /// configured. No hardware access.
    pub(crate) fn follow_master_rate(&self, rate: f64) {
        let mut state = self.state.lock();
        if state.clock.role == SourceRole::Slave {
            state.clock.rate = Some(rate);
        }
    }

    /// Set the trigger role and condition.
    ///
    /// # Errors
    /// `Busy` while a scan is Active; `BadParameter` for a shared role on a
    /// board without clock sync.
    pub fn configure_trigger(&self, role: SourceRole, mode: TriggerMode) -> DaqResult<()> {
        let mut state = self.state.lock();
        self.ensure_idle(&state)?;
        if role != SourceRole::Local && !self.info.supports_clock_sync {
            return Err(DaqError::bad_parameter(format!(
                "{} does not support shared triggers",
                self.info.model
            )));
        }
        self.transact(|board, bus| board.write_trigger_config(bus, role, mode))?;
        state.trigger = (role, mode);
        debug!(address = self.address, ?role, ?mode, "Trigger configured");
        Ok(())
    }

    /// True once this board's clock is locked to its source.
    pub fn read_sync_status(&self) -> DaqResult<bool> {
        self.transact(|board, bus| board.read_sync_status(bus))
    }
}

impl Drop for Hat {
    fn drop(&mut self) {
        if let ScanSlot::Active(active) = &mut self.state.get_mut().scan {
            active.stop_and_join(self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::{Backplane, SimBoard};
    use daqhat_common::config::{BusConfig, SimBoardConfig};
    use tempfile::TempDir;

    fn hat(model: BoardModel) -> (TempDir, Hat) {
        let dir = TempDir::new().unwrap();
        let backplane = Backplane::new();
        backplane
            .insert_board(SimBoardConfig {
                address: 0,
                model,
                waveforms: Vec::new(),
                calibration: Vec::new(),
            })
            .unwrap();
        let config = BusConfig {
            lock_file: dir.path().join("bus.lock"),
            ..BusConfig::default()
        };
        let bus = Arc::new(BusArbiter::open(&config, backplane.address_lines()).unwrap());
        let board = SimBoard::new(0, model, backplane).unwrap();
        (dir, Hat::new(Box::new(board), bus, ScanTuning::default()))
    }

    #[test]
    fn new_hat_is_idle_and_local() {
        let (_dir, hat) = hat(BoardModel::Mcc128);
        assert_eq!(hat.model(), BoardModel::Mcc128);
        assert_eq!(hat.input_range(), hat.info().ranges[0]);
        assert_eq!(hat.clock_role(), SourceRole::Local);
        assert!(!hat.scan_active());
        assert_eq!(hat.scan_channel_count(), 0);
    }

    #[test]
    fn shared_clock_rate_overrides_scan_rate() {
        let (_dir, hat) = hat(BoardModel::Mcc172);
        assert_eq!(
            hat.configure_scan(0b1, 10, 1000.0, ScanOptions::empty()).unwrap(),
            51_200.0 / 51.0
        );

        let clock = hat.configure_clock(SourceRole::Master, 25_600.0).unwrap();
        assert_eq!(clock, 25_600.0);
        assert_eq!(
            hat.configure_scan(0b1, 10, 1000.0, ScanOptions::empty()).unwrap(),
            clock
        );
    }

    #[test]
    fn differential_mode_limits_channels() {
        let (_dir, hat) = hat(BoardModel::Mcc128);
        assert_eq!(hat.input_mode(), InputMode::SingleEnded);
        hat.configure_scan(0b1000_0000, 10, 1000.0, ScanOptions::empty())
            .unwrap();

        hat.set_input_mode(InputMode::Differential).unwrap();
        assert_eq!(hat.input_mode(), InputMode::Differential);
        // The configured scan named channel 7; it is dropped.
        assert!(matches!(hat.start(), Err(DaqError::ResourceUnavailable(_))));
        assert!(matches!(
            hat.configure_scan(0b1_0000, 10, 1000.0, ScanOptions::empty()),
            Err(DaqError::BadParameter(_))
        ));
        assert!(hat.configure_scan(0b1111, 10, 1000.0, ScanOptions::empty()).is_ok());
        assert!(matches!(
            hat.read_single_value(4, ScanOptions::empty()),
            Err(DaqError::BadParameter(_))
        ));
        assert!(hat.read_single_value(3, ScanOptions::empty()).is_ok());

        hat.set_input_mode(InputMode::SingleEnded).unwrap();
        assert!(hat.read_single_value(7, ScanOptions::empty()).is_ok());
    }

    #[test]
    fn differential_mode_needs_support() {
        let (_dir, hat) = hat(BoardModel::Mcc118);
        assert!(matches!(
            hat.set_input_mode(InputMode::Differential),
            Err(DaqError::BadParameter(_))
        ));
        assert_eq!(hat.input_mode(), InputMode::SingleEnded);
    }

    #[test]
    fn iepe_and_sensitivity_on_mcc172() {
        let (_dir, hat) = hat(BoardModel::Mcc172);
        assert!(!hat.iepe_config(1).unwrap());
        hat.set_iepe_config(1, true).unwrap();
        assert!(hat.iepe_config(1).unwrap());
        assert!(!hat.iepe_config(0).unwrap());
        assert!(matches!(hat.set_iepe_config(2, true), Err(DaqError::BadParameter(_))));

        assert_eq!(hat.sensitivity(0).unwrap(), UNITY_SENSITIVITY_MV);
        hat.set_sensitivity(0, 100.0).unwrap();
        assert_eq!(hat.sensitivity(0).unwrap(), 100.0);
        assert!(hat.set_sensitivity(0, 0.0).is_err());
        assert!(hat.set_sensitivity(0, f64::INFINITY).is_err());
    }

    #[test]
    fn iepe_rejected_without_support() {
        let (_dir, hat) = hat(BoardModel::Mcc118);
        assert!(matches!(hat.iepe_config(0), Err(DaqError::BadParameter(_))));
        assert!(matches!(
            hat.set_sensitivity(0, 100.0),
            Err(DaqError::BadParameter(_))
        ));
    }

    #[test]
    fn rejects_non_positive_clock_rate() {
        let (_dir, hat) = hat(BoardModel::Mcc172);
        assert!(matches!(
            hat.configure_clock(SourceRole::Local, 0.0),
            Err(DaqError::BadParameter(_))
        ));
    }
}
