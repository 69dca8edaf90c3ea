//! Simulated MCC 118 / 128 / 172 board.
//!
//! Produces ADC codes from a per-channel [`Waveform`] sampled on the scan's
//! own clock, so row `n` of a scan always carries the signal at `n / rate`
//! regardless of host scheduling.

use super::backplane::Backplane;
use daqhat_common::board::{Board, BoardInfo, BoardModel, InputRange, ScanSetup, SelectedBus};
use daqhat_common::config::Waveform;
use daqhat_common::consts::MAX_CHANNELS;
use daqhat_common::error::{DaqError, DaqResult};
use daqhat_common::types::{Calibration, InputMode, ScanOptions, SourceRole, TriggerMode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug)]
struct ArmedScan {
    setup: ScanSetup,
    conversions: [u64; MAX_CHANNELS],
}

/// One simulated board seated on a [`Backplane`].
#[derive(Debug)]
pub struct SimBoard {
    address: u8,
    info: &'static BoardInfo,
    backplane: Arc<Backplane>,
    waveforms: Vec<Waveform>,
    calibration: Vec<Calibration>,
    range: InputRange,
    input_mode: InputMode,
    /// IEPE excitation, one bit per channel.
    iepe: u8,
    clock_role: SourceRole,
    trigger: (SourceRole, TriggerMode),
    scan: Option<ArmedScan>,
    powered: Instant,
}

impl SimBoard {
    /// Build the board seated at `address`.
    ///
    /// # Errors
    /// `InvalidDevice` if no board, or a different model, is seated there.
    pub fn new(address: u8, model: BoardModel, backplane: Arc<Backplane>) -> DaqResult<Self> {
        let config = backplane
            .board_config(address)
            .ok_or_else(|| DaqError::InvalidDevice {
                address,
                reason: "no board responds".to_string(),
            })?;
        if config.model != model {
            return Err(DaqError::InvalidDevice {
                address,
                reason: format!("expected {model}, found {}", config.model),
            });
        }

        let info = model.info();
        let channels = usize::from(info.channel_count);
        let mut waveforms = config.waveforms;
        waveforms.resize(channels, Waveform::default());

        let mut calibration = config.calibration;
        if calibration.len() < channels {
            warn!(
                address,
                "No factory calibration for {} of {} channels, using slope 1.0 / offset 0.0",
                channels - calibration.len(),
                channels
            );
            calibration.resize(channels, Calibration::default());
        }

        Ok(Self {
            address,
            info,
            backplane,
            waveforms,
            calibration,
            range: info.ranges[0],
            input_mode: InputMode::SingleEnded,
            iepe: 0,
            clock_role: SourceRole::Local,
            trigger: (SourceRole::Local, TriggerMode::default()),
            scan: None,
            powered: Instant::now(),
        })
    }

    /// Last trigger role and mode written.
    pub fn trigger_config(&self) -> (SourceRole, TriggerMode) {
        self.trigger
    }

    fn check_bus(&self, bus: &dyn SelectedBus) -> DaqResult<()> {
        if bus.selected_address() != self.address || self.backplane.selected() != Some(self.address) {
            return Err(DaqError::comms(self.address, "transfer while not selected"));
        }
        if self.backplane.transfers_failing(self.address) {
            return Err(DaqError::comms(self.address, "no response to transfer"));
        }
        Ok(())
    }

    fn check_channel(&self, channel: u8) -> DaqResult<usize> {
        let count = self.info.channels_in(self.input_mode)?;
        if channel >= count {
            return Err(DaqError::bad_parameter(format!(
                "channel {channel} out of range 0..{count}"
            )));
        }
        Ok(usize::from(channel))
    }

    fn check_iepe(&self, channel: u8) -> DaqResult<()> {
        if !self.info.supports_iepe || channel >= self.info.channel_count {
            return Err(DaqError::bad_parameter(format!(
                "no IEPE input {channel} on {}",
                self.info.model
            )));
        }
        Ok(())
    }

    /// Code the ADC would report for `volts`, before calibration correction.
    fn volts_to_code(&self, channel: usize, volts: f64) -> i32 {
        let ideal =
            (volts - self.range.min) / self.info.lsb(self.range) + f64::from(self.info.code_min);
        let cal = self.calibration[channel];
        let raw = (ideal - cal.offset) / cal.slope;
        raw.round()
            .clamp(f64::from(self.info.code_min), f64::from(self.info.code_max)) as i32
    }
}

impl Board for SimBoard {
    fn info(&self) -> &'static BoardInfo {
        self.info
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn calibration(&self, channel: u8) -> Calibration {
        self.calibration
            .get(usize::from(channel))
            .copied()
            .unwrap_or_default()
    }

    fn set_calibration(&mut self, channel: u8, calibration: Calibration) {
        if let Some(slot) = self.calibration.get_mut(usize::from(channel)) {
            *slot = calibration;
        }
    }

    fn configure_scan(&mut self, bus: &mut dyn SelectedBus, setup: &ScanSetup) -> DaqResult<()> {
        self.check_bus(bus)?;
        if setup.options.contains(ScanOptions::EXT_CLOCK) && !self.info.supports_external_clock {
            return Err(DaqError::bad_parameter(format!(
                "{} has no external clock input",
                self.info.model
            )));
        }
        for channel in &setup.channels {
            self.check_channel(*channel)?;
        }
        self.scan = Some(ArmedScan {
            setup: setup.clone(),
            conversions: [0; MAX_CHANNELS],
        });
        debug!(address = self.address, rate = setup.rate, "Simulated scan armed");
        Ok(())
    }

    fn read_raw_sample(&mut self, bus: &mut dyn SelectedBus, channel: u8) -> DaqResult<i32> {
        self.check_bus(bus)?;
        let index = self.check_channel(channel)?;

        let t = match self.scan.as_mut() {
            Some(scan) => {
                let n = scan.conversions[index];
                scan.conversions[index] += 1;
                n as f64 / scan.setup.rate
            }
            None => self.powered.elapsed().as_secs_f64(),
        };
        let volts = self.waveforms[index].value_at(t);
        Ok(self.volts_to_code(index, volts))
    }

    fn end_scan(&mut self, bus: &mut dyn SelectedBus) -> DaqResult<()> {
        self.check_bus(bus)?;
        self.scan = None;
        Ok(())
    }

    fn set_input_range(&mut self, bus: &mut dyn SelectedBus, index: usize) -> DaqResult<()> {
        self.check_bus(bus)?;
        self.range = self.info.range(index)?;
        Ok(())
    }

    fn write_clock_config(
        &mut self,
        bus: &mut dyn SelectedBus,
        role: SourceRole,
        rate: f64,
    ) -> DaqResult<()> {
        self.check_bus(bus)?;
        if role != SourceRole::Local && !self.info.supports_clock_sync {
            return Err(DaqError::bad_parameter(format!(
                "{} does not support shared clocks",
                self.info.model
            )));
        }
        self.clock_role = role;
        self.backplane.configure_clock(self.address, role, rate);
        Ok(())
    }

    fn read_sync_status(&mut self, bus: &mut dyn SelectedBus) -> DaqResult<bool> {
        self.check_bus(bus)?;
        let external = self
            .scan
            .as_ref()
            .is_some_and(|s| s.setup.options.contains(ScanOptions::EXT_CLOCK));
        if external {
            return Ok(self.backplane.external_clock());
        }
        Ok(self.backplane.clock_locked(self.address, self.clock_role))
    }

    fn write_trigger_config(
        &mut self,
        bus: &mut dyn SelectedBus,
        role: SourceRole,
        mode: TriggerMode,
    ) -> DaqResult<()> {
        self.check_bus(bus)?;
        if role != SourceRole::Local && !self.info.supports_clock_sync {
            return Err(DaqError::bad_parameter(format!(
                "{} does not support shared triggers",
                self.info.model
            )));
        }
        self.trigger = (role, mode);
        Ok(())
    }

    fn read_trigger_input(&mut self, bus: &mut dyn SelectedBus) -> DaqResult<bool> {
        self.check_bus(bus)?;
        // Every role sees the shared line level.
        Ok(self.backplane.trigger_level())
    }

    fn set_input_mode(&mut self, bus: &mut dyn SelectedBus, mode: InputMode) -> DaqResult<()> {
        self.check_bus(bus)?;
        self.info.channels_in(mode)?;
        self.input_mode = mode;
        Ok(())
    }

    fn write_iepe_config(
        &mut self,
        bus: &mut dyn SelectedBus,
        channel: u8,
        enabled: bool,
    ) -> DaqResult<()> {
        self.check_bus(bus)?;
        self.check_iepe(channel)?;
        if enabled {
            self.iepe |= 1 << channel;
        } else {
            self.iepe &= !(1 << channel);
        }
        Ok(())
    }

    fn read_iepe_config(&mut self, bus: &mut dyn SelectedBus, channel: u8) -> DaqResult<bool> {
        self.check_bus(bus)?;
        self.check_iepe(channel)?;
        Ok(self.iepe & (1 << channel) != 0)
    }
}
