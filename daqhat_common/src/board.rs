//! Board descriptions and the board capability trait.
//!
//! This module defines:
//! - `BoardModel` - Known board types and their IDs
//! - `BoardInfo` - Per-model physical limits (channels, codes, ranges, rates)
//! - `RateModel` - How a model quantizes a requested sample rate
//! - `Board` trait - The small capability interface the scan engine drives
//!
//! The scan engine is written once against [`Board`]; each board type only
//! supplies raw conversions and its register-level configuration.

use crate::consts::CONTINUOUS_BUFFER_TIERS;
use crate::consts::CONTINUOUS_FALLBACK_ROWS;
use crate::error::{DaqError, DaqResult};
use crate::types::{Calibration, ChannelList, InputMode, ScanOptions, SourceRole, TriggerMode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Known board types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardModel {
    /// 8-channel 12-bit ±10 V voltage input
    Mcc118,
    /// 8-channel 16-bit multi-range voltage input
    Mcc128,
    /// 2-channel 24-bit IEPE / AC voltage input with shared clock
    Mcc172,
}

impl BoardModel {
    /// Product ID reported by the board EEPROM.
    pub const fn product_id(self) -> u16 {
        match self {
            Self::Mcc118 => 0x0142,
            Self::Mcc128 => 0x0146,
            Self::Mcc172 => 0x0145,
        }
    }

    /// Look up a model by product ID.
    pub const fn from_product_id(id: u16) -> Option<Self> {
        match id {
            0x0142 => Some(Self::Mcc118),
            0x0146 => Some(Self::Mcc128),
            0x0145 => Some(Self::Mcc172),
            _ => None,
        }
    }

    /// Physical limits of this model.
    pub fn info(self) -> &'static BoardInfo {
        match self {
            Self::Mcc118 => &MCC118_INFO,
            Self::Mcc128 => &MCC128_INFO,
            Self::Mcc172 => &MCC172_INFO,
        }
    }
}

impl fmt::Display for BoardModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mcc118 => "MCC 118",
            Self::Mcc128 => "MCC 128",
            Self::Mcc172 => "MCC 172",
        };
        f.write_str(name)
    }
}

/// One analog input range, in volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputRange {
    /// Voltage at the minimum code
    pub min: f64,
    /// Full-scale upper bound (the maximum code reads one LSB below this)
    pub max: f64,
}

/// How a model turns a requested per-channel rate into an achievable one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateModel {
    /// Timebase divided by a 32-bit period register.
    Timebase32 {
        /// Timebase frequency in Hz
        clock_hz: f64,
    },
    /// Timebase with a power-of-two prescaler (1..=256) and a 16-bit period.
    PrescaledTimebase16 {
        /// Timebase frequency in Hz
        clock_hz: f64,
    },
    /// Fixed base rate divided by an integer 1..=`max_divisor`.
    Divisor {
        /// Undivided sample rate in S/s
        base_rate: f64,
        /// Largest supported divisor
        max_divisor: u32,
        /// Requests below this are raised to it
        min_rate: f64,
    },
}

impl RateModel {
    /// Quantize a positive requested rate to the nearest value on the
    /// hardware grid. Deterministic for identical inputs.
    pub fn quantize(&self, rate: f64) -> f64 {
        match *self {
            Self::Timebase32 { clock_hz } => {
                let period = if rate <= clock_hz / f64::from(u32::MAX) {
                    u32::MAX
                } else {
                    // Truncation after +0.5 rounds to the nearest period.
                    ((clock_hz / rate + 0.5) as u64).saturating_sub(1).min(u64::from(u32::MAX)) as u32
                };
                clock_hz / (f64::from(period) + 1.0)
            }
            Self::PrescaledTimebase16 { clock_hz } => {
                let mut prescaler: u32 = 1;
                let mut period: u64;
                loop {
                    period = ((clock_hz / f64::from(prescaler) / rate + 0.5) as u64).saturating_sub(1);
                    if period <= 0xFFFF || prescaler >= 256 {
                        break;
                    }
                    prescaler *= 2;
                }
                let period = period.min(0xFFFF);
                (clock_hz / f64::from(prescaler)) / (period as f64 + 1.0)
            }
            Self::Divisor {
                base_rate,
                max_divisor,
                min_rate,
            } => {
                let rate = rate.max(min_rate);
                let divisor = (base_rate / rate + 0.5).clamp(1.0, f64::from(max_divisor)) as u32;
                base_rate / f64::from(divisor)
            }
        }
    }
}

/// Physical limits of one board model.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardInfo {
    /// Board type
    pub model: BoardModel,
    /// Number of analog input channels (single-ended)
    pub channel_count: u8,
    /// Channel count in differential mode; `None` if the mode is absent
    pub differential_channels: Option<u8>,
    /// Whether channels can power IEPE sensors and scale by sensitivity
    pub supports_iepe: bool,
    /// Minimum uncalibrated ADC code
    pub code_min: i32,
    /// Maximum uncalibrated ADC code
    pub code_max: i32,
    /// Selectable input ranges; index 0 is the power-on default
    pub ranges: &'static [InputRange],
    /// Rate quantization
    pub rate_model: RateModel,
    /// Maximum aggregate rate (per-channel rate × channels) in S/s
    pub max_aggregate_rate: f64,
    /// Whether `ScanOptions::EXT_CLOCK` is accepted
    pub supports_external_clock: bool,
    /// Whether clock master/slave roles are supported
    pub supports_clock_sync: bool,
    /// Depth of the on-board sample queue, in samples
    pub fifo_samples: u32,
}

/// MCC 118 limits.
pub static MCC118_INFO: BoardInfo = BoardInfo {
    model: BoardModel::Mcc118,
    channel_count: 8,
    differential_channels: None,
    supports_iepe: false,
    code_min: 0,
    code_max: 4095,
    ranges: &[InputRange {
        min: -10.0,
        max: 10.0,
    }],
    rate_model: RateModel::Timebase32 { clock_hz: 16e6 },
    max_aggregate_rate: 100_000.0,
    supports_external_clock: true,
    supports_clock_sync: false,
    fifo_samples: 5_120,
};

/// MCC 128 limits.
pub static MCC128_INFO: BoardInfo = BoardInfo {
    model: BoardModel::Mcc128,
    channel_count: 8,
    differential_channels: Some(4),
    supports_iepe: false,
    code_min: 0,
    code_max: 65_535,
    ranges: &[
        InputRange {
            min: -10.0,
            max: 10.0,
        },
        InputRange { min: -5.0, max: 5.0 },
        InputRange { min: -2.0, max: 2.0 },
        InputRange { min: -1.0, max: 1.0 },
    ],
    rate_model: RateModel::PrescaledTimebase16 { clock_hz: 16e6 },
    max_aggregate_rate: 100_000.0,
    supports_external_clock: true,
    supports_clock_sync: false,
    fifo_samples: 5_120,
};

/// MCC 172 limits.
pub static MCC172_INFO: BoardInfo = BoardInfo {
    model: BoardModel::Mcc172,
    channel_count: 2,
    differential_channels: None,
    supports_iepe: true,
    code_min: -8_388_608,
    code_max: 8_388_607,
    ranges: &[InputRange { min: -5.0, max: 5.0 }],
    rate_model: RateModel::Divisor {
        base_rate: 51_200.0,
        max_divisor: 256,
        min_rate: 200.0,
    },
    max_aggregate_rate: 102_400.0,
    supports_external_clock: false,
    supports_clock_sync: true,
    fifo_samples: 49_152,
};

impl BoardInfo {
    /// Code range as `(min, max)`.
    pub fn code_range(&self) -> (i32, i32) {
        (self.code_min, self.code_max)
    }

    /// Usable channels in `mode`.
    ///
    /// # Errors
    /// `BadParameter` if the model has no such mode.
    pub fn channels_in(&self, mode: InputMode) -> DaqResult<u8> {
        match mode {
            InputMode::SingleEnded => Ok(self.channel_count),
            InputMode::Differential => self.differential_channels.ok_or_else(|| {
                DaqError::bad_parameter(format!("{} has no differential mode", self.model))
            }),
        }
    }

    /// Input range by index.
    ///
    /// # Errors
    /// `BadParameter` if the index is out of range.
    pub fn range(&self, index: usize) -> DaqResult<InputRange> {
        self.ranges.get(index).copied().ok_or_else(|| {
            DaqError::bad_parameter(format!(
                "{} has {} input ranges, index {index} requested",
                self.model,
                self.ranges.len()
            ))
        })
    }

    /// Size of one code in volts for the given range.
    pub fn lsb(&self, range: InputRange) -> f64 {
        let span = f64::from(self.code_max) - f64::from(self.code_min) + 1.0;
        (range.max - range.min) / span
    }

    /// Convert a (possibly calibrated) code to volts:
    /// `(code - code_min) * lsb + range.min`.
    #[inline]
    pub fn scale(&self, code: f64, range: InputRange) -> f64 {
        (code - f64::from(self.code_min)) * self.lsb(range) + range.min
    }

    /// Validate and quantize a requested per-channel rate.
    ///
    /// # Errors
    /// `BadParameter` for non-positive / non-finite rates, an empty channel
    /// set, or an aggregate rate above the model maximum (internal clock).
    pub fn achievable_rate(
        &self,
        channel_count: usize,
        requested: f64,
        external_clock: bool,
    ) -> DaqResult<f64> {
        if !requested.is_finite() || requested <= 0.0 {
            return Err(DaqError::bad_parameter(format!(
                "sample rate must be positive, got {requested}"
            )));
        }
        if channel_count == 0 || channel_count > usize::from(self.channel_count) {
            return Err(DaqError::bad_parameter(format!(
                "{} channels requested, {} supports 1..={}",
                channel_count, self.model, self.channel_count
            )));
        }

        let achieved = self.rate_model.quantize(requested);
        if !external_clock && achieved * channel_count as f64 > self.max_aggregate_rate {
            return Err(DaqError::bad_parameter(format!(
                "{achieved:.3} S/s on {channel_count} channels exceeds {} aggregate limit of {} S/s",
                self.model, self.max_aggregate_rate
            )));
        }
        Ok(achieved)
    }

    /// Continuous-mode buffer depth in rows: the rate tier default, or the
    /// caller's request when larger.
    pub fn continuous_rows(rate: f64, requested_rows: usize) -> usize {
        let tier = CONTINUOUS_BUFFER_TIERS
            .iter()
            .find(|(max_rate, _)| rate <= *max_rate)
            .map_or(CONTINUOUS_FALLBACK_ROWS, |(_, rows)| *rows);
        tier.max(requested_rows)
    }
}

/// Proof that the bus lock is held and a board address is selected.
///
/// Implemented by the bus arbiter's scoped guard; boards receive it on
/// every hardware call so a transfer can never happen unlocked.
pub trait SelectedBus {
    /// Address currently driven on the select lines.
    fn selected_address(&self) -> u8;
}

/// Hardware-side scan configuration pushed during the configure phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSetup {
    /// Active channels in interleave order
    pub channels: ChannelList,
    /// Achieved per-channel rate
    pub rate: f64,
    /// Rows to acquire; 0 for continuous
    pub rows: u32,
    /// Option flags
    pub options: ScanOptions,
}

/// Capability interface implemented once per board type.
///
/// Every method that touches hardware takes a [`SelectedBus`]; the caller
/// owns arbitration. Implementations must check that the selected address
/// is their own and report `CommsFailure` otherwise.
pub trait Board: Send {
    /// Static description of this board's model.
    fn info(&self) -> &'static BoardInfo;

    /// Bus address of this board.
    fn address(&self) -> u8;

    /// Number of analog input channels.
    fn channel_count(&self) -> u8 {
        self.info().channel_count
    }

    /// Uncalibrated code range `(min, max)`.
    fn code_range(&self) -> (i32, i32) {
        self.info().code_range()
    }

    /// Factory calibration coefficients for one channel.
    fn calibration(&self, channel: u8) -> Calibration;

    /// Replace the calibration coefficients for one channel (in memory).
    fn set_calibration(&mut self, channel: u8, calibration: Calibration);

    /// Push the scan configuration and arm the board.
    fn configure_scan(&mut self, bus: &mut dyn SelectedBus, setup: &ScanSetup) -> DaqResult<()>;

    /// Read one raw conversion result for `channel`.
    fn read_raw_sample(&mut self, bus: &mut dyn SelectedBus, channel: u8) -> DaqResult<i32>;

    /// Disarm the board after a scan ends.
    fn end_scan(&mut self, bus: &mut dyn SelectedBus) -> DaqResult<()>;

    /// Select the active input range.
    fn set_input_range(&mut self, bus: &mut dyn SelectedBus, index: usize) -> DaqResult<()>;

    /// Write the clock role and rate.
    fn write_clock_config(
        &mut self,
        bus: &mut dyn SelectedBus,
        role: SourceRole,
        rate: f64,
    ) -> DaqResult<()>;

    /// True once this board's clock is locked to its source.
    fn read_sync_status(&mut self, bus: &mut dyn SelectedBus) -> DaqResult<bool>;

    /// Write the trigger role and mode.
    fn write_trigger_config(
        &mut self,
        bus: &mut dyn SelectedBus,
        role: SourceRole,
        mode: TriggerMode,
    ) -> DaqResult<()>;

    /// Instantaneous logic level seen on this board's trigger source.
    fn read_trigger_input(&mut self, bus: &mut dyn SelectedBus) -> DaqResult<bool>;

    /// Select single-ended or differential inputs.
    fn set_input_mode(&mut self, _bus: &mut dyn SelectedBus, mode: InputMode) -> DaqResult<()> {
        match mode {
            InputMode::SingleEnded => Ok(()),
            InputMode::Differential => Err(DaqError::bad_parameter(format!(
                "{} has no differential mode",
                self.info().model
            ))),
        }
    }

    /// Switch the IEPE excitation current of one channel.
    fn write_iepe_config(
        &mut self,
        _bus: &mut dyn SelectedBus,
        _channel: u8,
        _enabled: bool,
    ) -> DaqResult<()> {
        Err(DaqError::bad_parameter(format!(
            "{} has no IEPE inputs",
            self.info().model
        )))
    }

    /// True if IEPE excitation is on for one channel.
    fn read_iepe_config(&mut self, _bus: &mut dyn SelectedBus, _channel: u8) -> DaqResult<bool> {
        Err(DaqError::bad_parameter(format!(
            "{} has no IEPE inputs",
            self.info().model
        )))
    }
}
