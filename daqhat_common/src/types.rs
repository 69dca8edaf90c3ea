//! Scan option/status flags and small value types shared by every board.

use crate::consts::MAX_CHANNELS;
use crate::error::{DaqError, DaqResult};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// OR-combinable scan options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScanOptions: u32 {
        /// Return ADC codes instead of volts.
        const NO_SCALE      = 0x0001;
        /// Skip the factory calibration coefficients.
        const NO_CALIBRATE  = 0x0002;
        /// Pace the scan from the external clock input.
        const EXT_CLOCK     = 0x0004;
        /// Hold off acquisition until the trigger condition is met.
        const EXT_TRIGGER   = 0x0008;
        /// Run until stopped, wrapping the scan buffer.
        const CONTINUOUS    = 0x0010;
    }
}

bitflags! {
    /// Scan status flags.
    ///
    /// `RUNNING` clears exactly once per scan. The overrun flags persist
    /// until the scan is cleaned up.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScanStatus: u16 {
        /// The device-side sample queue dropped data.
        const HW_OVERRUN     = 0x0001;
        /// The host-side scan buffer wrapped over unread data.
        const BUFFER_OVERRUN = 0x0002;
        /// The trigger condition has been met.
        const TRIGGERED      = 0x0004;
        /// The sampler thread is still acquiring.
        const RUNNING        = 0x0008;
    }
}

impl ScanStatus {
    /// True if either overrun flag is set.
    pub fn overrun(self) -> bool {
        self.intersects(Self::HW_OVERRUN | Self::BUFFER_OVERRUN)
    }

    /// True while the sampler thread is acquiring.
    pub fn running(self) -> bool {
        self.contains(Self::RUNNING)
    }
}

/// Trigger input condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TriggerMode {
    /// Low-to-high transition since the previous check.
    #[default]
    RisingEdge = 0,
    /// High-to-low transition since the previous check.
    FallingEdge = 1,
    /// Input currently high.
    ActiveHigh = 2,
    /// Input currently low.
    ActiveLow = 3,
}

impl TriggerMode {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::RisingEdge),
            1 => Some(Self::FallingEdge),
            2 => Some(Self::ActiveHigh),
            3 => Some(Self::ActiveLow),
            _ => None,
        }
    }
}

/// Clock / trigger source role of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SourceRole {
    /// Independent; uses its own clock and trigger input.
    #[default]
    Local = 0,
    /// Drives the shared clock / trigger line for the other boards.
    Master = 1,
    /// Follows the shared clock / trigger line of a master board.
    Slave = 2,
}

impl SourceRole {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Local),
            1 => Some(Self::Master),
            2 => Some(Self::Slave),
            _ => None,
        }
    }
}

/// Analog input wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InputMode {
    /// Each input measured against ground.
    #[default]
    SingleEnded = 0,
    /// Inputs paired, halving the channel count.
    Differential = 1,
}

impl InputMode {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::SingleEnded),
            1 => Some(Self::Differential),
            _ => None,
        }
    }
}

/// Per-channel factory calibration: `calibrated = raw * slope + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Gain correction
    pub slope: f64,
    /// Offset correction, in codes
    pub offset: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            slope: 1.0,
            offset: 0.0,
        }
    }
}

impl Calibration {
    /// Apply the coefficients to a raw code.
    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.slope + self.offset
    }

    /// Reject non-finite coefficients.
    pub fn validate(&self) -> DaqResult<()> {
        if !self.slope.is_finite() || !self.offset.is_finite() {
            return Err(DaqError::bad_parameter(format!(
                "calibration coefficients must be finite (slope={}, offset={})",
                self.slope, self.offset
            )));
        }
        Ok(())
    }
}

/// Ordered list of active channels; ascending channel number is the
/// interleave order inside a row.
pub type ChannelList = heapless::Vec<u8, MAX_CHANNELS>;

/// Expand a channel bitmask into the ordered channel list.
///
/// # Errors
/// `BadParameter` if the mask is empty or names a channel at or above
/// `channel_count`.
pub fn channels_from_mask(mask: u8, channel_count: u8) -> DaqResult<ChannelList> {
    if mask == 0 {
        return Err(DaqError::bad_parameter("channel mask is empty"));
    }
    if channel_count < 8 && (mask >> channel_count) != 0 {
        return Err(DaqError::bad_parameter(format!(
            "channel mask {mask:#04x} exceeds {channel_count} channels"
        )));
    }

    let mut channels = ChannelList::new();
    for channel in 0..channel_count {
        if mask & (1 << channel) != 0 {
            // Capacity equals MAX_CHANNELS >= channel_count.
            let _ = channels.push(channel);
        }
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_expands_in_ascending_order() {
        let channels = channels_from_mask(0b1010_0101, 8).unwrap();
        assert_eq!(channels.as_slice(), &[0, 2, 5, 7]);
    }

    #[test]
    fn empty_mask_rejected() {
        assert!(matches!(
            channels_from_mask(0, 8),
            Err(DaqError::BadParameter(_))
        ));
    }

    #[test]
    fn mask_beyond_channel_count_rejected() {
        assert!(channels_from_mask(0b0000_0011, 2).is_ok());
        assert!(matches!(
            channels_from_mask(0b0000_0100, 2),
            Err(DaqError::BadParameter(_))
        ));
    }

    #[test]
    fn status_helpers() {
        let status = ScanStatus::RUNNING | ScanStatus::BUFFER_OVERRUN;
        assert!(status.running());
        assert!(status.overrun());
        assert!(!ScanStatus::TRIGGERED.overrun());
    }

    #[test]
    fn option_bits_match_wire_values() {
        assert_eq!(ScanOptions::NO_SCALE.bits(), 0x01);
        assert_eq!(ScanOptions::CONTINUOUS.bits(), 0x10);
        assert_eq!(ScanStatus::RUNNING.bits(), 0x08);
    }

    #[test]
    fn enum_roundtrip() {
        for val in 0..=3u8 {
            assert_eq!(TriggerMode::from_u8(val).unwrap() as u8, val);
        }
        assert!(TriggerMode::from_u8(4).is_none());
        for val in 0..=2u8 {
            assert_eq!(SourceRole::from_u8(val).unwrap() as u8, val);
        }
        assert!(SourceRole::from_u8(3).is_none());
        assert_eq!(InputMode::from_u8(1), Some(InputMode::Differential));
        assert!(InputMode::from_u8(2).is_none());
    }

    #[test]
    fn calibration_rejects_nan() {
        let cal = Calibration {
            slope: f64::NAN,
            offset: 0.0,
        };
        assert!(cal.validate().is_err());
        assert!(Calibration::default().validate().is_ok());
        assert_eq!(Calibration::default().apply(12.0), 12.0);
    }
}
