//! Prelude module for common re-exports.
//!
//! ```rust
//! use daqhat_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    BusConfig, ConfigError, ConfigLoader, DaqConfig, LogLevel, ScanTuning, SharedConfig,
    SimBoardConfig, Waveform,
};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{DaqError, DaqResult};

// ─── Boards ─────────────────────────────────────────────────────────
pub use crate::board::{Board, BoardInfo, BoardModel, InputRange, ScanSetup, SelectedBus};

// ─── Scan vocabulary ────────────────────────────────────────────────
pub use crate::types::{
    Calibration, ChannelList, InputMode, ScanOptions, ScanStatus, SourceRole, TriggerMode,
    channels_from_mask,
};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{MAX_CHANNELS, MAX_NUMBER_HATS};
