//! System-wide constants for the DAQ HAT workspace.
//!
//! Single source of truth for all numeric limits and default paths.

use static_assertions::const_assert;

/// Maximum number of boards stacked on one bus.
pub const MAX_NUMBER_HATS: usize = 8;

/// Number of GPIO lines used to select a board address.
pub const ADDRESS_LINES: usize = 3;

const_assert!(MAX_NUMBER_HATS <= 1 << ADDRESS_LINES);

/// Maximum analog input channels on any supported board.
pub const MAX_CHANNELS: usize = 8;

const_assert!(MAX_CHANNELS <= u8::BITS as usize);

/// Default cross-process bus lock file.
pub const DEFAULT_LOCK_FILE: &str = "/tmp/.mcc_spi_lockfile";

/// Default bound on acquiring the bus lock (5 s).
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Sleep between non-blocking lock attempts.
pub const LOCK_RETRY_US: u64 = 10;

/// Default address-select GPIO pins, least significant bit first.
pub const DEFAULT_ADDRESS_PINS: [u32; ADDRESS_LINES] = [12, 13, 26];

/// Default sysfs GPIO root.
pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// Default bound on waiting for a shared clock to lock.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 10_000;

/// Default interval between sync-status polls.
pub const DEFAULT_SYNC_POLL_US: u64 = 1_000;

/// Default interval between trigger-input polls.
pub const DEFAULT_TRIGGER_POLL_US: u64 = 1_000;

/// Hard ceiling on a scan buffer, in samples (16 Mi).
pub const MAX_SCAN_BUFFER_SAMPLES: usize = 16 * 1024 * 1024;

/// Continuous-mode default buffer depth per channel, by rate tier.
///
/// `(max_rate_inclusive, rows)`; rates above the last tier use
/// [`CONTINUOUS_FALLBACK_ROWS`].
pub const CONTINUOUS_BUFFER_TIERS: [(f64, usize); 3] =
    [(100.0, 1_000), (10_000.0, 10_000), (100_000.0, 100_000)];

/// Continuous-mode default buffer depth when the rate is above every tier.
pub const CONTINUOUS_FALLBACK_ROWS: usize = 10_000;
