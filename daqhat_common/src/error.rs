//! Error taxonomy for board operations.
//!
//! Every fallible call in the workspace returns [`DaqError`]. Variants map
//! one-to-one onto the integer result codes used by the board firmware
//! tooling, see [`DaqError::code`].

use std::time::Duration;
use thiserror::Error;

/// Error types for board, bus and scan operations.
///
/// `Clone` so a fault captured inside the sampler thread can be reported on
/// every subsequent `status()` / `read()` until the scan is cleaned up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DaqError {
    /// Invalid address, channel, option combination or argument.
    /// Always raised before any hardware is touched.
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    /// A scan is already active, or a non-scan operation was attempted while
    /// one is running.
    #[error("Board {address} is busy: {reason}")]
    Busy {
        /// Board address
        address: u8,
        /// What the board is busy with
        reason: &'static str,
    },

    /// A bounded wait (other than bus lock or clock sync) expired.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The shared bus lock could not be obtained within its bound.
    #[error("Timed out after {timeout:?} waiting for the bus lock (board {address})")]
    LockTimeout {
        /// Board the caller wanted to talk to
        address: u8,
        /// Bound that expired
        timeout: Duration,
    },

    /// The address responds but is not the expected board type, or nothing
    /// answers at the address.
    #[error("Invalid device at address {address}: {reason}")]
    InvalidDevice {
        /// Board address
        address: u8,
        /// Human-readable mismatch description
        reason: String,
    },

    /// No scan is active, or a resource (memory, file, thread) could not be
    /// obtained.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// A bus transfer completed its handshake but reported or implied an
    /// I/O error.
    #[error("Communication failure with board {address}: {reason}")]
    CommsFailure {
        /// Board address
        address: u8,
        /// Failure description
        reason: String,
    },

    /// A board waiting for a shared clock never reported lock.
    #[error("Board {address} clock not synchronized after {waited:?}")]
    SyncTimeout {
        /// Board address
        address: u8,
        /// How long the engine waited
        waited: Duration,
    },
}

impl DaqError {
    /// Integer result code compatible with the board tooling.
    pub const fn code(&self) -> i32 {
        match self {
            Self::BadParameter(_) => -1,
            Self::Busy { .. } => -2,
            Self::Timeout(_) => -3,
            Self::LockTimeout { .. } => -4,
            Self::InvalidDevice { .. } => -5,
            Self::ResourceUnavailable(_) => -6,
            Self::CommsFailure { .. } => -7,
            Self::SyncTimeout { .. } => -8,
        }
    }

    /// Shorthand for [`DaqError::BadParameter`].
    pub fn bad_parameter(msg: impl Into<String>) -> Self {
        Self::BadParameter(msg.into())
    }

    /// Shorthand for [`DaqError::CommsFailure`].
    pub fn comms(address: u8, reason: impl Into<String>) -> Self {
        Self::CommsFailure {
            address,
            reason: reason.into(),
        }
    }
}

/// Result alias used across the workspace.
pub type DaqResult<T> = Result<T, DaqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_distinct() {
        let errors = [
            DaqError::bad_parameter("x"),
            DaqError::Busy {
                address: 0,
                reason: "scan active",
            },
            DaqError::Timeout(Duration::from_millis(1)),
            DaqError::LockTimeout {
                address: 0,
                timeout: Duration::from_secs(5),
            },
            DaqError::InvalidDevice {
                address: 0,
                reason: "x".into(),
            },
            DaqError::ResourceUnavailable("x".into()),
            DaqError::comms(0, "x"),
            DaqError::SyncTimeout {
                address: 0,
                waited: Duration::from_secs(1),
            },
        ];
        let mut codes: Vec<i32> = errors.iter().map(DaqError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|c| *c < 0));
    }

    #[test]
    fn error_display_carries_context() {
        let err = DaqError::LockTimeout {
            address: 3,
            timeout: Duration::from_secs(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("bus lock"));
        assert!(msg.contains("board 3"));

        let err = DaqError::Busy {
            address: 1,
            reason: "scan active",
        };
        assert!(err.to_string().contains("scan active"));
    }
}
