//! DAQ HAT Common Library
//!
//! Hardware-free vocabulary shared by the engine crate and its tools.
//!
//! # Module Structure
//!
//! - [`board`] - Board models, physical limits and the `Board` capability trait
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - System-wide limits and defaults
//! - [`error`] - `DaqError` taxonomy and result codes
//! - [`types`] - Scan option/status flags, roles, calibration coefficients
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use daqhat_common::prelude::*;
//!
//! let info = BoardModel::Mcc118.info();
//! let rate = info.achievable_rate(4, 1000.0, false).unwrap();
//! assert_eq!(rate, 1000.0);
//! ```

pub mod board;
pub mod config;
pub mod consts;
pub mod error;
pub mod prelude;
pub mod types;
