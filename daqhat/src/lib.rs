//! # DAQ HAT board-support library
//!
//! Host-side support for a stack of up to eight data-acquisition boards
//! sharing one serial bus: cross-process bus arbitration, hardware-paced
//! background scans and multi-board clock/trigger synchronization.
//!
//! # Module Structure
//!
//! - [`bus`] - Bus lock and address selection
//! - [`buffer`] - Finite / circular scan buffer
//! - [`scan`] - State shared between a sampler thread and readers
//! - [`sampler`] - Background acquisition thread
//! - [`hat`] - Per-board handle and scan state machine
//! - [`registry`] - Reference-counted open/close of boards
//! - [`sync`] - Clock/trigger group configuration
//! - [`driver_registry`] - Board factory registration
//! - [`drivers`] - Board implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  BoardRegistry ──open──► Hat ──start──► Sampler thread           │
//! │        │                  │                   │                  │
//! │        ▼                  ▼                   ▼                  │
//! │  DriverRegistry     ScanShared ◄──push── ScanBuffer              │
//! │        │                  ▲                                      │
//! │        ▼                  │ read / status                        │
//! │   dyn Board  ◄── BusArbiter (flock + address lines) ──► bus      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lock order is always per-board state, then bus, then board I/O.

#![deny(warnings)]
#![deny(missing_docs)]

pub mod buffer;
pub mod bus;
pub mod driver_registry;
pub mod drivers;
pub mod hat;
pub mod registry;
pub mod sampler;
pub mod scan;
pub mod sync;

// Re-export key types for convenience
pub use crate::bus::{AddressSelect, BusArbiter, BusGuard};
pub use crate::driver_registry::{BoardFactory, DriverRegistry};
pub use crate::hat::Hat;
pub use crate::registry::{BoardRegistry, Discovery};
pub use crate::scan::{ReadRequest, ScanRead, StatusReport, Wait};
pub use crate::sync::SyncCoordinator;
