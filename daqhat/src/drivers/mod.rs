//! Board driver implementations.
//!
//! - [`simulation`] - Software backplane and simulated boards
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `Board` trait from `daqhat_common::board`
//! 3. Register a factory per model with `DriverRegistry::register()`
//! 4. Provide a `Discovery` implementation for the bus it sits on

pub mod simulation;
