//! Simulation driver.
//!
//! A software backplane with simulated MCC 118 / MCC 128 / MCC 172 boards,
//! for development and testing without physical hardware.

mod backplane;
mod board;

pub use backplane::{Backplane, LOCK_SAMPLE_CLOCKS, SimAddressLines};
pub use board::SimBoard;

use crate::bus::BusArbiter;
use crate::driver_registry::{BoardFactory, DriverRegistry};
use crate::registry::BoardRegistry;
use daqhat_common::board::{Board, BoardModel};
use daqhat_common::config::DaqConfig;
use daqhat_common::error::DaqResult;
use std::sync::Arc;
use tracing::info;

/// Register a simulated driver for every model, all seated on `backplane`.
pub fn register_drivers(registry: &mut DriverRegistry, backplane: &Arc<Backplane>) {
    for model in [BoardModel::Mcc118, BoardModel::Mcc128, BoardModel::Mcc172] {
        let backplane = Arc::clone(backplane);
        let factory: BoardFactory = Arc::new(move |address: u8| -> DaqResult<Box<dyn Board>> {
            Ok(Box::new(SimBoard::new(address, model, Arc::clone(&backplane))?))
        });
        registry.register(model, factory);
    }
}

/// A complete simulated stack: backplane, bus arbiter and board registry.
pub struct SimulatedSystem {
    /// Shared physical state, for driving trigger / clock lines in tests.
    pub backplane: Arc<Backplane>,
    /// Board registry wired to the simulated drivers.
    pub registry: BoardRegistry,
}

impl SimulatedSystem {
    /// Build the stack described by `config`.
    ///
    /// # Errors
    /// Lock file or board table errors.
    pub fn from_config(config: &DaqConfig) -> DaqResult<Self> {
        let backplane = Backplane::from_config(&config.simulation)?;
        let bus = Arc::new(BusArbiter::open(&config.bus, backplane.address_lines())?);

        let mut drivers = DriverRegistry::new();
        register_drivers(&mut drivers, &backplane);

        info!(
            boards = config.simulation.boards.len(),
            lock_file = %config.bus.lock_file.display(),
            "Simulated stack ready"
        );

        let registry = BoardRegistry::new(bus, drivers, backplane.clone(), config.scan);
        Ok(Self {
            backplane,
            registry,
        })
    }
}
