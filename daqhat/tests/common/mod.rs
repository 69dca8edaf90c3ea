//! Shared fixtures for the simulated-stack integration tests.

#![allow(dead_code)]

use daqhat::drivers::simulation::SimulatedSystem;
use daqhat_common::prelude::*;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A simulated stack with its own lock file. Keep the `TempDir` alive for
/// the duration of the test.
pub fn stack(boards: Vec<SimBoardConfig>) -> (TempDir, SimulatedSystem) {
    let dir = TempDir::new().expect("tempdir");
    let mut config = DaqConfig::default();
    config.bus.lock_file = dir.path().join("spi.lock");
    config.bus.lock_timeout_ms = 2_000;
    config.scan.sync_timeout_ms = 300;
    config.scan.sync_poll_us = 500;
    config.scan.trigger_poll_us = 500;
    config.simulation.boards = boards;
    config.validate().expect("valid config");
    let system = SimulatedSystem::from_config(&config).expect("simulated stack");
    (dir, system)
}

/// Board description with per-channel waveforms.
pub fn board(address: u8, model: BoardModel, waveforms: Vec<Waveform>) -> SimBoardConfig {
    SimBoardConfig {
        address,
        model,
        waveforms,
        calibration: Vec::new(),
    }
}

/// Poll `cond` every millisecond until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}
