//! Multi-board clock and trigger synchronization.
//!
//! Boards joined by the shared clock/trigger lines take one of three roles:
//! `Local` (independent), `Master` (drives the lines) or `Slave` (follows
//! them).
//!
//! # Sequencing
//!
//! Configure every slave **before** the master. Configuring the master is
//! what latches all converters into phase; reconfiguring any board of the
//! group afterwards silently desynchronizes it, and the hardware does not
//! report this. [`SyncCoordinator::configure_group`] applies the safe order.
//!
//! # Preconditions
//!
//! At most one master may drive a shared line. Two masters is a wiring or
//! caller error this API cannot detect.
//!
//! A slave with no master never reports lock. Scans on such a board fail
//! with `SyncTimeout` after `scan.sync_timeout_ms` instead of blocking.

use crate::hat::Hat;
use daqhat_common::config::ScanTuning;
use daqhat_common::error::{DaqError, DaqResult};
use daqhat_common::types::{SourceRole, TriggerMode};
use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configures and verifies clock/trigger relationships.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncCoordinator {
    tuning: ScanTuning,
}

impl SyncCoordinator {
    /// Coordinator using the given poll interval and lock bound.
    pub fn new(tuning: ScanTuning) -> Self {
        Self { tuning }
    }

    /// Set one board's clock role; returns the achieved rate.
    pub fn configure_clock(&self, hat: &Hat, role: SourceRole, rate: f64) -> DaqResult<f64> {
        hat.configure_clock(role, rate)
    }

    /// Set one board's trigger role and condition.
    pub fn configure_trigger(&self, hat: &Hat, role: SourceRole, mode: TriggerMode) -> DaqResult<()> {
        hat.configure_trigger(role, mode)
    }

    /// True once `hat` reports its clock locked.
    pub fn read_sync_status(&self, hat: &Hat) -> DaqResult<bool> {
        hat.read_sync_status()
    }

    /// Poll until `hat` reports lock; returns how long it took.
    ///
    /// # Errors
    /// `SyncTimeout` if lock is not reported within `timeout`.
    pub fn wait_locked(&self, hat: &Hat, timeout: Duration) -> DaqResult<Duration> {
        let start = Instant::now();
        let deadline = start + timeout;
        loop {
            if hat.read_sync_status()? {
                return Ok(start.elapsed());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DaqError::SyncTimeout {
                    address: hat.address(),
                    waited: now - start,
                });
            }
            thread::sleep(self.tuning.sync_poll().min(deadline - now));
        }
    }

    /// Put `slaves` on the clock of `master` in the safe order (slaves
    /// first, master last) and wait until every board reports lock.
    ///
    /// # Errors
    /// - `BadParameter` if an address repeats or the master is listed as a slave
    /// - any `configure_clock` error
    /// - `SyncTimeout` if the group does not lock within the sync window
    pub fn configure_group(&self, master: &Hat, slaves: &[&Hat], rate: f64) -> DaqResult<f64> {
        let mut seen = HashSet::new();
        for hat in slaves.iter().copied().chain(std::iter::once(master)) {
            if !seen.insert(hat.address()) {
                return Err(DaqError::bad_parameter(format!(
                    "board {} appears twice in the sync group",
                    hat.address()
                )));
            }
        }

        for slave in slaves {
            self.configure_clock(slave, SourceRole::Slave, rate)?;
            debug!(address = slave.address(), "Slave clock configured");
        }
        let achieved = self.configure_clock(master, SourceRole::Master, rate)?;
        for slave in slaves {
            slave.follow_master_rate(achieved);
        }

        let deadline = Instant::now() + self.tuning.sync_timeout();
        for hat in slaves.iter().copied().chain(std::iter::once(master)) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.wait_locked(hat, remaining)?;
        }

        info!(
            master = master.address(),
            slaves = slaves.len(),
            rate = achieved,
            "Clock group locked"
        );
        Ok(achieved)
    }
}
