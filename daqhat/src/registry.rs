//! Open-board registry.
//!
//! One entry per open address, reference-counted: the first `open` builds
//! the board through the driver registry, later opens share it, and the
//! last `close` stops any scan and drops it. Open and close serialize on a
//! single table lock, so the count never races.

use crate::bus::BusArbiter;
use crate::driver_registry::DriverRegistry;
use crate::hat::Hat;
use daqhat_common::board::BoardModel;
use daqhat_common::config::ScanTuning;
use daqhat_common::consts::MAX_NUMBER_HATS;
use daqhat_common::error::{DaqError, DaqResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Maps bus addresses to the board type found there.
pub trait Discovery: Send + Sync {
    /// Board type at `address`, if any responds.
    fn model_at(&self, address: u8) -> Option<BoardModel>;

    /// Every populated address, ascending.
    fn list(&self) -> Vec<(u8, BoardModel)> {
        (0..MAX_NUMBER_HATS as u8)
            .filter_map(|address| self.model_at(address).map(|model| (address, model)))
            .collect()
    }
}

struct OpenEntry {
    hat: Arc<Hat>,
    refs: usize,
}

/// Registry of open boards.
pub struct BoardRegistry {
    bus: Arc<BusArbiter>,
    drivers: DriverRegistry,
    discovery: Arc<dyn Discovery>,
    tuning: ScanTuning,
    entries: Mutex<BTreeMap<u8, OpenEntry>>,
}

impl BoardRegistry {
    /// Registry over one bus.
    pub fn new(
        bus: Arc<BusArbiter>,
        drivers: DriverRegistry,
        discovery: Arc<dyn Discovery>,
        tuning: ScanTuning,
    ) -> Self {
        Self {
            bus,
            drivers,
            discovery,
            tuning,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Shared bus arbiter.
    pub fn bus(&self) -> &Arc<BusArbiter> {
        &self.bus
    }

    /// Boards present on the bus.
    pub fn discover(&self) -> Vec<(u8, BoardModel)> {
        self.discovery.list()
    }

    /// Open the board at `address`, or take another reference to it.
    ///
    /// # Errors
    /// - `BadParameter` for an address outside the stack
    /// - `InvalidDevice` if nothing responds or no driver handles the model
    pub fn open(&self, address: u8) -> DaqResult<Arc<Hat>> {
        if usize::from(address) >= MAX_NUMBER_HATS {
            return Err(DaqError::bad_parameter(format!(
                "address {address} out of range 0..{MAX_NUMBER_HATS}"
            )));
        }

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&address) {
            entry.refs += 1;
            debug!(address, refs = entry.refs, "Board reopened");
            return Ok(entry.hat.clone());
        }

        let model = self
            .discovery
            .model_at(address)
            .ok_or_else(|| DaqError::InvalidDevice {
                address,
                reason: "no board detected".to_string(),
            })?;
        let board = self.drivers.create_board(model, address)?;
        let hat = Arc::new(Hat::new(board, self.bus.clone(), self.tuning));
        entries.insert(
            address,
            OpenEntry {
                hat: hat.clone(),
                refs: 1,
            },
        );
        info!(address, %model, "Board opened");
        Ok(hat)
    }

    /// Open the board at `address`, requiring a specific model.
    ///
    /// # Errors
    /// As [`open`](Self::open), plus `InvalidDevice` on a model mismatch
    /// (no reference is taken in that case).
    pub fn open_as(&self, address: u8, expected: BoardModel) -> DaqResult<Arc<Hat>> {
        let hat = self.open(address)?;
        if hat.model() != expected {
            let found = hat.model();
            drop(hat);
            self.close(address)?;
            return Err(DaqError::InvalidDevice {
                address,
                reason: format!("expected {expected}, found {found}"),
            });
        }
        Ok(hat)
    }

    /// Drop one reference; the last one stops any scan and frees the board.
    ///
    /// # Errors
    /// `BadParameter` if the address is not open.
    pub fn close(&self, address: u8) -> DaqResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&address).ok_or_else(|| {
            DaqError::bad_parameter(format!("board {address} is not open"))
        })?;
        entry.refs -= 1;
        if entry.refs > 0 {
            debug!(address, refs = entry.refs, "Board reference released");
            return Ok(());
        }

        if let Some(entry) = entries.remove(&address) {
            drop(entries);
            entry.hat.shutdown();
            info!(address, "Board closed");
        }
        Ok(())
    }

    /// True if `address` has at least one open reference.
    pub fn is_open(&self, address: u8) -> bool {
        self.entries.lock().contains_key(&address)
    }

    /// Number of open references to `address`.
    pub fn open_count(&self, address: u8) -> usize {
        self.entries.lock().get(&address).map_or(0, |e| e.refs)
    }

    /// Close every open board regardless of reference count.
    pub fn close_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for (address, entry) in entries {
            entry.hat.shutdown();
            info!(address, "Board closed");
        }
    }
}

impl Drop for BoardRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
