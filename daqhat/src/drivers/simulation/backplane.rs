//! Simulated bus backplane.
//!
//! Holds everything the simulated boards share physically: the address
//! lines, the clock and trigger lines, the external clock input, and the
//! table of boards present at each address.

use crate::bus::AddressSelect;
use crate::registry::Discovery;
use daqhat_common::board::BoardModel;
use daqhat_common::config::{SimBoardConfig, SimulationConfig};
use daqhat_common::consts::MAX_NUMBER_HATS;
use daqhat_common::error::{DaqError, DaqResult};
use daqhat_common::types::SourceRole;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sample clocks a slave needs to phase-lock after the master starts.
pub const LOCK_SAMPLE_CLOCKS: f64 = 128.0;

#[derive(Debug, Clone, Copy)]
struct MasterClock {
    address: u8,
    sequence: u64,
    locked_at: Instant,
}

#[derive(Debug, Default)]
struct ClockLines {
    sequence: u64,
    master: Option<MasterClock>,
    slaves: [Option<u64>; MAX_NUMBER_HATS],
}

/// Shared physical state of the simulated stack.
#[derive(Debug)]
pub struct Backplane {
    boards: Mutex<[Option<SimBoardConfig>; MAX_NUMBER_HATS]>,
    selected: Mutex<Option<u8>>,
    clock: Mutex<ClockLines>,
    trigger_level: AtomicBool,
    external_clock: AtomicBool,
    failing: AtomicU8,
    contention: AtomicU64,
}

impl Backplane {
    /// Empty backplane.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            boards: Mutex::new(Default::default()),
            selected: Mutex::new(None),
            clock: Mutex::new(ClockLines::default()),
            trigger_level: AtomicBool::new(false),
            external_clock: AtomicBool::new(true),
            failing: AtomicU8::new(0),
            contention: AtomicU64::new(0),
        })
    }

    /// Backplane populated from the `[simulation]` section.
    ///
    /// # Errors
    /// `BadParameter` for an out-of-range or duplicated address.
    pub fn from_config(config: &SimulationConfig) -> DaqResult<Arc<Self>> {
        let backplane = Self::new();
        for board in &config.boards {
            backplane.insert_board(board.clone())?;
        }
        Ok(backplane)
    }

    /// Seat a board.
    ///
    /// # Errors
    /// `BadParameter` for an out-of-range or occupied address.
    pub fn insert_board(&self, config: SimBoardConfig) -> DaqResult<()> {
        let mut boards = self.boards.lock();
        let slot = boards
            .get_mut(usize::from(config.address))
            .ok_or_else(|| {
                DaqError::bad_parameter(format!("address {} out of range", config.address))
            })?;
        if slot.is_some() {
            return Err(DaqError::bad_parameter(format!(
                "address {} already occupied",
                config.address
            )));
        }
        debug!(address = config.address, model = %config.model, "Simulated board seated");
        *slot = Some(config);
        Ok(())
    }

    /// Configuration of the board at `address`.
    pub fn board_config(&self, address: u8) -> Option<SimBoardConfig> {
        self.boards
            .lock()
            .get(usize::from(address))
            .and_then(Clone::clone)
    }

    /// Address lines driving this backplane.
    pub fn address_lines(self: &Arc<Self>) -> Box<dyn AddressSelect> {
        Box::new(SimAddressLines {
            backplane: Arc::clone(self),
        })
    }

    /// Address currently selected, if any.
    pub fn selected(&self) -> Option<u8> {
        *self.selected.lock()
    }

    /// Overlapping selections observed so far.
    pub fn contention_count(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }

    /// Drive the shared trigger line.
    pub fn set_trigger_level(&self, high: bool) {
        self.trigger_level.store(high, Ordering::Release);
    }

    /// Shared trigger line level.
    pub fn trigger_level(&self) -> bool {
        self.trigger_level.load(Ordering::Acquire)
    }

    /// Connect or remove the external clock source.
    pub fn set_external_clock(&self, present: bool) {
        self.external_clock.store(present, Ordering::Release);
    }

    /// True while an external clock is connected.
    pub fn external_clock(&self) -> bool {
        self.external_clock.load(Ordering::Acquire)
    }

    /// Make every transfer to `address` fail (or recover).
    pub fn fail_transfers(&self, address: u8, fail: bool) {
        let bit = 1u8 << (address & 0x07);
        if fail {
            self.failing.fetch_or(bit, Ordering::AcqRel);
        } else {
            self.failing.fetch_and(!bit, Ordering::AcqRel);
        }
    }

    /// True while transfers to `address` are forced to fail.
    pub fn transfers_failing(&self, address: u8) -> bool {
        self.failing.load(Ordering::Acquire) & (1u8 << (address & 0x07)) != 0
    }

    /// Record a clock role change. Configuring a master latches every slave
    /// configured before it; a slave configured afterwards is not locked.
    pub fn configure_clock(&self, address: u8, role: SourceRole, rate: f64) {
        let mut clock = self.clock.lock();
        clock.sequence += 1;
        let sequence = clock.sequence;
        let index = usize::from(address);

        if clock.master.is_some_and(|m| m.address == address) {
            clock.master = None;
        }
        clock.slaves[index] = None;

        match role {
            SourceRole::Local => {}
            SourceRole::Slave => clock.slaves[index] = Some(sequence),
            SourceRole::Master => {
                if let Some(previous) = clock.master {
                    warn!(
                        address,
                        previous = previous.address,
                        "Second clock master on the shared line"
                    );
                }
                let settle = Duration::from_secs_f64(LOCK_SAMPLE_CLOCKS / rate.max(1.0));
                clock.master = Some(MasterClock {
                    address,
                    sequence,
                    locked_at: Instant::now() + settle,
                });
            }
        }
    }

    /// Lock status of the board at `address` in `role`.
    pub fn clock_locked(&self, address: u8, role: SourceRole) -> bool {
        let clock = self.clock.lock();
        let now = Instant::now();
        match role {
            SourceRole::Local => true,
            SourceRole::Master => clock
                .master
                .is_some_and(|m| m.address == address && now >= m.locked_at),
            SourceRole::Slave => match (clock.slaves[usize::from(address)], clock.master) {
                (Some(slave), Some(master)) => slave < master.sequence && now >= master.locked_at,
                _ => false,
            },
        }
    }

    fn select(&self, address: u8) -> DaqResult<()> {
        let mut selected = self.selected.lock();
        match *selected {
            Some(current) if current != address => {
                self.contention.fetch_add(1, Ordering::Relaxed);
                Err(DaqError::comms(
                    address,
                    format!("bus contention, board {current} still selected"),
                ))
            }
            _ => {
                *selected = Some(address);
                Ok(())
            }
        }
    }

    fn deselect(&self, address: u8) {
        let mut selected = self.selected.lock();
        if *selected == Some(address) {
            *selected = None;
        }
    }
}

impl Discovery for Backplane {
    fn model_at(&self, address: u8) -> Option<BoardModel> {
        self.boards
            .lock()
            .get(usize::from(address))
            .and_then(|slot| slot.as_ref().map(|b| b.model))
    }
}

/// Address lines of a [`Backplane`].
pub struct SimAddressLines {
    backplane: Arc<Backplane>,
}

impl AddressSelect for SimAddressLines {
    fn select(&mut self, address: u8) -> DaqResult<()> {
        self.backplane.select(address)
    }

    fn deselect(&mut self, address: u8) -> DaqResult<()> {
        self.backplane.deselect(address);
        Ok(())
    }
}
