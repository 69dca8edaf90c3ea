//! Shared bus arbitration.
//!
//! Every board on the stack shares one SPI bus and a set of address-select
//! lines. A transfer is only legal while the caller holds both:
//!
//! 1. the in-process mutex (threads of this process), and
//! 2. an exclusive `flock` on the bus lock file (other processes).
//!
//! `flock` alone is not enough inside one process: all threads share the
//! same open file description, so a second `flock` from another thread
//! succeeds immediately. The mutex is taken first, then the file lock.
//!
//! [`BusGuard`] is the scoped token. Dropping it deselects the address,
//! releases the file lock and finally the mutex, on every exit path.

use daqhat_common::board::SelectedBus;
use daqhat_common::config::BusConfig;
use daqhat_common::consts::{ADDRESS_LINES, LOCK_RETRY_US, MAX_NUMBER_HATS};
use daqhat_common::error::{DaqError, DaqResult};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use parking_lot::{Mutex, MutexGuard};
use std::fs::{self, File, OpenOptions};
use std::mem;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Drives the address-select lines.
pub trait AddressSelect: Send {
    /// Drive `address` onto the select lines.
    fn select(&mut self, address: u8) -> DaqResult<()>;

    /// Release the lines after a transfer to `address`.
    fn deselect(&mut self, address: u8) -> DaqResult<()>;
}

/// Address lines on sysfs GPIO pins, bit 0 on the first pin.
pub struct SysfsAddressLines {
    root: PathBuf,
    pins: [u32; ADDRESS_LINES],
    exported: bool,
    current: Option<u8>,
}

impl SysfsAddressLines {
    /// Create from the bus configuration. Pins are exported lazily on the
    /// first selection.
    ///
    /// # Errors
    /// `BadParameter` if the pin list length is not the address line count.
    pub fn new(config: &BusConfig) -> DaqResult<Self> {
        let pins: [u32; ADDRESS_LINES] =
            config.address_pins.as_slice().try_into().map_err(|_| {
                DaqError::bad_parameter(format!(
                    "expected {ADDRESS_LINES} address pins, got {}",
                    config.address_pins.len()
                ))
            })?;
        Ok(Self {
            root: config.gpio_root.clone(),
            pins,
            exported: false,
            current: None,
        })
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn write_attr(path: &Path, value: &str, address: u8) -> DaqResult<()> {
        fs::write(path, value)
            .map_err(|e| DaqError::comms(address, format!("{}: {e}", path.display())))
    }

    fn export(&mut self, address: u8) -> DaqResult<()> {
        for pin in self.pins {
            let dir = self.pin_dir(pin);
            if !dir.exists() {
                Self::write_attr(&self.root.join("export"), &pin.to_string(), address)?;
            }
            Self::write_attr(&dir.join("direction"), "out", address)?;
        }
        debug!("Exported address pins {:?} under {}", self.pins, self.root.display());
        self.exported = true;
        Ok(())
    }
}

impl AddressSelect for SysfsAddressLines {
    fn select(&mut self, address: u8) -> DaqResult<()> {
        if !self.exported {
            self.export(address)?;
        }
        if self.current == Some(address) {
            return Ok(());
        }
        for (bit, pin) in self.pins.iter().enumerate() {
            let level = if address & (1 << bit) != 0 { "1" } else { "0" };
            Self::write_attr(&self.pin_dir(*pin).join("value"), level, address)?;
        }
        self.current = Some(address);
        Ok(())
    }

    fn deselect(&mut self, _address: u8) -> DaqResult<()> {
        // Chip select is driven by the SPI controller; the address lines
        // simply hold their last value.
        Ok(())
    }
}

/// The bus lock file, owned by whichever state it is in.
enum LockFile {
    Unlocked(File),
    Locked(Flock<File>),
    /// Only observable if a state change was interrupted.
    Lost,
}

/// Everything the in-process mutex protects.
struct BusPort {
    lines: Box<dyn AddressSelect>,
    lock: LockFile,
}

impl BusPort {
    /// One non-blocking attempt at the exclusive file lock.
    fn try_lock_file(&mut self) -> Result<(), Errno> {
        match mem::replace(&mut self.lock, LockFile::Lost) {
            LockFile::Unlocked(file) => match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(held) => {
                    self.lock = LockFile::Locked(held);
                    Ok(())
                }
                Err((file, errno)) => {
                    self.lock = LockFile::Unlocked(file);
                    Err(errno)
                }
            },
            // A failed unlock left it held by us.
            LockFile::Locked(held) => {
                self.lock = LockFile::Locked(held);
                Ok(())
            }
            LockFile::Lost => Err(Errno::EBADF),
        }
    }

    fn unlock_file(&mut self) -> Result<(), Errno> {
        match mem::replace(&mut self.lock, LockFile::Lost) {
            LockFile::Locked(held) => match held.unlock() {
                Ok(file) => {
                    self.lock = LockFile::Unlocked(file);
                    Ok(())
                }
                Err((held, errno)) => {
                    self.lock = LockFile::Locked(held);
                    Err(errno)
                }
            },
            other => {
                self.lock = other;
                Ok(())
            }
        }
    }
}

/// Exclusive access to the shared bus.
pub struct BusArbiter {
    lock_path: PathBuf,
    port: Mutex<BusPort>,
    timeout: Duration,
}

impl BusArbiter {
    /// Open (creating if needed) the bus lock file.
    ///
    /// The file is created world read/writable so processes run by other
    /// users can share the bus.
    ///
    /// # Errors
    /// `ResourceUnavailable` if the lock file cannot be opened.
    pub fn open(config: &BusConfig, lines: Box<dyn AddressSelect>) -> DaqResult<Self> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&config.lock_file)
            .map_err(|e| {
                DaqError::ResourceUnavailable(format!(
                    "bus lock file {}: {e}",
                    config.lock_file.display()
                ))
            })?;

        // Only the owner may chmod; another user's file is already shared.
        if let Err(e) = fs::set_permissions(&config.lock_file, fs::Permissions::from_mode(0o666)) {
            debug!("Leaving lock file permissions unchanged: {}", e);
        }

        Ok(Self {
            lock_path: config.lock_file.clone(),
            port: Mutex::new(BusPort {
                lines,
                lock: LockFile::Unlocked(lock_file),
            }),
            timeout: config.lock_timeout(),
        })
    }

    /// Path of the lock file.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Default acquire bound.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the bus for `address` with the default timeout.
    pub fn acquire(&self, address: u8) -> DaqResult<BusGuard<'_>> {
        self.acquire_timeout(address, self.timeout)
    }

    /// Acquire the bus and select `address`.
    ///
    /// # Errors
    /// - `BadParameter` for an address outside the stack
    /// - `LockTimeout` if either lock is not obtained within `timeout`;
    ///   nothing is transferred in that case
    /// - `CommsFailure` if the address lines cannot be driven
    pub fn acquire_timeout(&self, address: u8, timeout: Duration) -> DaqResult<BusGuard<'_>> {
        if usize::from(address) >= MAX_NUMBER_HATS {
            return Err(DaqError::bad_parameter(format!(
                "address {address} out of range 0..{MAX_NUMBER_HATS}"
            )));
        }

        let start = Instant::now();
        let deadline = start + timeout;
        let lock_timeout = DaqError::LockTimeout { address, timeout };

        let mut port = self
            .port
            .try_lock_until(deadline)
            .ok_or_else(|| lock_timeout.clone())?;

        let mut warned = false;
        loop {
            match port.try_lock_file() {
                Ok(_) => break,
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(lock_timeout);
                    }
                    if !warned && now - start > timeout / 2 {
                        warn!(address, ?timeout, "Bus lock held by another process, still waiting");
                        warned = true;
                    }
                    thread::sleep(Duration::from_micros(LOCK_RETRY_US));
                }
                Err(e) => {
                    return Err(DaqError::ResourceUnavailable(format!(
                        "flock {}: {e}",
                        self.lock_path.display()
                    )));
                }
            }
        }

        let mut guard = BusGuard {
            arbiter: self,
            port,
            address,
            selected: false,
        };
        guard.port.lines.select(address)?;
        guard.selected = true;
        trace!(address, "Bus acquired");
        Ok(guard)
    }

    /// Run `f` with the bus held for `address`.
    pub fn with_bus<R>(
        &self,
        address: u8,
        f: impl FnOnce(&mut BusGuard<'_>) -> DaqResult<R>,
    ) -> DaqResult<R> {
        let mut guard = self.acquire(address)?;
        f(&mut guard)
    }
}

/// Scoped bus ownership with one address selected.
pub struct BusGuard<'a> {
    arbiter: &'a BusArbiter,
    port: MutexGuard<'a, BusPort>,
    address: u8,
    selected: bool,
}

impl BusGuard<'_> {
    /// Address driven on the select lines.
    pub fn address(&self) -> u8 {
        self.address
    }
}

impl SelectedBus for BusGuard<'_> {
    fn selected_address(&self) -> u8 {
        self.address
    }
}

impl Drop for BusGuard<'_> {
    fn drop(&mut self) {
        if self.selected
            && let Err(e) = self.port.lines.deselect(self.address)
        {
            warn!(address = self.address, "Deselect failed: {}", e);
        }
        if let Err(e) = self.port.unlock_file() {
            warn!(
                "Failed to release bus lock {}: {}",
                self.arbiter.lock_path.display(),
                e
            );
        }
        trace!(address = self.address, "Bus released");
        // `port` (the in-process mutex) is released after this body.
    }
}
