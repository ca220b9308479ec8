//! Simulated register driver
//!
//! Keeps pin modes, levels and pulls in memory and records every call, so the
//! registry, arbiter and watch engine can be exercised without hardware. A
//! [`SimHandle`] shares the same state and lets tests drive input levels.

use super::{AccessMode, Driver, PinMode, Pull};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

/// One recorded driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    OpenAccess(AccessMode),
    CloseAccess,
    Configure(u8, PinMode),
    Write(u8, bool),
    SetPull(u8, Pull),
}

#[derive(Debug, Default)]
struct SimState {
    access: Option<AccessMode>,
    modes: HashMap<u8, PinMode>,
    levels: HashMap<u8, bool>,
    pulls: HashMap<u8, Pull>,
    calls: Vec<DriverCall>,
    reads: usize,
    fail_open: Option<AccessMode>,
}

/// In-memory driver
#[derive(Debug, Default)]
pub struct SimDriver {
    state: Rc<RefCell<SimState>>,
}

/// Test-side view of a [`SimDriver`]
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Rc<RefCell<SimState>>,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a driver together with a handle onto its state
    pub fn with_handle() -> (Self, SimHandle) {
        let driver = Self::new();
        let handle = driver.handle();
        (driver, handle)
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Rc::clone(&self.state),
        }
    }
}

impl Driver for SimDriver {
    fn open_access(&mut self, mode: AccessMode) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_open == Some(mode) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("simulated {} access failure", mode),
            ));
        }
        state.access = Some(mode);
        state.calls.push(DriverCall::OpenAccess(mode));
        Ok(())
    }

    fn close_access(&mut self) {
        let mut state = self.state.borrow_mut();
        state.access = None;
        state.calls.push(DriverCall::CloseAccess);
    }

    fn configure_pin(&mut self, bcm: u8, mode: PinMode) {
        let mut state = self.state.borrow_mut();
        state.modes.insert(bcm, mode);
        state.calls.push(DriverCall::Configure(bcm, mode));
    }

    fn read_pin(&self, bcm: u8) -> bool {
        let mut state = self.state.borrow_mut();
        state.reads += 1;
        state.levels.get(&bcm).copied().unwrap_or(false)
    }

    fn write_pin(&mut self, bcm: u8, level: bool) {
        let mut state = self.state.borrow_mut();
        state.levels.insert(bcm, level);
        state.calls.push(DriverCall::Write(bcm, level));
    }

    fn set_pull(&mut self, bcm: u8, pull: Pull) {
        let mut state = self.state.borrow_mut();
        state.pulls.insert(bcm, pull);
        state.calls.push(DriverCall::SetPull(bcm, pull));
    }
}

impl SimHandle {
    /// Drive the level seen by reads of a controller pin
    pub fn set_level(&self, bcm: u8, level: bool) {
        self.state.borrow_mut().levels.insert(bcm, level);
    }

    pub fn level(&self, bcm: u8) -> bool {
        self.state.borrow().levels.get(&bcm).copied().unwrap_or(false)
    }

    /// Current mode, `Input` for never-configured pins (power-on default)
    pub fn mode(&self, bcm: u8) -> PinMode {
        self.state
            .borrow()
            .modes
            .get(&bcm)
            .copied()
            .unwrap_or(PinMode::Input)
    }

    pub fn pull(&self, bcm: u8) -> Pull {
        self.state.borrow().pulls.get(&bcm).copied().unwrap_or_default()
    }

    pub fn access(&self) -> Option<AccessMode> {
        self.state.borrow().access
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Number of `Configure` calls recorded
    pub fn configure_count(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| matches!(c, DriverCall::Configure(..)))
            .count()
    }

    pub fn read_count(&self) -> usize {
        self.state.borrow().reads
    }

    /// Make the next opens in `mode` fail with `PermissionDenied`
    pub fn fail_open(&self, mode: AccessMode) {
        self.state.borrow_mut().fail_open = Some(mode);
    }
}
