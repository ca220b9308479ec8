//! Pin registry
//!
//! Single source of truth for the role of every header GPIO pin and, for
//! input/output roles, the one slot that owns it. The registry holds state
//! only; [`crate::Gpio`] pairs each transition with its driver call.

use crate::driver::Pull;
use crate::error::{GpioError, Result};
use crate::header::{self, HeaderPin};
use crate::scheduler::CancelToken;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Exclusive function currently assigned to a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinRole {
    Input,
    Output,
    AlternateFunction,
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinRole::Input => write!(f, "input"),
            PinRole::Output => write!(f, "output"),
            PinRole::AlternateFunction => write!(f, "alternate function"),
        }
    }
}

/// Ownership record shared by a pin handle and the registry
///
/// Handles compare by slot identity: two handles are the same owner exactly
/// when they point at the same slot.
#[derive(Debug)]
pub struct PinSlot {
    pin: HeaderPin,
    role: PinRole,
    pull: Cell<Pull>,
    actions: RefCell<CancelToken>,
    pending: Cell<usize>,
}

impl PinSlot {
    pub(crate) fn new(pin: HeaderPin, role: PinRole) -> Rc<Self> {
        Rc::new(Self {
            pin,
            role,
            pull: Cell::new(Pull::Off),
            actions: RefCell::new(CancelToken::new()),
            pending: Cell::new(0),
        })
    }

    pub fn pin(&self) -> HeaderPin {
        self.pin
    }

    pub fn role(&self) -> PinRole {
        self.role
    }

    pub fn pull(&self) -> Pull {
        self.pull.get()
    }

    pub(crate) fn set_pull(&self, pull: Pull) {
        self.pull.set(pull);
    }

    /// Register a delayed action and return the token it must run under
    pub(crate) fn begin_action(&self) -> CancelToken {
        self.pending.set(self.pending.get() + 1);
        self.actions.borrow().clone()
    }

    pub(crate) fn end_action(&self) {
        self.pending.set(self.pending.get().saturating_sub(1));
    }

    /// Delayed actions scheduled but not yet run
    pub fn pending_actions(&self) -> usize {
        self.pending.get()
    }

    /// Cancel pending delayed actions, returning how many were dropped
    ///
    /// Later actions get a fresh token.
    pub(crate) fn cancel_actions(&self) -> usize {
        let old = self.actions.replace(CancelToken::new());
        old.cancel();
        self.pending.replace(0)
    }
}

#[derive(Debug)]
struct Entry {
    role: PinRole,
    owner: Option<Rc<PinSlot>>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            role: PinRole::Input,
            owner: None,
        }
    }
}

/// Role and owner of every header GPIO pin
#[derive(Debug)]
pub struct PinRegistry {
    entries: BTreeMap<u8, Entry>,
}

impl Default for PinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PinRegistry {
    /// Every GPIO pin starts as an unowned input
    pub fn new() -> Self {
        Self {
            entries: header::gpio_pins()
                .into_iter()
                .map(|pin| (pin, Entry::default()))
                .collect(),
        }
    }

    fn entry(&self, pin: u8) -> Result<&Entry> {
        let pin = header::resolve(pin)?;
        self.entries
            .get(&pin.header)
            .ok_or(GpioError::InvalidPin {
                pin: pin.header,
                reason: crate::error::InvalidPinReason::OutOfRange,
            })
    }

    fn entry_mut(&mut self, pin: HeaderPin) -> &mut Entry {
        self.entries.entry(pin.header).or_default()
    }

    pub fn role_of(&self, pin: u8) -> Result<PinRole> {
        Ok(self.entry(pin)?.role)
    }

    /// Current input/output owner, if any
    pub fn owner(&self, pin: u8) -> Result<Option<Rc<PinSlot>>> {
        Ok(self.entry(pin)?.owner.clone())
    }

    /// True if `slot` is the live owner of its pin
    pub fn is_owner(&self, slot: &Rc<PinSlot>) -> bool {
        self.entries
            .get(&slot.pin.header)
            .and_then(|e| e.owner.as_ref())
            .map_or(false, |owner| Rc::ptr_eq(owner, slot))
    }

    /// Fail with `NotOwned` unless `slot` owns its pin
    pub fn ensure_owner(&self, slot: &Rc<PinSlot>) -> Result<()> {
        if self.is_owner(slot) {
            Ok(())
        } else {
            Err(GpioError::NotOwned {
                pin: slot.pin.header,
                role: slot.role,
            })
        }
    }

    /// Fail with `RoleConflict` if the pin is held by a peripheral
    pub fn check_available(&self, pin: HeaderPin, requested: PinRole) -> Result<()> {
        let current = self.role_of(pin.header)?;
        if current == PinRole::AlternateFunction {
            return Err(GpioError::RoleConflict {
                pin: pin.header,
                current,
                requested,
            });
        }
        Ok(())
    }

    /// Record `slot` as the owner of its pin, returning the previous owner
    pub fn install(&mut self, slot: Rc<PinSlot>) -> Option<Rc<PinSlot>> {
        let entry = self.entry_mut(slot.pin);
        entry.role = slot.role;
        entry.owner.replace(slot)
    }

    /// Hand the pin to a peripheral, returning the previous owner
    pub fn assign_alternate(&mut self, pin: HeaderPin) -> Option<Rc<PinSlot>> {
        let entry = self.entry_mut(pin);
        entry.role = PinRole::AlternateFunction;
        entry.owner.take()
    }

    /// Reset the pin to an unowned input, returning the previous owner
    pub fn reset(&mut self, pin: HeaderPin) -> Option<Rc<PinSlot>> {
        let entry = self.entry_mut(pin);
        entry.role = PinRole::Input;
        entry.owner.take()
    }

    /// All live owners, in header order
    pub fn owners(&self) -> Vec<Rc<PinSlot>> {
        self.entries
            .values()
            .filter_map(|e| e.owner.clone())
            .collect()
    }

    /// Pins currently held by peripherals
    pub fn alternate_pins(&self) -> Vec<u8> {
        self.entries
            .iter()
            .filter(|(_, e)| e.role == PinRole::AlternateFunction)
            .map(|(pin, _)| *pin)
            .collect()
    }
}
