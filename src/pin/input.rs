use super::Handle;
use crate::driver::Pull;
use crate::error::Result;
use crate::gpio::Gpio;
use crate::registry::PinSlot;
use crate::watch::{Unwatch, WatchCallback, WatchOptions};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Handle to a pin owned as an input
#[derive(Clone)]
pub struct InputPin {
    handle: Handle,
}

impl fmt::Debug for InputPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt_as(f, "InputPin")
    }
}

impl InputPin {
    pub(crate) fn from_slot(slot: Rc<PinSlot>, gpio: Gpio) -> Self {
        Self {
            handle: Handle::new(slot, gpio),
        }
    }

    pub(crate) fn slot(&self) -> &Rc<PinSlot> {
        &self.handle.slot
    }

    pub(crate) fn gpio(&self) -> &Gpio {
        &self.handle.gpio
    }

    /// Header position
    pub fn pin(&self) -> u8 {
        self.handle.pin()
    }

    /// Controller pin
    pub fn bcm(&self) -> u8 {
        self.handle.bcm()
    }

    pub fn pull(&self) -> Pull {
        self.handle.pull()
    }

    /// True while this handle owns its pin
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub fn state(&self) -> Result<bool> {
        self.handle.state()
    }

    pub fn read(&self) -> Result<bool> {
        self.handle.state()
    }

    /// Read the level now and hand it to `callback` asynchronously
    pub fn read_with<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + 'static,
    {
        self.handle.read_with(callback)
    }

    pub fn is_on(&self) -> Result<bool> {
        self.state()
    }

    pub fn is_off(&self) -> Result<bool> {
        self.state().map(|level| !level)
    }

    pub fn set_pull(&self, pull: Pull) -> Result<()> {
        self.handle.gpio.ensure_owner(self.slot())?;
        self.handle.gpio.apply_pull(self.slot(), pull);
        Ok(())
    }

    /// Watch for edges with the context's default edge filter and poll interval
    pub fn watch<F>(&self, callback: F) -> Result<Unwatch>
    where
        F: FnMut(bool, u8) + 'static,
    {
        let options = self.handle.gpio.settings().watch_options();
        self.watch_with(callback, options)
    }

    /// Watch for edges; `callback` gets `(level, header pin)` for each reported edge
    pub fn watch_with<F>(&self, callback: F, options: WatchOptions) -> Result<Unwatch>
    where
        F: FnMut(bool, u8) + 'static,
    {
        let callback: WatchCallback = Rc::new(RefCell::new(callback));
        self.handle.gpio.watch_slot(self.slot(), callback, options)
    }

    /// Stop every watcher on this pin
    pub fn unwatch(&self) -> Result<usize> {
        self.handle.gpio.unwatch_all(self.pin())
    }

    /// Re-acquire the pin for this handle with its last pull setting
    pub fn open(&self) -> Result<()> {
        self.handle.ensure_closed()?;
        self.handle.gpio.install_input(self.slot(), self.pull())
    }

    /// Release the pin; see [`Gpio::release`]
    pub fn close(&self) -> Result<()> {
        self.handle.close()
    }

    /// True if both handles are the same owner
    pub fn ptr_eq(&self, other: &InputPin) -> bool {
        self.handle.ptr_eq(&other.handle)
    }
}
