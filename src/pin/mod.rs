//! Input and output pin handles
//!
//! A handle is a view onto one ownership slot in the registry. It stays valid
//! only while that slot owns its pin; once the pin is released, re-purposed or
//! taken by a peripheral every operation fails with `NotOwned`, until the
//! handle is explicitly re-opened.

mod group;
mod input;
mod output;

pub use group::InputGroup;
pub use input::InputPin;
pub use output::{bit_level, OutputPin};

use crate::driver::Pull;
use crate::error::{GpioError, Result};
use crate::gpio::Gpio;
use crate::registry::{PinRole, PinSlot};
use std::fmt;
use std::rc::Rc;

/// State shared by input and output handles
#[derive(Clone)]
struct Handle {
    slot: Rc<PinSlot>,
    gpio: Gpio,
}

impl Handle {
    fn new(slot: Rc<PinSlot>, gpio: Gpio) -> Self {
        Self { slot, gpio }
    }

    fn pin(&self) -> u8 {
        self.slot.pin().header
    }

    fn bcm(&self) -> u8 {
        self.slot.pin().bcm
    }

    fn is_open(&self) -> bool {
        self.gpio.is_owner(&self.slot)
    }

    fn state(&self) -> Result<bool> {
        self.gpio.read_level(&self.slot)
    }

    /// Read now, deliver the level asynchronously
    fn read_with<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + 'static,
    {
        let level = self.state()?;
        self.gpio.defer(move |_| {
            callback(level);
            Ok(())
        });
        Ok(())
    }

    fn ensure_closed(&self) -> Result<()> {
        if self.is_open() {
            return Err(GpioError::AlreadyOpen {
                pin: self.pin(),
                role: self.slot.role(),
            });
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.gpio.ensure_owner(&self.slot)?;
        self.gpio.release_slot(&self.slot);
        Ok(())
    }

    fn ptr_eq(&self, other: &Handle) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }

    fn fmt_as(&self, f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
        let mut s = f.debug_struct(name);
        s.field("pin", &self.pin()).field("bcm", &self.bcm());
        if self.slot.role() == PinRole::Input {
            s.field("pull", &self.pull());
        }
        s.field("open", &self.is_open()).finish()
    }

    fn pull(&self) -> Pull {
        self.slot.pull()
    }
}
