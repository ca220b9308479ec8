use super::Handle;
use crate::error::{GpioError, Result};
use crate::gpio::{check_delay, Gpio};
use crate::registry::PinSlot;
use log::debug;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

type StateCallback = Box<dyn FnOnce(bool)>;

/// Level for a numeric control bit; only 0 and 1 are accepted
pub fn bit_level(bit: u8) -> Result<bool> {
    match bit {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(GpioError::invalid_argument(format!(
            "invalid control bit {}, expected 0 or 1",
            other
        ))),
    }
}

/// Handle to a pin owned as an output
///
/// Delayed writes and pulse ends are tied to the ownership they were
/// scheduled under: releasing the pin cancels them.
#[derive(Clone)]
pub struct OutputPin {
    handle: Handle,
}

impl fmt::Debug for OutputPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt_as(f, "OutputPin")
    }
}

impl OutputPin {
    pub(crate) fn from_slot(slot: Rc<PinSlot>, gpio: Gpio) -> Self {
        Self {
            handle: Handle::new(slot, gpio),
        }
    }

    fn slot(&self) -> &Rc<PinSlot> {
        &self.handle.slot
    }

    fn gpio(&self) -> &Gpio {
        &self.handle.gpio
    }

    pub fn pin(&self) -> u8 {
        self.handle.pin()
    }

    pub fn bcm(&self) -> u8 {
        self.handle.bcm()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Level currently driven on the pin
    pub fn state(&self) -> Result<bool> {
        self.handle.state()
    }

    pub fn read(&self) -> Result<bool> {
        self.handle.state()
    }

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

    pub fn write(&self, level: bool) -> Result<()> {
        self.gpio().write_level(self.slot(), level)
    }

    /// Write a numeric bit; only 0 and 1 are accepted
    pub fn write_bit(&self, bit: u8) -> Result<()> {
        self.write(bit_level(bit)?)
    }

    pub fn on(&self) -> Result<()> {
        self.write(true)
    }

    pub fn off(&self) -> Result<()> {
        self.write(false)
    }

    pub fn on_after(&self, delay: Duration) -> Result<()> {
        self.schedule_write(true, delay, None)
    }

    pub fn off_after(&self, delay: Duration) -> Result<()> {
        self.schedule_write(false, delay, None)
    }

    /// Write `level` after `delay`, then hand the written level to `callback`
    ///
    /// A zero delay writes immediately; the callback is always asynchronous.
    pub fn write_after<F>(&self, level: bool, delay: Duration, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + 'static,
    {
        self.schedule_write(level, delay, Some(Box::new(callback)))
    }

    /// Drive the pin high now and low again after `width`
    pub fn pulse(&self, width: Duration) -> Result<()> {
        self.start_pulse(width, None)
    }

    /// Like [`OutputPin::pulse`], calling `callback(false)` once the pin is low
    pub fn pulse_then<F>(&self, width: Duration, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + 'static,
    {
        self.start_pulse(width, Some(Box::new(callback)))
    }

    /// Re-acquire the pin for this handle, driving it to `initial`
    pub fn open(&self, initial: bool) -> Result<()> {
        self.handle.ensure_closed()?;
        self.gpio().install_output(self.slot(), initial)
    }

    pub fn close(&self) -> Result<()> {
        self.handle.close()
    }

    pub fn ptr_eq(&self, other: &OutputPin) -> bool {
        self.handle.ptr_eq(&other.handle)
    }

    fn schedule_write(
        &self,
        level: bool,
        delay: Duration,
        callback: Option<StateCallback>,
    ) -> Result<()> {
        check_delay(delay)?;
        if delay.is_zero() {
            self.write(level)?;
            if let Some(callback) = callback {
                deliver(self.gpio(), callback, level);
            }
            return Ok(());
        }

        self.gpio().ensure_owner(self.slot())?;
        self.defer_write(level, delay, callback);
        debug!(
            "Pin {} will be driven {} in {:?}",
            self.pin(),
            u8::from(level),
            delay
        );
        Ok(())
    }

    fn start_pulse(&self, width: Duration, callback: Option<StateCallback>) -> Result<()> {
        if width.is_zero() {
            return Err(GpioError::invalid_argument("pulse width must be non-zero"));
        }
        check_delay(width)?;
        self.write(true)?;
        self.defer_write(false, width, callback);
        debug!("Pin {} pulsing for {:?}", self.pin(), width);
        Ok(())
    }

    fn defer_write(&self, level: bool, delay: Duration, callback: Option<StateCallback>) {
        let slot = Rc::clone(self.slot());
        let token = slot.begin_action();
        self.gpio().schedule(delay, token, move |gpio: &Gpio| {
            slot.end_action();
            gpio.write_level(&slot, level)?;
            if let Some(callback) = callback {
                deliver(gpio, callback, level);
            }
            Ok(())
        });
    }
}

fn deliver(gpio: &Gpio, callback: StateCallback, level: bool) {
    gpio.defer(move |_| {
        callback(level);
        Ok(())
    });
}
