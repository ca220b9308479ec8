//! Peripheral bootstrap
//!
//! I2C, SPI and PWM claim their header pins as alternate functions. Their
//! registers sit outside the restricted GPIO window, so every claim needs
//! broad access; once a GPIO pin has committed restricted access a claim only
//! succeeds if the caller explicitly allows the upgrade.
//!
//! Pins are checked before anything is touched. Input/output owners of the
//! required pins are discarded, the same way a role change discards them.

use crate::driver::{AltFunction, PinMode};
use crate::error::{GpioError, Result};
use crate::gpio::Gpio;
use crate::header::{self, HeaderPin};
use crate::registry::PinRole;
use log::{debug, info};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Peripheral that owns a set of header pins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peripheral {
    /// I2C on pin set 0 (header 27/28) or 1 (header 3/5)
    I2c { pin_set: u8 },
    Spi,
    /// One PWM output on the given header pin
    Pwm { pin: u8 },
}

impl fmt::Display for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peripheral::I2c { pin_set } => write!(f, "I2C{}", pin_set),
            Peripheral::Spi => write!(f, "SPI0"),
            Peripheral::Pwm { pin } => write!(f, "PWM on pin {}", pin),
        }
    }
}

impl Peripheral {
    /// Header pins and the alternate function each one needs
    pub fn pins(&self) -> Result<Vec<(u8, AltFunction)>> {
        match *self {
            Peripheral::I2c { pin_set: 0 } => Ok(alt0(header::I2C0)),
            Peripheral::I2c { pin_set: 1 } => Ok(alt0(header::I2C1)),
            Peripheral::I2c { pin_set } => Err(GpioError::invalid_argument(format!(
                "unknown I2C pin set {}, expected 0 or 1",
                pin_set
            ))),
            Peripheral::Spi => Ok(alt0(header::SPI0)),
            Peripheral::Pwm { pin } => match pin {
                // BCM12/13 carry PWM on ALT0, BCM18/19 on ALT5
                32 | 33 => Ok(vec![(pin, AltFunction::Alt0)]),
                12 | 35 => Ok(vec![(pin, AltFunction::Alt5)]),
                other => Err(GpioError::invalid_argument(format!(
                    "pin {} has no PWM output, expected one of 12, 32, 33, 35",
                    other
                ))),
            },
        }
    }
}

fn alt0(pins: &[u8]) -> Vec<(u8, AltFunction)> {
    pins.iter().map(|p| (*p, AltFunction::Alt0)).collect()
}

/// Pins held by a peripheral
///
/// Dropping the claim leaves the pins assigned; call
/// [`PeripheralClaim::release`] to return them to plain inputs.
#[must_use = "the claim is needed to release the pins"]
pub struct PeripheralClaim {
    peripheral: Peripheral,
    pins: Vec<HeaderPin>,
    gpio: Gpio,
    released: Rc<Cell<bool>>,
}

impl fmt::Debug for PeripheralClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeripheralClaim")
            .field("peripheral", &self.peripheral)
            .field("pins", &self.pins())
            .field("released", &self.released.get())
            .finish()
    }
}

impl PeripheralClaim {
    pub fn peripheral(&self) -> Peripheral {
        self.peripheral
    }

    /// Claimed header pins
    pub fn pins(&self) -> Vec<u8> {
        self.pins.iter().map(|p| p.header).collect()
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }

    /// Return every claimed pin to an unowned, pull-free input
    ///
    /// Fails with `NotOwned` once released, including by [`Gpio::close`].
    pub fn release(&self) -> Result<()> {
        if self.released.replace(true) {
            return Err(GpioError::NotOwned {
                pin: self.pins.first().map_or(0, |p| p.header),
                role: PinRole::AlternateFunction,
            });
        }
        self.gpio.forget_claim(&self.released);
        for pin in &self.pins {
            if self.gpio.role_of(pin.header)? == PinRole::AlternateFunction {
                self.gpio.reset_alternate(*pin);
            }
        }
        info!("Released {} pins {:?}", self.peripheral, self.pins());
        Ok(())
    }
}

impl Gpio {
    /// Claim the I2C pins of `pin_set` (0 or 1)
    pub fn claim_i2c(&self, pin_set: u8, auto_upgrade: bool) -> Result<PeripheralClaim> {
        self.claim(Peripheral::I2c { pin_set }, auto_upgrade)
    }

    /// Claim MOSI, MISO, SCLK, CE0 and CE1 of SPI0
    pub fn claim_spi(&self, auto_upgrade: bool) -> Result<PeripheralClaim> {
        self.claim(Peripheral::Spi, auto_upgrade)
    }

    /// Claim one PWM output pin (12, 32, 33 or 35)
    pub fn claim_pwm(&self, pin: u8, auto_upgrade: bool) -> Result<PeripheralClaim> {
        self.claim(Peripheral::Pwm { pin }, auto_upgrade)
    }

    pub fn claim(&self, peripheral: Peripheral, auto_upgrade: bool) -> Result<PeripheralClaim> {
        let wanted = peripheral
            .pins()?
            .into_iter()
            .map(|(pin, alt)| Ok((header::resolve(pin)?, alt)))
            .collect::<Result<Vec<_>>>()?;
        for (pin, _) in &wanted {
            let current = self.role_of(pin.header)?;
            if current == PinRole::AlternateFunction {
                return Err(GpioError::RoleConflict {
                    pin: pin.header,
                    current,
                    requested: PinRole::AlternateFunction,
                });
            }
        }

        self.require_broad(auto_upgrade)?;

        for (pin, alt) in &wanted {
            let previous = self.registry_mut().assign_alternate(*pin);
            if let Some(previous) = previous {
                debug!(
                    "Pin {} taken from its {} owner for {}",
                    pin.header,
                    previous.role(),
                    peripheral
                );
                self.discard(&previous);
            }
            self.driver_mut().configure_pin(pin.bcm, PinMode::Alt(*alt));
        }

        let pins: Vec<HeaderPin> = wanted.into_iter().map(|(pin, _)| pin).collect();
        let released = Rc::new(Cell::new(false));
        self.register_claim(&released);
        info!(
            "Claimed {} on pins {:?}",
            peripheral,
            pins.iter().map(|p| p.header).collect::<Vec<_>>()
        );
        Ok(PeripheralClaim {
            peripheral,
            pins,
            gpio: self.clone(),
            released,
        })
    }

    /// Header pins currently held by peripherals
    pub fn alternate_pins(&self) -> Vec<u8> {
        (1..=header::HEADER_PINS)
            .filter(|p| self.role_of(*p).ok() == Some(PinRole::AlternateFunction))
            .collect()
    }
}
