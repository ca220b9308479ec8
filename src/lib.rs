//! Raspberry Pi 40-pin header GPIO
//!
//! Exclusive pin ownership, access-mode arbitration for peripherals and
//! polled edge watching on top of a small register [`driver::Driver`].
//!
//! Every header pin has exactly one role at a time: input, output, or
//! alternate function (I2C, SPI, PWM). Acquiring a pin in a new role releases
//! its previous owner; a pin held by a peripheral cannot be taken for GPIO.
//! Peripherals need broad register access, so they should be claimed before
//! any GPIO pin commits the restricted window.
//!
//! # Example
//!
//! ```no_run
//! use gpio_header::{Gpio, GpioSettings, Pull};
//! use std::time::Duration;
//!
//! # fn main() -> gpio_header::Result<()> {
//! let (gpio, _sim) = Gpio::simulated(GpioSettings::default());
//! let button = gpio.acquire_input(7, Pull::Up)?;
//! let led = gpio.acquire_output(11, false)?;
//!
//! let watch = button.watch(move |level, pin| println!("pin {} -> {}", pin, level))?;
//! led.pulse(Duration::from_millis(200))?;
//! gpio.advance(Duration::from_secs(1))?;
//! watch.unwatch();
//! # Ok(())
//! # }
//! ```

pub mod arbiter;
pub mod config;
pub mod driver;
pub mod error;
pub mod gpio;
pub mod header;
pub mod peripheral;
pub mod pin;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod watch;

pub use config::BoardConfig;
pub use driver::{AccessMode, Driver, Pull};
pub use error::{GpioError, Result};
pub use gpio::{Gpio, GpioSettings, MAX_DELAY};
pub use peripheral::{Peripheral, PeripheralClaim};
pub use pin::{InputGroup, InputPin, OutputPin};
pub use registry::PinRole;
pub use watch::{EdgeFilter, Unwatch, WatchOptions, WatchSet};
