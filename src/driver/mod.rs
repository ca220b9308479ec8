//! Low-level register driver interface
//!
//! The pin registry and access-mode arbiter are the only callers of a
//! [`Driver`]. Implementations:
//! - [`sim::SimDriver`]: in-memory pins with an inspectable call log
//! - [`mmap::MmapDriver`]: BCM283x/BCM2711 registers mapped through
//!   `/dev/gpiomem` or `/dev/mem` (unix only)

#[cfg(unix)]
pub mod mmap;
pub mod sim;

#[cfg(unix)]
pub use mmap::{MmapConfig, MmapDriver};
pub use sim::{DriverCall, SimDriver, SimHandle};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Breadth of the peripheral register space a driver session can address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// GPIO registers only (`/dev/gpiomem`)
    Restricted,
    /// All peripheral registers (`/dev/mem`), required by PWM, I2C and SPI
    Broad,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Restricted => write!(f, "restricted"),
            AccessMode::Broad => write!(f, "broad"),
        }
    }
}

/// Alternate function selector, encoded as in GPFSELn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AltFunction {
    Alt0 = 4,
    Alt1 = 5,
    Alt2 = 6,
    Alt3 = 7,
    Alt4 = 3,
    Alt5 = 2,
}

/// Function a controller pin is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    Input,
    Output,
    Alt(AltFunction),
}

impl PinMode {
    /// 3-bit GPFSEL field value
    pub fn fsel_bits(self) -> u32 {
        match self {
            PinMode::Input => 0b000,
            PinMode::Output => 0b001,
            PinMode::Alt(alt) => alt as u32,
        }
    }
}

/// Internal pull resistor setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    #[default]
    Off,
    Down,
    Up,
}

impl fmt::Display for Pull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pull::Off => write!(f, "off"),
            Pull::Down => write!(f, "down"),
            Pull::Up => write!(f, "up"),
        }
    }
}

/// Register-level operations the core needs from the hardware
///
/// Pin arguments are BCM controller pin numbers. Register operations are
/// synchronous and expected to complete in microseconds; only opening the
/// access window can fail.
pub trait Driver {
    /// Map the register window for `mode`
    fn open_access(&mut self, mode: AccessMode) -> io::Result<()>;

    /// Unmap the register window
    fn close_access(&mut self);

    fn configure_pin(&mut self, bcm: u8, mode: PinMode);

    fn read_pin(&self, bcm: u8) -> bool;

    fn write_pin(&mut self, bcm: u8, level: bool);

    fn set_pull(&mut self, bcm: u8, pull: Pull);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsel_encoding() {
        assert_eq!(PinMode::Input.fsel_bits(), 0);
        assert_eq!(PinMode::Output.fsel_bits(), 1);
        assert_eq!(PinMode::Alt(AltFunction::Alt0).fsel_bits(), 4);
        assert_eq!(PinMode::Alt(AltFunction::Alt5).fsel_bits(), 2);
    }
}
