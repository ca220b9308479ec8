//! 40-pin Raspberry Pi header table
//!
//! Maps physical header positions (the numbers printed next to the pins) to
//! BCM controller pin numbers. Power and ground positions have no controller
//! pin and are rejected for every role.
//!
//! | Header | BCM | Header | BCM |
//! |--------|-----|--------|-----|
//! | 3      | 2   | 5      | 3   |
//! | 7      | 4   | 8      | 14  |
//! | 11     | 17  | 12     | 18  |
//! | ...    | ... | 40     | 21  |

use crate::error::{GpioError, InvalidPinReason, Result};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Highest header position
pub const HEADER_PINS: u8 = 40;

/// Header position -> BCM pin, `None` for power and ground
static HEADER_MAP: Lazy<BTreeMap<u8, Option<u8>>> = Lazy::new(|| {
    let bcm: [(u8, Option<u8>); HEADER_PINS as usize] = [
        (1, None),
        (2, None),
        (3, Some(2)),
        (4, None),
        (5, Some(3)),
        (6, None),
        (7, Some(4)),
        (8, Some(14)),
        (9, None),
        (10, Some(15)),
        (11, Some(17)),
        (12, Some(18)),
        (13, Some(27)),
        (14, None),
        (15, Some(22)),
        (16, Some(23)),
        (17, None),
        (18, Some(24)),
        (19, Some(10)),
        (20, None),
        (21, Some(9)),
        (22, Some(25)),
        (23, Some(11)),
        (24, Some(8)),
        (25, None),
        (26, Some(7)),
        (27, Some(0)),
        (28, Some(1)),
        (29, Some(5)),
        (30, None),
        (31, Some(6)),
        (32, Some(12)),
        (33, Some(13)),
        (34, None),
        (35, Some(19)),
        (36, Some(16)),
        (37, Some(26)),
        (38, Some(20)),
        (39, None),
        (40, Some(21)),
    ];
    bcm.into_iter().collect()
});

/// 3.3V supply positions
pub const POWER_3V3: &[u8] = &[1, 17];
/// 5V supply positions
pub const POWER_5V: &[u8] = &[2, 4];
/// Ground positions
pub const GROUND: &[u8] = &[6, 9, 14, 20, 25, 30, 34, 39];
/// UART TXD, RXD
pub const UART: &[u8] = &[8, 10];
/// I2C pin set 0 (SDA0, SCL0), shared with the HAT ID EEPROM
pub const I2C0: &[u8] = &[27, 28];
/// I2C pin set 1 (SDA1, SCL1)
pub const I2C1: &[u8] = &[3, 5];
/// SPI0 MOSI, MISO, SCLK, CE0, CE1
pub const SPI0: &[u8] = &[19, 21, 23, 24, 26];
/// PWM channel 0 outputs
pub const PWM0: &[u8] = &[12, 32];
/// PWM channel 1 outputs
pub const PWM1: &[u8] = &[33, 35];

/// A header position that has been checked against the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeaderPin {
    /// Physical header position
    pub header: u8,
    /// BCM controller pin
    pub bcm: u8,
}

/// Resolve a header position to its controller pin
pub fn resolve(pin: u8) -> Result<HeaderPin> {
    match HEADER_MAP.get(&pin) {
        Some(Some(bcm)) => Ok(HeaderPin { header: pin, bcm: *bcm }),
        Some(None) => Err(GpioError::InvalidPin {
            pin,
            reason: InvalidPinReason::NotGpio,
        }),
        None => Err(GpioError::InvalidPin {
            pin,
            reason: InvalidPinReason::OutOfRange,
        }),
    }
}

/// True if the position carries a controller pin
pub fn is_gpio(pin: u8) -> bool {
    matches!(HEADER_MAP.get(&pin), Some(Some(_)))
}

/// All header positions usable as GPIO, in header order
pub fn gpio_pins() -> Vec<u8> {
    HEADER_MAP
        .iter()
        .filter_map(|(header, bcm)| bcm.map(|_| *header))
        .collect()
}

/// Named pin group for pinout listings
#[derive(Debug, Clone, Copy)]
pub struct PinGroup {
    pub name: &'static str,
    pub pins: &'static [u8],
}

/// Common pin groups shared by the 40-pin boards
pub fn pinout() -> Vec<PinGroup> {
    vec![
        PinGroup { name: "3.3v", pins: POWER_3V3 },
        PinGroup { name: "5v", pins: POWER_5V },
        PinGroup { name: "ground", pins: GROUND },
        PinGroup { name: "eeprom id / i2c0", pins: I2C0 },
        PinGroup { name: "uart", pins: UART },
        PinGroup { name: "i2c1", pins: I2C1 },
        PinGroup { name: "spi0", pins: SPI0 },
        PinGroup { name: "pwm0", pins: PWM0 },
        PinGroup { name: "pwm1", pins: PWM1 },
    ]
}
