//! Error types shared by every GPIO operation
//!
//! All failures are reported synchronously to the caller of the operation that
//! triggered them. Failures inside scheduled work (delayed writes, pulse
//! completion) surface from the scheduler call that ran the task.

use crate::driver::AccessMode;
use crate::registry::PinRole;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, GpioError>;

/// Why a header position was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPinReason {
    /// Power or ground position on the header
    NotGpio,
    /// Not a header position at all
    OutOfRange,
}

impl fmt::Display for InvalidPinReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidPinReason::NotGpio => write!(f, "is a power or ground pin"),
            InvalidPinReason::OutOfRange => write!(f, "is not a header position"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("pin {pin} {reason}")]
    InvalidPin { pin: u8, reason: InvalidPinReason },

    #[error("pin {pin} is in use as {current}, cannot use it as {requested}")]
    RoleConflict {
        pin: u8,
        current: PinRole,
        requested: PinRole,
    },

    #[error("pin {pin} is not owned as {role}")]
    NotOwned { pin: u8, role: PinRole },

    #[error("pin {pin} is already open as {role}")]
    AlreadyOpen { pin: u8, role: PinRole },

    #[error(
        "peripheral access conflict: {required} access required but {current} access is \
         already committed; claim I2C/SPI/PWM before any GPIO input/output pin, or request \
         an explicit upgrade"
    )]
    AccessModeConflict {
        current: AccessMode,
        required: AccessMode,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to open {mode} register access")]
    Access {
        mode: AccessMode,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GpioError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        GpioError::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_pin() {
        let err = GpioError::RoleConflict {
            pin: 3,
            current: PinRole::AlternateFunction,
            requested: PinRole::Output,
        };
        assert_eq!(
            err.to_string(),
            "pin 3 is in use as alternate function, cannot use it as output"
        );

        let err = GpioError::InvalidPin {
            pin: 6,
            reason: InvalidPinReason::NotGpio,
        };
        assert_eq!(err.to_string(), "pin 6 is a power or ground pin");
    }

    #[test]
    fn test_access_conflict_advises_ordering() {
        let err = GpioError::AccessModeConflict {
            current: AccessMode::Restricted,
            required: AccessMode::Broad,
        };
        assert!(err.to_string().contains("before any GPIO input/output pin"));
    }
}
