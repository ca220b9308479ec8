//! Access-mode arbiter
//!
//! Tracks whether the driver's register window is open and in which mode.
//! GPIO input/output use only needs [`AccessMode::Restricted`]; PWM, I2C and
//! SPI registers are unreachable through that window and need
//! [`AccessMode::Broad`]. Broad always satisfies a Restricted request, and the
//! arbiter never downgrades.

use crate::driver::{AccessMode, Driver};
use crate::error::{GpioError, Result};
use log::{info, warn};

#[derive(Debug, Default)]
pub struct AccessArbiter {
    mode: Option<AccessMode>,
}

impl AccessArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode of the open window, `None` before the first open
    pub fn mode(&self) -> Option<AccessMode> {
        self.mode
    }

    pub fn is_opened(&self) -> bool {
        self.mode.is_some()
    }

    /// Make sure the window is open and covers `requested`
    ///
    /// Opens on first use. A Restricted window is re-opened as Broad when
    /// Broad is requested; if that fails the Restricted window is restored.
    pub fn ensure_opened(&mut self, requested: AccessMode, driver: &mut dyn Driver) -> Result<()> {
        match (self.mode, requested) {
            (None, mode) => {
                driver
                    .open_access(mode)
                    .map_err(|source| GpioError::Access { mode, source })?;
                info!("Opened {} register access", mode);
                self.mode = Some(mode);
            }
            (Some(AccessMode::Restricted), AccessMode::Broad) => {
                driver.close_access();
                if let Err(source) = driver.open_access(AccessMode::Broad) {
                    self.mode = driver
                        .open_access(AccessMode::Restricted)
                        .ok()
                        .map(|_| AccessMode::Restricted);
                    return Err(GpioError::Access {
                        mode: AccessMode::Broad,
                        source,
                    });
                }
                info!("Re-opened register access as broad");
                self.mode = Some(AccessMode::Broad);
            }
            (Some(_), _) => {}
        }
        Ok(())
    }

    /// Broad access for a peripheral bootstrap
    ///
    /// Once Restricted access is committed the upgrade happens only when the
    /// caller asks for it; otherwise the call fails with `AccessModeConflict`.
    pub fn require_broad(&mut self, auto_upgrade: bool, driver: &mut dyn Driver) -> Result<()> {
        if self.mode == Some(AccessMode::Restricted) {
            if !auto_upgrade {
                return Err(GpioError::AccessModeConflict {
                    current: AccessMode::Restricted,
                    required: AccessMode::Broad,
                });
            }
            warn!(
                "Upgrading restricted register access to broad; pins configured so far \
                 keep their register state but the window is re-mapped"
            );
        }
        self.ensure_opened(AccessMode::Broad, driver)
    }

    /// Close the window; the next request opens it again
    pub fn close(&mut self, driver: &mut dyn Driver) {
        if self.mode.take().is_some() {
            driver.close_access();
            info!("Closed register access");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCall, SimDriver};

    #[test]
    fn test_first_request_opens() {
        let (mut driver, sim) = SimDriver::with_handle();
        let mut arbiter = AccessArbiter::new();
        assert!(!arbiter.is_opened());

        arbiter.ensure_opened(AccessMode::Restricted, &mut driver).unwrap();
        arbiter.ensure_opened(AccessMode::Restricted, &mut driver).unwrap();

        assert_eq!(arbiter.mode(), Some(AccessMode::Restricted));
        assert_eq!(sim.calls(), vec![DriverCall::OpenAccess(AccessMode::Restricted)]);
    }

    #[test]
    fn test_broad_satisfies_restricted() {
        let (mut driver, sim) = SimDriver::with_handle();
        let mut arbiter = AccessArbiter::new();

        arbiter.require_broad(false, &mut driver).unwrap();
        arbiter.ensure_opened(AccessMode::Restricted, &mut driver).unwrap();

        assert_eq!(arbiter.mode(), Some(AccessMode::Broad));
        assert_eq!(sim.calls(), vec![DriverCall::OpenAccess(AccessMode::Broad)]);
    }

    #[test]
    fn test_require_broad_conflicts_after_restricted() {
        let (mut driver, sim) = SimDriver::with_handle();
        let mut arbiter = AccessArbiter::new();
        arbiter.ensure_opened(AccessMode::Restricted, &mut driver).unwrap();

        let err = arbiter.require_broad(false, &mut driver).unwrap_err();
        assert!(matches!(
            err,
            GpioError::AccessModeConflict {
                current: AccessMode::Restricted,
                required: AccessMode::Broad,
            }
        ));
        assert_eq!(arbiter.mode(), Some(AccessMode::Restricted));
        assert_eq!(sim.access(), Some(AccessMode::Restricted));
    }

    #[test]
    fn test_explicit_upgrade_reopens() {
        let (mut driver, sim) = SimDriver::with_handle();
        let mut arbiter = AccessArbiter::new();
        arbiter.ensure_opened(AccessMode::Restricted, &mut driver).unwrap();

        arbiter.require_broad(true, &mut driver).unwrap();

        assert_eq!(arbiter.mode(), Some(AccessMode::Broad));
        assert_eq!(
            sim.calls(),
            vec![
                DriverCall::OpenAccess(AccessMode::Restricted),
                DriverCall::CloseAccess,
                DriverCall::OpenAccess(AccessMode::Broad),
            ]
        );
    }

    #[test]
    fn test_failed_upgrade_restores_restricted() {
        let (mut driver, sim) = SimDriver::with_handle();
        let mut arbiter = AccessArbiter::new();
        arbiter.ensure_opened(AccessMode::Restricted, &mut driver).unwrap();
        sim.fail_open(AccessMode::Broad);

        assert!(matches!(
            arbiter.require_broad(true, &mut driver),
            Err(GpioError::Access { mode: AccessMode::Broad, .. })
        ));
        assert_eq!(arbiter.mode(), Some(AccessMode::Restricted));
        assert_eq!(sim.access(), Some(AccessMode::Restricted));
    }

    #[test]
    fn test_close_then_reopen() {
        let (mut driver, sim) = SimDriver::with_handle();
        let mut arbiter = AccessArbiter::new();
        arbiter.ensure_opened(AccessMode::Restricted, &mut driver).unwrap();
        arbiter.close(&mut driver);
        arbiter.close(&mut driver);
        assert!(!arbiter.is_opened());
        assert_eq!(sim.access(), None);

        arbiter.require_broad(false, &mut driver).unwrap();
        assert_eq!(sim.access(), Some(AccessMode::Broad));
    }
}
