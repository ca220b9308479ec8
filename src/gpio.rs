//! GPIO context
//!
//! [`Gpio`] owns the pin registry, the access-mode arbiter, the watch table,
//! the task scheduler and the driver. Every pin operation goes through it; no
//! other component talks to the driver when a role conflict is possible.
//!
//! The context is single-threaded: handles are `Rc`-based and `!Send`, and
//! scheduled work only runs when the owner drives the clock with
//! [`Gpio::advance`], [`Gpio::step`] or the tokio runner in
//! [`crate::runtime`].

use crate::arbiter::AccessArbiter;
use crate::driver::{AccessMode, Driver, PinMode, Pull, SimDriver, SimHandle};
use crate::error::{GpioError, Result};
use crate::header::{self, HeaderPin};
use crate::pin::{InputGroup, InputPin, OutputPin};
use crate::registry::{PinRegistry, PinRole, PinSlot};
use crate::scheduler::{CancelToken, Scheduler};
use crate::watch::{
    EdgeFilter, Unwatch, WatchCallback, WatchOptions, WatchSet, WatchTable, DEFAULT_POLL_INTERVAL,
};
use log::{debug, warn};
use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Longest accepted delay for scheduled actions
pub const MAX_DELAY: Duration = Duration::from_millis(2_147_483_647);

/// Library-level defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioSettings {
    /// Default for peripheral claims made from configuration
    pub auto_upgrade: bool,
    /// Poll interval used by [`InputPin::watch`]
    pub poll_interval: Duration,
    /// Edge filter used by [`InputPin::watch`]
    pub default_edge: EdgeFilter,
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            auto_upgrade: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_edge: EdgeFilter::Both,
        }
    }
}

impl GpioSettings {
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            edge: self.default_edge,
            poll_interval: self.poll_interval,
        }
    }
}

struct Inner {
    settings: GpioSettings,
    driver: RefCell<Box<dyn Driver>>,
    arbiter: RefCell<AccessArbiter>,
    registry: RefCell<PinRegistry>,
    watches: RefCell<WatchTable>,
    scheduler: Scheduler<Gpio>,
    running: Cell<bool>,
    claims: RefCell<Vec<Rc<Cell<bool>>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.scheduler.clear();
        self.arbiter.get_mut().close(self.driver.get_mut().as_mut());
    }
}

/// Shared handle to one GPIO context
///
/// Cloning is cheap and yields a handle to the same context.
#[derive(Clone)]
pub struct Gpio {
    inner: Rc<Inner>,
}

/// Non-owning reference held by unregister handles
#[derive(Clone)]
pub(crate) struct WeakGpio(Weak<Inner>);

impl WeakGpio {
    pub(crate) fn upgrade(&self) -> Option<Gpio> {
        self.0.upgrade().map(|inner| Gpio { inner })
    }
}

impl fmt::Debug for Gpio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gpio")
            .field("access", &self.access_mode())
            .field("now", &self.now())
            .field("pending", &self.inner.scheduler.pending())
            .finish()
    }
}

impl Gpio {
    pub fn new(driver: Box<dyn Driver>, settings: GpioSettings) -> Self {
        Self {
            inner: Rc::new(Inner {
                settings,
                driver: RefCell::new(driver),
                arbiter: RefCell::new(AccessArbiter::new()),
                registry: RefCell::new(PinRegistry::new()),
                watches: RefCell::new(WatchTable::default()),
                scheduler: Scheduler::new(),
                running: Cell::new(false),
                claims: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Context over a [`SimDriver`], with a handle to drive its pins
    pub fn simulated(settings: GpioSettings) -> (Self, SimHandle) {
        let (driver, handle) = SimDriver::with_handle();
        (Self::new(Box::new(driver), settings), handle)
    }

    pub fn settings(&self) -> &GpioSettings {
        &self.inner.settings
    }

    pub(crate) fn downgrade(&self) -> WeakGpio {
        WeakGpio(Rc::downgrade(&self.inner))
    }

    // Access mode

    /// Open the register window in `mode`, upgrading Restricted to Broad if asked
    pub fn ensure_opened(&self, mode: AccessMode) -> Result<()> {
        let mut driver = self.inner.driver.borrow_mut();
        self.inner
            .arbiter
            .borrow_mut()
            .ensure_opened(mode, driver.as_mut())
    }

    /// Broad access for a peripheral; see [`AccessArbiter::require_broad`]
    pub fn require_broad(&self, auto_upgrade: bool) -> Result<()> {
        let mut driver = self.inner.driver.borrow_mut();
        self.inner
            .arbiter
            .borrow_mut()
            .require_broad(auto_upgrade, driver.as_mut())
    }

    pub fn access_mode(&self) -> Option<AccessMode> {
        self.inner.arbiter.borrow().mode()
    }

    // Registry

    pub fn role_of(&self, pin: u8) -> Result<PinRole> {
        self.inner.registry.borrow().role_of(pin)
    }

    /// Acquire `pin` as an input with the given pull
    ///
    /// Returns the existing handle if the pin is already an input, after
    /// re-configuring it with `pull`. An output owner is released first.
    pub fn acquire_input(&self, pin: u8, pull: Pull) -> Result<InputPin> {
        let pin = header::resolve(pin)?;
        self.inner
            .registry
            .borrow()
            .check_available(pin, PinRole::Input)?;

        let existing = self.inner.registry.borrow().owner(pin.header)?;
        if let Some(slot) = existing.filter(|s| s.role() == PinRole::Input) {
            self.configure_input(&slot, pull);
            return Ok(InputPin::from_slot(slot, self.clone()));
        }

        let slot = PinSlot::new(pin, PinRole::Input);
        self.install_input(&slot, pull)?;
        Ok(InputPin::from_slot(slot, self.clone()))
    }

    /// Acquire `pin` as an output driven to `initial`
    ///
    /// Returns the existing handle if the pin is already an output, after
    /// re-configuring it and writing `initial`. An input owner is released
    /// first.
    pub fn acquire_output(&self, pin: u8, initial: bool) -> Result<OutputPin> {
        let pin = header::resolve(pin)?;
        self.inner
            .registry
            .borrow()
            .check_available(pin, PinRole::Output)?;

        let existing = self.inner.registry.borrow().owner(pin.header)?;
        if let Some(slot) = existing.filter(|s| s.role() == PinRole::Output) {
            self.configure_output(&slot, initial);
            return Ok(OutputPin::from_slot(slot, self.clone()));
        }

        let slot = PinSlot::new(pin, PinRole::Output);
        self.install_output(&slot, initial)?;
        Ok(OutputPin::from_slot(slot, self.clone()))
    }

    /// Acquire several inputs; nothing is touched unless every pin is usable
    pub fn acquire_inputs(&self, pins: &[u8], pull: Pull) -> Result<InputGroup> {
        self.check_all(pins, PinRole::Input)?;
        let pins = pins
            .iter()
            .map(|pin| self.acquire_input(*pin, pull))
            .collect::<Result<Vec<_>>>()?;
        Ok(InputGroup::new(pins))
    }

    /// Acquire several outputs; nothing is touched unless every pin is usable
    pub fn acquire_outputs(&self, pins: &[u8], initial: bool) -> Result<Vec<OutputPin>> {
        self.check_all(pins, PinRole::Output)?;
        pins.iter()
            .map(|pin| self.acquire_output(*pin, initial))
            .collect()
    }

    /// Return an input/output pin to an unowned, pull-free input
    ///
    /// Fails with `NotOwned` for pins that have no input/output owner,
    /// including pins held by a peripheral.
    pub fn release(&self, pin: u8) -> Result<()> {
        let pin = header::resolve(pin)?;
        let registry = self.inner.registry.borrow();
        let owner = registry.owner(pin.header)?;
        let role = registry.role_of(pin.header)?;
        drop(registry);

        match owner {
            Some(slot) => {
                self.release_slot(&slot);
                Ok(())
            }
            None => Err(GpioError::NotOwned {
                pin: pin.header,
                role,
            }),
        }
    }

    /// Release every owned pin and peripheral claim, then close the register
    /// window
    pub fn close(&self) {
        let owners = self.inner.registry.borrow().owners();
        for slot in owners {
            self.release_slot(&slot);
        }
        for released in self.inner.claims.borrow_mut().drain(..) {
            released.set(true);
        }
        let alternates = self.inner.registry.borrow().alternate_pins();
        for pin in alternates.into_iter().filter_map(|p| header::resolve(p).ok()) {
            self.reset_alternate(pin);
        }
        let mut driver = self.inner.driver.borrow_mut();
        self.inner.arbiter.borrow_mut().close(driver.as_mut());
    }

    // Watches

    /// Watch every currently owned input with one shared callback
    pub fn watch_all<F>(&self, callback: F, options: WatchOptions) -> Result<WatchSet>
    where
        F: FnMut(bool, u8) + 'static,
    {
        let callback: WatchCallback = Rc::new(RefCell::new(callback));
        let inputs: Vec<_> = self
            .inner
            .registry
            .borrow()
            .owners()
            .into_iter()
            .filter(|s| s.role() == PinRole::Input)
            .collect();
        let watches = inputs
            .iter()
            .map(|slot| self.watch_slot(slot, Rc::clone(&callback), options))
            .collect::<Result<Vec<_>>>()?;
        Ok(WatchSet::new(watches))
    }

    /// Stop every watcher on `pin`; returns how many were stopped
    pub fn unwatch_all(&self, pin: u8) -> Result<usize> {
        let pin = header::resolve(pin)?;
        let count = self.inner.watches.borrow_mut().remove_all(pin.header);
        if count > 0 {
            debug!("Removed {} watcher(s) from pin {}", count, pin.header);
        }
        Ok(count)
    }

    pub fn watcher_count(&self, pin: u8) -> usize {
        self.inner.watches.borrow().count(pin)
    }

    // Clock

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.inner.scheduler.now()
    }

    /// Due time of the next live scheduled task
    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner.scheduler.next_deadline()
    }

    /// Number of live scheduled tasks
    pub fn pending(&self) -> usize {
        self.inner.scheduler.pending()
    }

    /// Run everything due within `by` of now; returns the number of tasks run
    pub fn advance(&self, by: Duration) -> Result<usize> {
        self.advance_to(self.now() + by)
    }

    /// Run everything due at or before `at`
    pub fn advance_to(&self, at: Duration) -> Result<usize> {
        self.drive(|sched, gpio| sched.run_until(gpio, at))
    }

    /// Run only the earliest scheduled task
    pub fn step(&self) -> Result<bool> {
        self.drive(|sched, gpio| sched.step(gpio))
    }

    /// Run everything already due without moving the clock
    pub fn run_pending(&self) -> Result<usize> {
        self.advance_to(self.now())
    }

    fn drive<T>(&self, run: impl FnOnce(&Scheduler<Gpio>, &Gpio) -> Result<T>) -> Result<T> {
        if self.inner.running.replace(true) {
            return Err(GpioError::invalid_argument(
                "the scheduler cannot be driven from inside a scheduled callback",
            ));
        }
        let result = run(&self.inner.scheduler, self);
        self.inner.running.set(false);
        result
    }

    // Crate-internal plumbing for handles and peripherals

    pub(crate) fn driver_mut(&self) -> RefMut<'_, Box<dyn Driver>> {
        self.inner.driver.borrow_mut()
    }

    pub(crate) fn registry_mut(&self) -> RefMut<'_, PinRegistry> {
        self.inner.registry.borrow_mut()
    }

    pub(crate) fn ensure_owner(&self, slot: &Rc<PinSlot>) -> Result<()> {
        self.inner.registry.borrow().ensure_owner(slot)
    }

    pub(crate) fn is_owner(&self, slot: &Rc<PinSlot>) -> bool {
        self.inner.registry.borrow().is_owner(slot)
    }

    /// Make `slot` the input owner of its pin
    pub(crate) fn install_input(&self, slot: &Rc<PinSlot>, pull: Pull) -> Result<()> {
        self.take_over(slot)?;
        self.configure_input(slot, pull);
        Ok(())
    }

    /// Make `slot` the output owner of its pin
    pub(crate) fn install_output(&self, slot: &Rc<PinSlot>, initial: bool) -> Result<()> {
        self.take_over(slot)?;
        self.configure_output(slot, initial);
        Ok(())
    }

    fn configure_input(&self, slot: &Rc<PinSlot>, pull: Pull) {
        let pin = slot.pin();
        let mut driver = self.inner.driver.borrow_mut();
        driver.configure_pin(pin.bcm, PinMode::Input);
        driver.set_pull(pin.bcm, pull);
        slot.set_pull(pull);
        debug!("Pin {} (GPIO{}) configured as input, pull {}", pin.header, pin.bcm, pull);
    }

    fn configure_output(&self, slot: &Rc<PinSlot>, initial: bool) {
        let pin = slot.pin();
        let mut driver = self.inner.driver.borrow_mut();
        driver.configure_pin(pin.bcm, PinMode::Output);
        driver.write_pin(pin.bcm, initial);
        debug!(
            "Pin {} (GPIO{}) configured as output, initial {}",
            pin.header,
            pin.bcm,
            u8::from(initial)
        );
    }

    fn take_over(&self, slot: &Rc<PinSlot>) -> Result<()> {
        self.inner
            .registry
            .borrow()
            .check_available(slot.pin(), slot.role())?;
        self.ensure_opened(AccessMode::Restricted)?;
        let previous = self.inner.registry.borrow_mut().install(Rc::clone(slot));
        if let Some(previous) = previous {
            self.discard(&previous);
        }
        Ok(())
    }

    /// Release an owner: cancel its work, reset the pin
    pub(crate) fn release_slot(&self, slot: &Rc<PinSlot>) {
        let pin = slot.pin();
        self.discard(slot);
        self.inner.registry.borrow_mut().reset(pin);
        let mut driver = self.inner.driver.borrow_mut();
        driver.configure_pin(pin.bcm, PinMode::Input);
        driver.set_pull(pin.bcm, Pull::Off);
        debug!("Pin {} (GPIO{}) released", pin.header, pin.bcm);
    }

    /// Track a peripheral claim's released flag so `close` can end it
    pub(crate) fn register_claim(&self, released: &Rc<Cell<bool>>) {
        self.inner.claims.borrow_mut().push(Rc::clone(released));
    }

    pub(crate) fn forget_claim(&self, released: &Rc<Cell<bool>>) {
        self.inner
            .claims
            .borrow_mut()
            .retain(|flag| !Rc::ptr_eq(flag, released));
    }

    /// Return a peripheral pin to an unowned, pull-free input
    pub(crate) fn reset_alternate(&self, pin: HeaderPin) {
        self.inner.registry.borrow_mut().reset(pin);
        let mut driver = self.inner.driver.borrow_mut();
        driver.configure_pin(pin.bcm, PinMode::Input);
        driver.set_pull(pin.bcm, Pull::Off);
        debug!("Pin {} (GPIO{}) returned from alternate function", pin.header, pin.bcm);
    }

    /// Drop everything an owner left running
    pub(crate) fn discard(&self, slot: &Rc<PinSlot>) {
        let pin = slot.pin().header;
        let dropped = slot.cancel_actions();
        if dropped > 0 {
            warn!("Dropped {} pending delayed action(s) on pin {}", dropped, pin);
        }
        let watchers = self.inner.watches.borrow_mut().remove_all(pin);
        if watchers > 0 {
            debug!("Removed {} watcher(s) from pin {}", watchers, pin);
        }
    }

    pub(crate) fn apply_pull(&self, slot: &Rc<PinSlot>, pull: Pull) {
        self.inner.driver.borrow_mut().set_pull(slot.pin().bcm, pull);
        slot.set_pull(pull);
    }

    pub(crate) fn read_level(&self, slot: &Rc<PinSlot>) -> Result<bool> {
        self.ensure_owner(slot)?;
        Ok(self.inner.driver.borrow().read_pin(slot.pin().bcm))
    }

    pub(crate) fn write_level(&self, slot: &Rc<PinSlot>, level: bool) -> Result<()> {
        self.ensure_owner(slot)?;
        self.inner.driver.borrow_mut().write_pin(slot.pin().bcm, level);
        Ok(())
    }

    /// Deliver `task` asynchronously, after everything already due
    pub(crate) fn defer<F>(&self, task: F)
    where
        F: FnOnce(&Gpio) -> Result<()> + 'static,
    {
        self.inner.scheduler.defer(task);
    }

    pub(crate) fn schedule<F>(&self, delay: Duration, token: CancelToken, task: F)
    where
        F: FnOnce(&Gpio) -> Result<()> + 'static,
    {
        self.inner.scheduler.schedule(delay, token, task);
    }

    /// Start polling `slot` for edges
    pub(crate) fn watch_slot(
        &self,
        slot: &Rc<PinSlot>,
        callback: WatchCallback,
        options: WatchOptions,
    ) -> Result<Unwatch> {
        self.ensure_owner(slot)?;
        if slot.role() != PinRole::Input {
            return Err(GpioError::NotOwned {
                pin: slot.pin().header,
                role: PinRole::Input,
            });
        }
        if options.poll_interval.is_zero() {
            return Err(GpioError::invalid_argument("poll interval must be non-zero"));
        }
        if options.poll_interval > MAX_DELAY {
            return Err(GpioError::invalid_argument(format!(
                "poll interval {:?} exceeds the {:?} maximum",
                options.poll_interval, MAX_DELAY
            )));
        }

        let pin = slot.pin();
        let watcher = self
            .inner
            .watches
            .borrow_mut()
            .create(pin.header, options.edge);
        let polled = Rc::clone(&watcher);
        self.inner.scheduler.schedule_repeating(
            options.poll_interval,
            watcher.token(),
            move |gpio: &Gpio| {
                let level = gpio.inner.driver.borrow().read_pin(pin.bcm);
                if let Some(edge) = polled.observe(level) {
                    let callback = Rc::clone(&callback);
                    gpio.defer(move |_| {
                        (callback.borrow_mut())(edge, pin.header);
                        Ok(())
                    });
                }
                Ok(())
            },
        );
        debug!(
            "Watching pin {} every {:?} for {} edges",
            pin.header, options.poll_interval, options.edge
        );
        Ok(Unwatch::new(pin.header, &watcher, self))
    }

    pub(crate) fn remove_watcher(&self, pin: u8, id: u64) {
        if self.inner.watches.borrow_mut().remove(pin, id) {
            debug!("Removed watcher {} from pin {}", id, pin);
        }
    }

    fn check_all(&self, pins: &[u8], role: PinRole) -> Result<()> {
        let registry = self.inner.registry.borrow();
        for pin in pins {
            registry.check_available(header::resolve(*pin)?, role)?;
        }
        Ok(())
    }
}

/// Validate a user-supplied delay
pub(crate) fn check_delay(delay: Duration) -> Result<()> {
    if delay > MAX_DELAY {
        return Err(GpioError::invalid_argument(format!(
            "delay {:?} exceeds the {:?} maximum",
            delay, MAX_DELAY
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverCall;
    use std::cell::RefCell;

    fn sim() -> (Gpio, SimHandle) {
        Gpio::simulated(GpioSettings::default())
    }

    type Events = Rc<RefCell<Vec<(bool, u8)>>>;

    fn recorder() -> (Events, impl FnMut(bool, u8) + 'static) {
        let events: Events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        (events, move |level, pin| sink.borrow_mut().push((level, pin)))
    }

    #[test]
    fn test_output_reads_back_initial_state() {
        let (gpio, _sim) = sim();
        for pin in header::gpio_pins() {
            for initial in [true, false] {
                let out = gpio.acquire_output(pin, initial).unwrap();
                assert_eq!(out.state().unwrap(), initial, "pin {}", pin);
            }
        }
    }

    #[test]
    fn test_release_then_reacquire() {
        let (gpio, _sim) = sim();
        for pin in header::gpio_pins() {
            let _out = gpio.acquire_output(pin, true).unwrap();
            gpio.release(pin).unwrap();
            assert_eq!(gpio.role_of(pin).unwrap(), PinRole::Input);
            gpio.acquire_input(pin, Pull::Off).unwrap();
            gpio.release(pin).unwrap();
            gpio.acquire_output(pin, false).unwrap();
        }
    }

    #[test]
    fn test_same_role_returns_same_handle() {
        let (gpio, sim) = sim();
        let a = gpio.acquire_input(7, Pull::Up).unwrap();
        let b = gpio.acquire_input(7, Pull::Up).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(sim.configure_count(), 2);

        let c = gpio.acquire_input(7, Pull::Down).unwrap();
        assert!(a.ptr_eq(&c));
        assert_eq!(c.pull(), Pull::Down);
        assert_eq!(sim.pull(4), Pull::Down);
        assert_eq!(sim.configure_count(), 3);

        let x = gpio.acquire_output(11, true).unwrap();
        let y = gpio.acquire_output(11, false).unwrap();
        assert!(x.ptr_eq(&y));
        assert_eq!(sim.configure_count(), 5);
        assert_eq!(sim.mode(17), PinMode::Output);
        assert!(!sim.level(17));
    }

    #[test]
    fn test_one_configure_call_per_transition() {
        let (gpio, sim) = sim();
        gpio.acquire_input(7, Pull::Off).unwrap();
        assert_eq!(sim.configure_count(), 1);
        gpio.acquire_output(7, true).unwrap();
        assert_eq!(sim.configure_count(), 2);
        gpio.release(7).unwrap();
        assert_eq!(sim.configure_count(), 3);
    }

    #[test]
    fn test_open_access_precedes_driver_calls() {
        let (gpio, sim) = sim();
        gpio.acquire_output(11, true).unwrap();
        assert_eq!(
            sim.calls(),
            vec![
                DriverCall::OpenAccess(AccessMode::Restricted),
                DriverCall::Configure(17, PinMode::Output),
                DriverCall::Write(17, true),
            ]
        );
    }

    #[test]
    fn test_role_change_invalidates_old_handle() {
        let (gpio, _sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let _output = gpio.acquire_output(7, false).unwrap();
        assert!(matches!(
            input.state(),
            Err(GpioError::NotOwned { pin: 7, role: PinRole::Input })
        ));
    }

    #[test]
    fn test_output_on_alternate_pin_conflicts() {
        let (gpio, _sim) = sim();
        let _i2c = gpio.claim_i2c(1, false).unwrap();
        let err = gpio.acquire_output(3, true).unwrap_err();
        assert!(matches!(
            err,
            GpioError::RoleConflict {
                pin: 3,
                current: PinRole::AlternateFunction,
                requested: PinRole::Output,
            }
        ));
        assert_eq!(gpio.role_of(3).unwrap(), PinRole::AlternateFunction);
    }

    #[test]
    fn test_release_rejects_unowned_and_alternate() {
        let (gpio, _sim) = sim();
        assert!(matches!(
            gpio.release(7),
            Err(GpioError::NotOwned { pin: 7, role: PinRole::Input })
        ));
        let _i2c = gpio.claim_i2c(1, false).unwrap();
        assert!(matches!(
            gpio.release(5),
            Err(GpioError::NotOwned {
                pin: 5,
                role: PinRole::AlternateFunction
            })
        ));

        gpio.acquire_output(11, true).unwrap();
        gpio.release(11).unwrap();
        assert!(matches!(gpio.release(11), Err(GpioError::NotOwned { .. })));
    }

    #[test]
    fn test_invalid_pins_rejected() {
        let (gpio, sim) = sim();
        assert!(matches!(
            gpio.acquire_input(6, Pull::Off),
            Err(GpioError::InvalidPin { pin: 6, .. })
        ));
        assert!(matches!(
            gpio.acquire_output(0, true),
            Err(GpioError::InvalidPin { pin: 0, .. })
        ));
        assert!(gpio.role_of(41).is_err());
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_group_acquire_is_atomic() {
        let (gpio, sim) = sim();
        let _spi = gpio.claim_spi(false).unwrap();
        sim.clear_calls();
        assert!(gpio.acquire_outputs(&[11, 13, 19], true).is_err());
        assert!(sim.calls().is_empty());
        assert_eq!(gpio.role_of(11).unwrap(), PinRole::Input);
        assert!(gpio.release(11).is_err());
    }

    #[test]
    fn test_input_output_scenario() {
        let (gpio, sim) = sim();
        let _input = gpio.acquire_input(7, Pull::Up).unwrap();
        let output = gpio.acquire_output(11, true).unwrap();
        assert_eq!(sim.pull(4), Pull::Up);

        assert!(output.state().unwrap());
        output.write(false).unwrap();
        assert!(!output.state().unwrap());

        gpio.release(11).unwrap();
        assert_eq!(gpio.role_of(11).unwrap(), PinRole::Input);
        assert_eq!(sim.mode(17), PinMode::Input);
        assert_eq!(sim.pull(17), Pull::Off);
    }

    #[test]
    fn test_watch_both_edges_scenario() {
        let (gpio, sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let (events, callback) = recorder();
        let options = WatchOptions::default().with_poll_interval(Duration::from_millis(50));
        let _watch = input.watch_with(callback, options).unwrap();

        // LOW at registration, then one level per tick
        for level in [false, true] {
            sim.set_level(4, level);
            gpio.advance(Duration::from_millis(50)).unwrap();
        }
        assert_eq!(*events.borrow(), vec![(true, 7)]);

        events.borrow_mut().clear();
        for level in [true, false] {
            sim.set_level(4, level);
            gpio.advance(Duration::from_millis(50)).unwrap();
        }
        assert_eq!(*events.borrow(), vec![(false, 7)]);
    }

    #[test]
    fn test_watch_falling_only_scenario() {
        let (gpio, sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let (events, callback) = recorder();
        let options = WatchOptions::default()
            .with_edge(EdgeFilter::Falling)
            .with_poll_interval(Duration::from_millis(50));
        let _watch = input.watch_with(callback, options).unwrap();

        for level in [false, true] {
            sim.set_level(4, level);
            gpio.advance(Duration::from_millis(50)).unwrap();
        }
        assert!(events.borrow().is_empty());

        for level in [true, false] {
            sim.set_level(4, level);
            gpio.advance(Duration::from_millis(50)).unwrap();
        }
        assert_eq!(*events.borrow(), vec![(false, 7)]);
    }

    #[test]
    fn test_unchanged_level_never_fires() {
        let (gpio, sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let (events, callback) = recorder();
        let _watch = input.watch(callback).unwrap();

        sim.set_level(4, false);
        gpio.advance(Duration::from_secs(5)).unwrap();
        assert!(events.borrow().is_empty());
        assert_eq!(sim.read_count(), 50);
    }

    #[test]
    fn test_glitch_between_polls_is_invisible() {
        let (gpio, sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let (events, callback) = recorder();
        let _watch = input.watch(callback).unwrap();

        gpio.advance(Duration::from_millis(120)).unwrap();
        sim.set_level(4, true);
        gpio.advance(Duration::from_millis(10)).unwrap();
        sim.set_level(4, false);
        gpio.advance(Duration::from_millis(500)).unwrap();
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_edges_are_delivered_after_the_poll_tick() {
        let (gpio, sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let (events, callback) = recorder();
        let _watch = input.watch(callback).unwrap();

        sim.set_level(4, true);
        assert!(gpio.step().unwrap());
        assert!(events.borrow().is_empty());
        assert!(gpio.step().unwrap());
        assert_eq!(*events.borrow(), vec![(true, 7)]);
    }

    #[test]
    fn test_unwatch_stops_delivery() {
        let (gpio, sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let (events, callback) = recorder();
        let watch = input.watch(callback).unwrap();

        sim.set_level(4, true);
        gpio.advance(Duration::from_millis(100)).unwrap();
        assert_eq!(events.borrow().len(), 1);

        watch.unwatch();
        watch.unwatch();
        assert!(!watch.is_active());
        assert_eq!(gpio.watcher_count(7), 0);

        for n in 0..10 {
            sim.set_level(4, n % 2 == 0);
            gpio.advance(Duration::from_millis(100)).unwrap();
        }
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn test_unwatch_keeps_already_queued_delivery() {
        let (gpio, sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let (events, callback) = recorder();
        let watch = input.watch(callback).unwrap();

        sim.set_level(4, true);
        assert!(gpio.step().unwrap());
        watch.unwatch();
        gpio.run_pending().unwrap();
        assert_eq!(*events.borrow(), vec![(true, 7)]);
    }

    #[test]
    fn test_watchers_are_independent() {
        let (gpio, sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let (fast_events, fast) = recorder();
        let (slow_events, slow) = recorder();
        let fast_watch = input
            .watch_with(fast, WatchOptions::default().with_poll_interval(Duration::from_millis(10)))
            .unwrap();
        let _slow_watch = input
            .watch_with(slow, WatchOptions::default().with_poll_interval(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(gpio.watcher_count(7), 2);

        sim.set_level(4, true);
        gpio.advance(Duration::from_millis(100)).unwrap();
        fast_watch.unwatch();
        assert_eq!(gpio.watcher_count(7), 1);

        sim.set_level(4, false);
        gpio.advance(Duration::from_millis(100)).unwrap();

        assert_eq!(*fast_events.borrow(), vec![(true, 7)]);
        assert_eq!(*slow_events.borrow(), vec![(true, 7), (false, 7)]);
    }

    #[test]
    fn test_already_high_pin_reports_rising_first() {
        let (gpio, sim) = sim();
        sim.set_level(4, true);
        let input = gpio.acquire_input(7, Pull::Up).unwrap();
        let (events, callback) = recorder();
        let _watch = input.watch(callback).unwrap();
        gpio.advance(Duration::from_millis(100)).unwrap();
        assert_eq!(*events.borrow(), vec![(true, 7)]);
    }

    #[test]
    fn test_release_drops_watchers() {
        let (gpio, sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let (events, callback) = recorder();
        let watch = input.watch(callback).unwrap();

        gpio.release(7).unwrap();
        assert_eq!(gpio.watcher_count(7), 0);
        assert!(!watch.is_active());

        sim.set_level(4, true);
        gpio.advance(Duration::from_secs(1)).unwrap();
        assert!(events.borrow().is_empty());
        assert_eq!(gpio.pending(), 0);
    }

    #[test]
    fn test_watch_requires_input_owner() {
        let (gpio, _sim) = sim();
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        gpio.release(7).unwrap();
        assert!(matches!(
            input.watch(|_, _| {}),
            Err(GpioError::NotOwned { pin: 7, .. })
        ));

        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        let zero = WatchOptions::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(
            input.watch_with(|_, _| {}, zero),
            Err(GpioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_watch_all_and_unwatch_all() {
        let (gpio, sim) = sim();
        let _a = gpio.acquire_input(7, Pull::Off).unwrap();
        let _b = gpio.acquire_input(11, Pull::Off).unwrap();
        let _out = gpio.acquire_output(13, false).unwrap();
        let (events, callback) = recorder();
        let set = gpio.watch_all(callback, WatchOptions::default()).unwrap();
        assert_eq!(set.len(), 2);

        sim.set_level(4, true);
        sim.set_level(17, true);
        gpio.advance(Duration::from_millis(100)).unwrap();
        let mut seen = events.borrow().clone();
        seen.sort();
        assert_eq!(seen, vec![(true, 7), (true, 11)]);

        assert_eq!(gpio.unwatch_all(7).unwrap(), 1);
        set.unwatch();
        assert_eq!(gpio.watcher_count(11), 0);
    }

    #[test]
    fn test_close_releases_everything() {
        let (gpio, sim) = sim();
        let input = gpio.acquire_input(7, Pull::Up).unwrap();
        let _watch = input.watch(|_, _| {}).unwrap();
        let output = gpio.acquire_output(11, true).unwrap();
        output.off_after(Duration::from_millis(100)).unwrap();

        gpio.close();
        assert_eq!(gpio.access_mode(), None);
        assert_eq!(sim.access(), None);
        assert_eq!(gpio.watcher_count(7), 0);
        assert_eq!(gpio.pending(), 0);
        assert!(output.state().is_err());

        gpio.acquire_output(11, false).unwrap();
        assert_eq!(gpio.access_mode(), Some(AccessMode::Restricted));
    }

    #[test]
    fn test_dropping_context_closes_access() {
        let (gpio, sim) = sim();
        {
            let _out = gpio.acquire_output(11, true).unwrap();
        }
        drop(gpio);
        assert_eq!(sim.access(), None);
    }

    #[test]
    fn test_callbacks_cannot_drive_the_clock() {
        let (gpio, _sim) = sim();
        let inner = gpio.clone();
        let result = Rc::new(RefCell::new(None));
        let seen = Rc::clone(&result);
        gpio.defer(move |_| {
            *seen.borrow_mut() = Some(inner.advance(Duration::from_millis(1)).is_err());
            Ok(())
        });
        gpio.run_pending().unwrap();
        assert_eq!(*result.borrow(), Some(true));
    }
}
