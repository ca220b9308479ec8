use super::InputPin;
use crate::error::Result;
use crate::watch::{WatchCallback, WatchOptions, WatchSet};
use std::cell::RefCell;
use std::rc::Rc;

/// Inputs acquired together
#[derive(Debug, Clone, Default)]
pub struct InputGroup {
    pins: Vec<InputPin>,
}

impl InputGroup {
    /// Repeated pins collapse to one member
    pub(crate) fn new(pins: Vec<InputPin>) -> Self {
        let mut unique: Vec<InputPin> = Vec::with_capacity(pins.len());
        for pin in pins {
            if !unique.iter().any(|p| p.ptr_eq(&pin)) {
                unique.push(pin);
            }
        }
        Self { pins: unique }
    }

    pub fn pins(&self) -> &[InputPin] {
        &self.pins
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Member on header position `pin`
    pub fn get(&self, pin: u8) -> Option<&InputPin> {
        self.pins.iter().find(|p| p.pin() == pin)
    }

    /// `(header pin, level)` for every member
    pub fn states(&self) -> Result<Vec<(u8, bool)>> {
        self.pins
            .iter()
            .map(|p| Ok((p.pin(), p.state()?)))
            .collect()
    }

    /// Watch every member with one shared callback
    pub fn watch_all<F>(&self, callback: F, options: WatchOptions) -> Result<WatchSet>
    where
        F: FnMut(bool, u8) + 'static,
    {
        let callback: WatchCallback = Rc::new(RefCell::new(callback));
        let gpio = match self.pins.first() {
            Some(first) => first.gpio().clone(),
            None => return Ok(WatchSet::default()),
        };
        let watches = self
            .pins
            .iter()
            .map(|p| gpio.watch_slot(p.slot(), Rc::clone(&callback), options))
            .collect::<Result<Vec<_>>>()?;
        Ok(WatchSet::new(watches))
    }

    /// Stop every watcher on every member, returning how many were stopped
    pub fn unwatch_all(&self) -> Result<usize> {
        self.pins.iter().map(InputPin::unwatch).sum()
    }

    /// Release every member that is still open
    pub fn close_all(&self) -> Result<()> {
        for pin in self.pins.iter().filter(|p| p.is_open()) {
            pin.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::Pull;
    use crate::gpio::{Gpio, GpioSettings};
    use crate::registry::PinRole;
    use crate::watch::WatchOptions;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn test_group_watch_and_close() {
        let (gpio, sim) = Gpio::simulated(GpioSettings::default());
        let group = gpio.acquire_inputs(&[7, 11, 7], Pull::Down).unwrap();
        assert_eq!(group.len(), 2);

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let _set = group
            .watch_all(
                move |level, pin| sink.borrow_mut().push((level, pin)),
                WatchOptions::default().with_poll_interval(Duration::from_millis(20)),
            )
            .unwrap();

        sim.set_level(17, true);
        gpio.advance(Duration::from_millis(20)).unwrap();
        assert_eq!(*events.borrow(), vec![(true, 11)]);
        assert_eq!(
            group.states().unwrap(),
            vec![(7, false), (11, true)]
        );

        assert_eq!(group.unwatch_all().unwrap(), 2);
        group.close_all().unwrap();
        assert_eq!(gpio.role_of(11).unwrap(), PinRole::Input);
        assert!(group.get(7).map_or(false, |p| !p.is_open()));
    }
}
