//! Polled edge detection
//!
//! Each watcher polls one input pin on its own recurring scheduler task and
//! keeps its own last-observed level, so watchers on the same pin see the same
//! edges but never share state. Edges are delivered through a zero-delay
//! task, never inline with the poll tick.
//!
//! A level change that reverts between two polls is not observed.
//! Unregistering stops future polls but does not retract a delivery already
//! queued by the last tick.

use crate::error::{GpioError, Result};
use crate::gpio::{Gpio, WeakGpio};
use crate::scheduler::CancelToken;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Callback receiving `(level, header pin)` for each reported edge
pub type WatchCallback = Rc<RefCell<dyn FnMut(bool, u8)>>;

/// Which transitions a watcher reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeFilter {
    /// Low to high only
    Rising,
    /// High to low only
    Falling,
    #[default]
    Both,
}

impl fmt::Display for EdgeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeFilter::Rising => write!(f, "rising"),
            EdgeFilter::Falling => write!(f, "falling"),
            EdgeFilter::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for EdgeFilter {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rising" => Ok(EdgeFilter::Rising),
            "falling" => Ok(EdgeFilter::Falling),
            "both" => Ok(EdgeFilter::Both),
            other => Err(GpioError::invalid_argument(format!(
                "unknown edge filter '{}', expected rising, falling or both",
                other
            ))),
        }
    }
}

/// Per-watcher options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub edge: EdgeFilter,
    pub poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            edge: EdgeFilter::Both,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WatchOptions {
    pub fn with_edge(mut self, edge: EdgeFilter) -> Self {
        self.edge = edge;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Edge-detection state of one watcher
#[derive(Debug)]
pub(crate) struct Watcher {
    id: u64,
    on: Cell<bool>,
    edge: EdgeFilter,
    token: CancelToken,
}

impl Watcher {
    pub(crate) fn new(id: u64, edge: EdgeFilter) -> Rc<Self> {
        Rc::new(Self {
            id,
            on: Cell::new(false),
            edge,
            token: CancelToken::new(),
        })
    }

    pub(crate) fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Feed one polled level; returns the edge to report, if any
    pub(crate) fn observe(&self, level: bool) -> Option<bool> {
        if level == self.on.get() {
            return None;
        }
        self.on.set(level);
        let report = match self.edge {
            EdgeFilter::Both => true,
            EdgeFilter::Rising => level,
            EdgeFilter::Falling => !level,
        };
        report.then_some(level)
    }
}

/// Active watchers by header pin
#[derive(Debug, Default)]
pub(crate) struct WatchTable {
    next_id: u64,
    by_pin: HashMap<u8, Vec<Rc<Watcher>>>,
}

impl WatchTable {
    pub(crate) fn create(&mut self, pin: u8, edge: EdgeFilter) -> Rc<Watcher> {
        self.next_id += 1;
        let watcher = Watcher::new(self.next_id, edge);
        self.by_pin
            .entry(pin)
            .or_default()
            .push(Rc::clone(&watcher));
        watcher
    }

    /// Stop and remove one watcher; false if it was already gone
    pub(crate) fn remove(&mut self, pin: u8, id: u64) -> bool {
        let Some(watchers) = self.by_pin.get_mut(&pin) else {
            return false;
        };
        let before = watchers.len();
        watchers.retain(|w| {
            if w.id == id {
                w.token.cancel();
                false
            } else {
                true
            }
        });
        let removed = watchers.len() != before;
        if watchers.is_empty() {
            self.by_pin.remove(&pin);
        }
        removed
    }

    /// Stop and remove every watcher on `pin`, returning how many there were
    pub(crate) fn remove_all(&mut self, pin: u8) -> usize {
        let watchers = self.by_pin.remove(&pin).unwrap_or_default();
        for watcher in &watchers {
            watcher.token.cancel();
        }
        watchers.len()
    }

    pub(crate) fn count(&self, pin: u8) -> usize {
        self.by_pin.get(&pin).map_or(0, Vec::len)
    }
}

/// Unregister handle returned by `watch`
///
/// [`Unwatch::unwatch`] is idempotent. Dropping the handle leaves the watcher
/// running; it then lives until its pin is released or
/// [`Gpio::unwatch_all`] is called.
#[must_use = "dropping an Unwatch leaves the watcher running"]
pub struct Unwatch {
    pin: u8,
    id: u64,
    token: CancelToken,
    gpio: WeakGpio,
}

impl Unwatch {
    pub(crate) fn new(pin: u8, watcher: &Watcher, gpio: &Gpio) -> Self {
        Self {
            pin,
            id: watcher.id,
            token: watcher.token(),
            gpio: gpio.downgrade(),
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stop polling and remove the watcher from its pin
    pub fn unwatch(&self) {
        self.token.cancel();
        if let Some(gpio) = self.gpio.upgrade() {
            gpio.remove_watcher(self.pin, self.id);
        }
    }
}

impl fmt::Debug for Unwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unwatch")
            .field("pin", &self.pin)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Several watchers unregistered together
#[derive(Debug, Default)]
#[must_use = "dropping a WatchSet leaves its watchers running"]
pub struct WatchSet {
    watches: Vec<Unwatch>,
}

impl WatchSet {
    pub(crate) fn new(watches: Vec<Unwatch>) -> Self {
        Self { watches }
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn unwatch(&self) {
        for watch in &self.watches {
            watch.unwatch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(watcher: &Watcher, levels: &[bool]) -> Vec<bool> {
        levels.iter().filter_map(|l| watcher.observe(*l)).collect()
    }

    #[test]
    fn test_observe_both() {
        let watcher = Watcher::new(1, EdgeFilter::Both);
        assert_eq!(
            feed(&watcher, &[false, false, true, true, false]),
            vec![true, false]
        );
    }

    #[test]
    fn test_observe_filters() {
        let rising = Watcher::new(1, EdgeFilter::Rising);
        let falling = Watcher::new(2, EdgeFilter::Falling);
        let levels = [false, true, false, true, true, false];

        assert_eq!(feed(&rising, &levels), vec![true, true]);
        assert_eq!(feed(&falling, &levels), vec![false, false]);
    }

    #[test]
    fn test_filtered_edges_still_track_level() {
        let falling = Watcher::new(1, EdgeFilter::Falling);
        assert_eq!(falling.observe(true), None);
        assert_eq!(falling.observe(true), None);
        assert_eq!(falling.observe(false), Some(false));
    }

    #[test]
    fn test_table_remove() {
        let mut table = WatchTable::default();
        let a = table.create(7, EdgeFilter::Both);
        let b = table.create(7, EdgeFilter::Rising);
        table.create(11, EdgeFilter::Both);
        assert_eq!(table.count(7), 2);

        assert!(table.remove(7, a.id));
        assert!(!table.remove(7, a.id));
        assert!(a.token.is_cancelled());
        assert!(!b.token.is_cancelled());
        assert_eq!(table.count(7), 1);

        assert_eq!(table.remove_all(7), 1);
        assert!(b.token.is_cancelled());
        assert_eq!(table.count(7), 0);
        assert_eq!(table.count(11), 1);
    }

    #[test]
    fn test_parse_edge_filter() {
        assert_eq!("Rising".parse::<EdgeFilter>().unwrap(), EdgeFilter::Rising);
        assert_eq!("both".parse::<EdgeFilter>().unwrap(), EdgeFilter::Both);
        assert!("sideways".parse::<EdgeFilter>().is_err());
    }
}
