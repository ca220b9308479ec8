//! Real-time runner
//!
//! Maps the context's virtual clock onto tokio time: the loop sleeps until the
//! next scheduled deadline, then runs everything due. It must run on a
//! current-thread runtime or inside a `LocalSet`, since the context is `!Send`.

use crate::error::Result;
use crate::gpio::Gpio;
use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Upper bound on a single sleep when nothing is scheduled
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Drive `gpio` in real time until `shutdown` completes
///
/// Returns the first error raised by a scheduled task.
pub async fn run_until<F>(gpio: &Gpio, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let start = Instant::now();
    let origin = gpio.now();
    tokio::pin!(shutdown);

    loop {
        gpio.advance_to(origin + start.elapsed())?;
        let wait = gpio
            .next_deadline()
            .map(|due| due.saturating_sub(gpio.now()))
            .unwrap_or(IDLE_WAIT)
            .min(IDLE_WAIT);

        tokio::select! {
            _ = &mut shutdown => {
                gpio.advance_to(origin + start.elapsed())?;
                debug!("Runner stopped at {:?}", gpio.now());
                return Ok(());
            }
            _ = sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Pull;
    use crate::gpio::GpioSettings;
    use crate::watch::WatchOptions;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[tokio::test(start_paused = true)]
    async fn test_watch_in_real_time() {
        let (gpio, sim) = Gpio::simulated(GpioSettings::default());
        let input = gpio.acquire_input(7, Pull::Off).unwrap();
        sim.set_level(4, true);

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let _watch = input
            .watch_with(
                move |level, pin| sink.borrow_mut().push((level, pin)),
                WatchOptions::default().with_poll_interval(Duration::from_millis(50)),
            )
            .unwrap();

        run_until(&gpio, sleep(Duration::from_millis(120))).await.unwrap();
        assert_eq!(*events.borrow(), vec![(true, 7)]);
        assert!(gpio.now() >= Duration::from_millis(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_write_in_real_time() {
        let (gpio, sim) = Gpio::simulated(GpioSettings::default());
        let out = gpio.acquire_output(11, false).unwrap();
        out.pulse(Duration::from_millis(30)).unwrap();

        run_until(&gpio, sleep(Duration::from_millis(10))).await.unwrap();
        assert!(sim.level(17));
        run_until(&gpio, sleep(Duration::from_millis(40))).await.unwrap();
        assert!(!sim.level(17));
    }
}
