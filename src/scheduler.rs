//! Virtual-clock task scheduler
//!
//! Every source of suspension (watch polling, delayed writes, pulse ends and
//! asynchronous callback delivery) is a task in this queue. Tasks run on the
//! caller's thread, one at a time, in `(due, enqueue order)` order, so no two
//! callbacks ever overlap and zero-delay tasks are delivered FIFO.
//!
//! The clock only moves when the owner calls [`Scheduler::run_until`] or
//! [`Scheduler::step`]; the tokio runner in [`crate::runtime`] maps it onto
//! wall time.

use crate::error::Result;
use log::error;
use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Shared cancellation flag
///
/// Cloning yields a token observing the same flag. Cancelling stops tasks that
/// have not started yet; it never interrupts one that is running.
#[derive(Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelToken").field(&self.is_cancelled()).finish()
    }
}

enum Task<C> {
    Once(Box<dyn FnOnce(&C) -> Result<()>>),
    Repeat {
        period: Duration,
        run: Box<dyn FnMut(&C) -> Result<()>>,
    },
}

struct Scheduled<C> {
    task: Task<C>,
    token: CancelToken,
}

/// Queue of delayed and recurring tasks run against a context `C`
pub struct Scheduler<C> {
    now: Cell<Duration>,
    seq: Cell<u64>,
    queue: RefCell<BinaryHeap<Reverse<(Duration, u64)>>>,
    tasks: RefCell<HashMap<u64, Scheduled<C>>>,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            seq: Cell::new(0),
            queue: RefCell::new(BinaryHeap::new()),
            tasks: RefCell::new(HashMap::new()),
        }
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Number of queued tasks that have not been cancelled
    pub fn pending(&self) -> usize {
        self.tasks
            .borrow()
            .values()
            .filter(|s| !s.token.is_cancelled())
            .count()
    }

    /// Due time of the earliest live task
    pub fn next_deadline(&self) -> Option<Duration> {
        self.purge_cancelled_head();
        self.queue.borrow().peek().map(|Reverse((due, _))| *due)
    }

    /// Run `task` once, `delay` from now, unless `token` is cancelled first
    pub fn schedule<F>(&self, delay: Duration, token: CancelToken, task: F)
    where
        F: FnOnce(&C) -> Result<()> + 'static,
    {
        self.push(
            self.now() + delay,
            Scheduled {
                task: Task::Once(Box::new(task)),
                token,
            },
        );
    }

    /// Run `task` every `period`, first at now + `period`, until `token` is cancelled
    pub fn schedule_repeating<F>(&self, period: Duration, token: CancelToken, task: F)
    where
        F: FnMut(&C) -> Result<()> + 'static,
    {
        self.push(
            self.now() + period,
            Scheduled {
                task: Task::Repeat {
                    period,
                    run: Box::new(task),
                },
                token,
            },
        );
    }

    /// Run `task` at the current time, after everything already due
    pub fn defer<F>(&self, task: F)
    where
        F: FnOnce(&C) -> Result<()> + 'static,
    {
        self.schedule(Duration::ZERO, CancelToken::new(), task);
    }

    /// Run every task due at or before `limit`, then move the clock to `limit`
    ///
    /// Returns the number of tasks run. A failing task stops the run with the
    /// clock left at that task's due time.
    pub fn run_until(&self, ctx: &C, limit: Duration) -> Result<usize> {
        let mut ran = 0;
        while let Some((due, scheduled)) = self.pop_due(limit) {
            self.run_task(ctx, due, scheduled)?;
            ran += 1;
        }
        if limit > self.now() {
            self.now.set(limit);
        }
        Ok(ran)
    }

    /// Run only the earliest live task, moving the clock to its due time
    pub fn step(&self, ctx: &C) -> Result<bool> {
        match self.pop_due(Duration::MAX) {
            Some((due, scheduled)) => {
                self.run_task(ctx, due, scheduled)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop every queued task
    pub fn clear(&self) {
        for scheduled in self.tasks.borrow().values() {
            scheduled.token.cancel();
        }
        self.tasks.borrow_mut().clear();
        self.queue.borrow_mut().clear();
    }

    fn push(&self, due: Duration, scheduled: Scheduled<C>) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.tasks.borrow_mut().insert(seq, scheduled);
        self.queue.borrow_mut().push(Reverse((due, seq)));
    }

    fn purge_cancelled_head(&self) {
        let mut queue = self.queue.borrow_mut();
        let mut tasks = self.tasks.borrow_mut();
        while let Some(Reverse((_, seq))) = queue.peek().copied() {
            match tasks.get(&seq) {
                Some(s) if !s.token.is_cancelled() => break,
                _ => {
                    queue.pop();
                    tasks.remove(&seq);
                }
            }
        }
    }

    fn pop_due(&self, limit: Duration) -> Option<(Duration, Scheduled<C>)> {
        self.purge_cancelled_head();
        let mut queue = self.queue.borrow_mut();
        let Reverse((due, seq)) = *queue.peek()?;
        if due > limit {
            return None;
        }
        queue.pop();
        let scheduled = self.tasks.borrow_mut().remove(&seq)?;
        if due > self.now() {
            self.now.set(due);
        }
        Some((due, scheduled))
    }

    fn run_task(&self, ctx: &C, due: Duration, scheduled: Scheduled<C>) -> Result<()> {
        let Scheduled { task, token } = scheduled;
        let result = match task {
            Task::Once(run) => run(ctx),
            Task::Repeat { period, mut run } => {
                let result = run(ctx);
                if result.is_ok() && !token.is_cancelled() {
                    self.push(
                        due + period,
                        Scheduled {
                            task: Task::Repeat { period, run },
                            token,
                        },
                    );
                }
                result
            }
        };
        if let Err(ref e) = result {
            error!("Scheduled task due at {:?} failed: {}", due, e);
        }
        result
    }
}
