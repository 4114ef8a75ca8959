//! Cancellable one-shot and repeating timers for the single-threaded event loop.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to; drives timers deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

pub struct Timer {
    deadline: Cell<Instant>,
    period: Duration,
    repeat: bool,
    cancelled: Cell<bool>,
    expired: Cell<bool>,
    callback: RefCell<Box<dyn FnMut()>>,
}

impl Timer {
    /// Stops the timer. Safe to call any number of times, including from its own callback.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    /// Still waiting to fire.
    pub fn is_armed(&self) -> bool {
        !self.cancelled.get() && !self.expired.get()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline.get()
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("deadline", &self.deadline.get())
            .field("period", &self.period)
            .field("repeat", &self.repeat)
            .field("cancelled", &self.cancelled.get())
            .field("expired", &self.expired.get())
            .finish()
    }
}

pub struct TimerQueue {
    clock: Rc<dyn Clock>,
    timers: RefCell<Vec<Rc<Timer>>>,
}

impl TimerQueue {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            timers: RefCell::new(Vec::new()),
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn add_timer(
        &self,
        delay: Duration,
        repeat: bool,
        callback: impl FnMut() + 'static,
    ) -> Rc<Timer> {
        let timer = Rc::new(Timer {
            deadline: Cell::new(self.clock.now() + delay),
            period: delay,
            repeat,
            cancelled: Cell::new(false),
            expired: Cell::new(false),
            callback: RefCell::new(Box::new(callback)),
        });
        self.timers.borrow_mut().push(Rc::clone(&timer));
        timer
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .borrow()
            .iter()
            .filter(|t| t.is_armed())
            .map(|t| t.deadline())
            .min()
    }

    /// Number of timers still waiting to fire.
    pub fn armed(&self) -> usize {
        self.timers.borrow().iter().filter(|t| t.is_armed()).count()
    }

    /// Runs every timer whose deadline has passed. Callbacks may add or
    /// cancel timers; timers added while firing wait for the next call.
    pub fn fire_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<Rc<Timer>> = {
            let mut timers = self.timers.borrow_mut();
            timers.retain(|t| !t.is_cancelled());
            let (mut due, pending): (Vec<_>, Vec<_>) =
                timers.drain(..).partition(|t| t.deadline() <= now);
            *timers = pending;
            due.sort_by_key(|t| t.deadline());
            due
        };

        let mut fired = 0;
        for timer in due {
            if timer.is_cancelled() {
                continue;
            }
            if !timer.repeat {
                timer.expired.set(true);
            }
            {
                let mut callback = timer.callback.borrow_mut();
                (*callback)();
            }
            fired += 1;
            if timer.repeat && !timer.is_cancelled() {
                timer.deadline.set(now + timer.period);
                self.timers.borrow_mut().push(timer);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (Rc<ManualClock>, TimerQueue) {
        let clock = Rc::new(ManualClock::new());
        let queue = TimerQueue::new(clock.clone());
        (clock, queue)
    }

    #[test]
    fn one_shot_fires_once_after_deadline() {
        let (clock, queue) = queue();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let timer = queue.add_timer(Duration::from_millis(50), false, move || {
            counter.set(counter.get() + 1)
        });

        clock.advance(Duration::from_millis(49));
        assert_eq!(queue.fire_due(), 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(queue.fire_due(), 1);
        clock.advance(Duration::from_secs(1));
        assert_eq!(queue.fire_due(), 0);
        assert_eq!(hits.get(), 1);
        assert!(!timer.is_armed());
    }

    #[test]
    fn cancel_is_idempotent() {
        let (clock, queue) = queue();
        let timer = queue.add_timer(Duration::from_millis(10), false, || panic!("cancelled"));
        timer.cancel();
        timer.cancel();
        clock.advance(Duration::from_millis(20));
        assert_eq!(queue.fire_due(), 0);
        assert_eq!(queue.armed(), 0);
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn repeating_timer_reschedules() {
        let (clock, queue) = queue();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let _timer = queue.add_timer(Duration::from_millis(10), true, move || {
            counter.set(counter.get() + 1)
        });
        for _ in 0..3 {
            clock.advance(Duration::from_millis(10));
            queue.fire_due();
        }
        assert_eq!(hits.get(), 3);
        assert_eq!(queue.armed(), 1);
    }

    #[test]
    fn callback_can_plant_follow_up_timer() {
        let (clock, queue) = queue();
        let queue = Rc::new(queue);
        let hits = Rc::new(Cell::new(0));
        let (q, counter) = (Rc::downgrade(&queue), hits.clone());
        queue.add_timer(Duration::from_millis(5), false, move || {
            counter.set(counter.get() + 1);
            if let Some(q) = q.upgrade() {
                let counter = counter.clone();
                q.add_timer(Duration::from_millis(5), false, move || {
                    counter.set(counter.get() + 1)
                });
            }
        });

        clock.advance(Duration::from_millis(5));
        assert_eq!(queue.fire_due(), 1);
        assert_eq!(queue.armed(), 1);
        clock.advance(Duration::from_millis(5));
        assert_eq!(queue.fire_due(), 1);
        assert_eq!(hits.get(), 2);
    }
}
