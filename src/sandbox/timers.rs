use crate::error::{Error, Result};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Drain bound: a timer chain longer than this is assumed to be
/// rescheduling itself forever.
const MAX_TIMER_LOOPS: usize = 100_000;

struct Timer {
    id: u64,
    delay: u64,
    callback: Value,
}

struct TimerState {
    fake: Cell<bool>,
    next_id: Cell<u64>,
    ticks: RefCell<Vec<Value>>,
    immediates: RefCell<Vec<Value>>,
    timers: RefCell<Vec<Timer>>,
}

/// Fake-timer subsystem of the sandbox environment. Cloning shares the
/// queues, so a handle captured by a global entry point stays in sync.
#[derive(Clone)]
pub struct FakeTimers {
    state: Rc<TimerState>,
}

impl FakeTimers {
    pub fn new() -> Self {
        Self {
            state: Rc::new(TimerState {
                fake: Cell::new(false),
                next_id: Cell::new(1),
                ticks: RefCell::new(Vec::new()),
                immediates: RefCell::new(Vec::new()),
                timers: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn use_fake_timers(&self) {
        self.state.fake.set(true);
    }

    pub fn use_real_timers(&self) {
        self.state.fake.set(false);
    }

    pub fn is_fake(&self) -> bool {
        self.state.fake.get()
    }

    pub fn schedule_tick(&self, callback: Value) {
        self.state.ticks.borrow_mut().push(callback);
    }

    pub fn schedule_immediate(&self, callback: Value) {
        self.state.immediates.borrow_mut().push(callback);
    }

    pub fn schedule_timer(&self, callback: Value, delay: u64) -> u64 {
        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);
        self.state.timers.borrow_mut().push(Timer {
            id,
            delay,
            callback,
        });
        id
    }

    pub fn clear_timer(&self, id: u64) {
        self.state.timers.borrow_mut().retain(|t| t.id != id);
    }

    pub fn clear_all_timers(&self) {
        self.state.ticks.borrow_mut().clear();
        self.state.immediates.borrow_mut().clear();
        self.state.timers.borrow_mut().clear();
    }

    pub fn pending_timer_count(&self) -> usize {
        self.state.timers.borrow().len()
    }

    pub fn run_all_ticks(&self) -> Result<usize> {
        self.drain_queue(&self.state.ticks)
    }

    pub fn run_all_immediates(&self) -> Result<usize> {
        self.drain_queue(&self.state.immediates)
    }

    fn drain_queue(&self, queue: &RefCell<Vec<Value>>) -> Result<usize> {
        let mut ran = 0;
        loop {
            let next = {
                let mut queue = queue.borrow_mut();
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            };
            match next {
                Some(callback) => {
                    callback.call(&[])?;
                    ran += 1;
                }
                None => return Ok(ran),
            }
        }
    }

    /// Run timers in delay order until none remain. Callbacks may
    /// schedule further timers; those run in the same drain.
    pub fn run_all_timers(&self) -> Result<usize> {
        let mut ran = 0;
        while let Some(callback) = self.take_next_timer(None) {
            if ran >= MAX_TIMER_LOOPS {
                return Err(Error::execution(format!(
                    "ran {} timers without draining the queue; a timer appears to reschedule itself forever",
                    MAX_TIMER_LOOPS
                )));
            }
            callback.call(&[])?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Run only the timers pending at entry; timers their callbacks
    /// schedule stay queued for the next drain.
    pub fn run_only_pending_timers(&self) -> Result<usize> {
        let mut pending: Vec<(u64, u64)> = self
            .state
            .timers
            .borrow()
            .iter()
            .map(|t| (t.delay, t.id))
            .collect();
        pending.sort_unstable();
        let mut ran = 0;
        for (_, id) in pending {
            if let Some(callback) = self.take_next_timer(Some(id)) {
                callback.call(&[])?;
                ran += 1;
            }
        }
        Ok(ran)
    }

    /// Remove and return the next timer callback: lowest delay, then
    /// insertion order. With `only`, that exact timer (it may have been
    /// cleared by an earlier callback).
    fn take_next_timer(&self, only: Option<u64>) -> Option<Value> {
        let mut timers = self.state.timers.borrow_mut();
        let position = match only {
            Some(id) => timers.iter().position(|t| t.id == id),
            None => {
                let mut best: Option<usize> = None;
                for (i, timer) in timers.iter().enumerate() {
                    let better = match best {
                        None => true,
                        Some(b) => {
                            (timer.delay, timer.id) < (timers[b].delay, timers[b].id)
                        }
                    };
                    if better {
                        best = Some(i);
                    }
                }
                best
            }
        };
        position.map(|i| timers.remove(i).callback)
    }
}

impl Default for FakeTimers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<u64>>>, impl Fn(u64) -> Value) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_for_cb = log.clone();
        (log, move |tag| {
            let log = log_for_cb.clone();
            Value::function("cb", move |_| {
                log.borrow_mut().push(tag);
                Ok(Value::Undefined)
            })
        })
    }

    #[test]
    fn test_run_all_timers_in_delay_order() {
        let timers = FakeTimers::new();
        let (log, cb) = recorder();
        timers.schedule_timer(cb(2), 50);
        timers.schedule_timer(cb(1), 10);
        timers.schedule_timer(cb(3), 50);

        assert_eq!(timers.run_all_timers().unwrap(), 3);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert_eq!(timers.pending_timer_count(), 0);
    }

    #[test]
    fn test_run_only_pending_skips_newly_scheduled() {
        let timers = FakeTimers::new();
        let (log, cb) = recorder();

        let inner = cb(2);
        let timers_for_cb = timers.clone();
        let log_for_cb = log.clone();
        timers.schedule_timer(
            Value::function("outer", move |_| {
                log_for_cb.borrow_mut().push(1);
                timers_for_cb.schedule_timer(inner.clone(), 0);
                Ok(Value::Undefined)
            }),
            5,
        );

        assert_eq!(timers.run_only_pending_timers().unwrap(), 1);
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(timers.pending_timer_count(), 1, "inner timer still queued");
    }

    #[test]
    fn test_clear_all_timers_empties_queues() {
        let timers = FakeTimers::new();
        let (_, cb) = recorder();
        timers.schedule_timer(cb(1), 0);
        timers.schedule_tick(cb(2));
        timers.clear_all_timers();
        assert_eq!(timers.run_all_timers().unwrap(), 0);
        assert_eq!(timers.run_all_ticks().unwrap(), 0);
    }

    #[test]
    fn test_ticks_drain_in_order() {
        let timers = FakeTimers::new();
        let (log, cb) = recorder();
        timers.schedule_tick(cb(1));
        timers.schedule_tick(cb(2));
        assert_eq!(timers.run_all_ticks().unwrap(), 2);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }
}
