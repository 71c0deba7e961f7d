use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Opaque handle for cancelling an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Timer callbacks run to completion on the event-loop thread and must not
/// block it.
pub type TimerCallback = Rc<RefCell<dyn FnMut()>>;

struct TimerEntry {
    id: TimerId,
    deadline: Instant,
    period: Option<Duration>,
    callback: TimerCallback,
}

/// One-shot and periodic timers for the single-threaded event loop.
///
/// The wheel only tracks deadlines; the loop asks for [`TimerWheel::due`]
/// callbacks and runs them itself, so no borrow of the wheel is held while
/// user code executes (callbacks may re-arm or cancel freely).
pub struct TimerWheel {
    next_id: u64,
    entries: Vec<TimerEntry>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    /// Arm a timer that fires once after `after`.
    pub fn arm_oneshot(&mut self, after: Duration, callback: TimerCallback) -> TimerId {
        self.arm(after, None, callback)
    }

    /// Arm a timer that fires every `every` until cancelled.
    pub fn arm_periodic(&mut self, every: Duration, callback: TimerCallback) -> TimerId {
        self.arm(every, Some(every), callback)
    }

    fn arm(
        &mut self,
        after: Duration,
        period: Option<Duration>,
        callback: TimerCallback,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(TimerEntry {
            id,
            deadline: Instant::now() + after,
            period,
            callback,
        });
        id
    }

    /// Cancel by handle. Returns false if the timer already fired (one-shot)
    /// or was never armed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Remove (or reschedule, for periodic timers) every entry due at `now`
    /// and return its callback. The caller invokes them after this borrow
    /// ends.
    pub fn due(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut fired = Vec::new();
        self.entries.retain_mut(|entry| {
            if entry.deadline > now {
                return true;
            }
            fired.push(Rc::clone(&entry.callback));
            match entry.period {
                Some(period) => {
                    entry.deadline = now + period;
                    true
                }
                None => false,
            }
        });
        fired
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle to the wheel; this is the timer facility handed to
/// drivers for their ACK timeouts.
#[derive(Clone)]
pub struct TimerHandle(Rc<RefCell<TimerWheel>>);

impl TimerHandle {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(TimerWheel::new())))
    }

    pub fn arm_oneshot(&self, after: Duration, callback: TimerCallback) -> TimerId {
        self.0.borrow_mut().arm_oneshot(after, callback)
    }

    pub fn arm_periodic(&self, every: Duration, callback: TimerCallback) -> TimerId {
        self.0.borrow_mut().arm_periodic(every, callback)
    }

    pub fn cancel(&self, id: TimerId) -> bool {
        self.0.borrow_mut().cancel(id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.0.borrow().next_deadline()
    }

    pub fn pending(&self) -> usize {
        self.0.borrow().len()
    }

    /// Fire every timer due at `now`; returns how many fired. The wheel
    /// borrow is released before any callback runs.
    pub fn fire_due(&self, now: Instant) -> usize {
        let callbacks = self.0.borrow_mut().due(now);
        let fired = callbacks.len();
        for callback in callbacks {
            (callback.borrow_mut())();
        }
        fired
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}
