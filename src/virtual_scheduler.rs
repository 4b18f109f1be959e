use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Mutex, PoisonError},
    time::Duration,
};

use crate::scheduler::Scheduler;
use crate::step::panic_message;

type ScheduledTask = Box<dyn FnOnce() + Send>;

/// Deterministic replacement for wall-clock scheduling.
///
/// Holds a virtual clock (a [`Duration`] offset from an epoch of zero) and a
/// priority queue of pending tasks keyed by their due instant. Nothing runs
/// until the clock is advanced; [`advance_to`](Self::advance_to) executes
/// every task due up to the target instant in due-time order, with ties
/// broken by insertion order.
///
/// Installed process-wide via
/// [`enable_virtual_time`](crate::scheduler::enable_virtual_time); tests
/// that enable it must disable it on teardown.
pub struct VirtualScheduler {
    state: Mutex<State>,
}

struct State {
    now: Duration,
    sequence: u64,
    tasks: BinaryHeap<Entry>,
}

struct Entry {
    due: Duration,
    sequence: u64,
    task: ScheduledTask,
}

// BinaryHeap is a max-heap; order entries so the earliest (due, sequence)
// pair is popped first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

impl Eq for Entry {}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                now: Duration::ZERO,
                sequence: 0,
                tasks: BinaryHeap::new(),
            }),
        }
    }

    /// Current virtual instant, starting at zero.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Enqueue `task` to run once the clock reaches `now() + delay`.
    ///
    /// Tasks scheduled from within a running task observe the running task's
    /// due instant as `now()`, so periodic reschedules keep a fixed cadence.
    pub fn schedule(&self, delay: Duration, task: ScheduledTask) {
        let mut state = self.lock();
        let due = state.now.saturating_add(delay);
        let sequence = state.sequence;
        state.sequence += 1;
        state.tasks.push(Entry {
            due,
            sequence,
            task,
        });
    }

    /// Due instant of the earliest pending task, if any.
    pub fn next_due(&self) -> Option<Duration> {
        self.lock().tasks.peek().map(|entry| entry.due)
    }

    /// Equivalent to `advance_to(now() + duration)`.
    pub fn advance_by(&self, duration: Duration) -> Vec<String> {
        let target = self.lock().now.saturating_add(duration);
        self.advance_to(target)
    }

    /// Runs every task due at or before `target`, in due-time order with
    /// stable ties, then moves the clock to `max(now, target)`.
    ///
    /// Tasks run outside the internal lock and may schedule further tasks;
    /// newly scheduled work that falls within `target` runs in the same
    /// pass. A panicking task is isolated: its message is returned and the
    /// remaining tasks still run.
    pub fn advance_to(&self, target: Duration) -> Vec<String> {
        let mut failures = Vec::new();
        let mut executed = 0u32;
        loop {
            let task = {
                let mut state = self.lock();
                match state.tasks.peek() {
                    Some(entry) if entry.due <= target => state.tasks.pop().map(|entry| {
                        state.now = state.now.max(entry.due);
                        entry.task
                    }),
                    _ => None,
                }
            };
            let Some(task) = task else { break };
            executed += 1;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                failures.push(format!(
                    "scheduled task panicked: {}",
                    panic_message(payload)
                ));
            }
        }
        let mut state = self.lock();
        state.now = state.now.max(target);
        tracing::trace!(tasks = executed, now = ?state.now, "advanced virtual clock");
        failures
    }

    /// Drops every pending task. Called when virtual time is disabled.
    pub fn clear(&self) {
        self.lock().tasks.clear();
    }

    // Poison recovery: a panicking scheduled task can never corrupt the
    // queue state because tasks run outside the lock, so the stored state
    // is always consistent.
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for VirtualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) {
        VirtualScheduler::schedule(self, delay, task)
    }

    fn now(&self) -> Duration {
        VirtualScheduler::now(self)
    }
}
