//! Test doubles and fixtures shared by the crate's tests.
//!
//! The publishers here honor the reactive-streams contract the verifier
//! consumes: demand-gated emission, serialized signals, idempotent cancel.
//! They stand in for the publisher library the verifier is normally pointed
//! at and are not part of the public surface.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use crate::{
    flow::{Cause, Publisher, Subscriber, Subscription},
    scheduler,
    scheduler::Scheduler,
};

// ==================== Time Guards ====================

// Virtual time is process-wide; tests that touch it (or that depend on real
// timers) serialize on this lock so parallel tests cannot leak state into
// each other.
static TIME_LOCK: Mutex<()> = Mutex::new(());

pub(crate) struct TimeGuard {
    _lock: MutexGuard<'static, ()>,
    enabled: bool,
}

impl Drop for TimeGuard {
    fn drop(&mut self) {
        if self.enabled {
            scheduler::disable_virtual_time();
        }
    }
}

/// Enables virtual time for the duration of the guard.
pub(crate) fn virtual_time_guard(all_schedulers: bool) -> TimeGuard {
    let lock = TIME_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    scheduler::enable_virtual_time(all_schedulers);
    TimeGuard {
        _lock: lock,
        enabled: true,
    }
}

/// Keeps virtual time disabled for the duration of the guard.
pub(crate) fn real_time_guard() -> TimeGuard {
    TimeGuard {
        _lock: TIME_LOCK.lock().unwrap_or_else(PoisonError::into_inner),
        enabled: false,
    }
}

// ==================== Test Errors ====================

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub(crate) struct ArgumentError(pub(crate) String);

#[derive(Debug, thiserror::Error)]
#[error("illegal state")]
pub(crate) struct StateError;

#[derive(Debug, thiserror::Error)]
#[error("could not emit tick {0}; no outstanding demand")]
pub(crate) struct TickOverflow(pub(crate) u64);

// ==================== FromIter ====================

enum End {
    Complete,
    Error(Cause),
    /// Run dry silently; termination comes from elsewhere (see [`gated`]).
    Never,
}

/// Emits a fixed sequence, strictly demand-gated, terminating with
/// completion or an error. Signals are delivered synchronously on the
/// requesting thread.
pub(crate) struct FromIter<T> {
    items: VecDeque<T>,
    end: End,
    request_log: Option<Arc<Mutex<Vec<u64>>>>,
}

/// `FromIter` over `items`, completing after the last value.
pub(crate) fn just<T>(items: impl IntoIterator<Item = T>) -> FromIter<T> {
    FromIter {
        items: items.into_iter().collect(),
        end: End::Complete,
        request_log: None,
    }
}

/// `FromIter` over `items`, erroring with `cause` after the last value.
pub(crate) fn just_then_error<T>(
    items: impl IntoIterator<Item = T>,
    cause: impl std::error::Error + Send + Sync + 'static,
) -> FromIter<T> {
    FromIter {
        items: items.into_iter().collect(),
        end: End::Error(Arc::new(cause)),
        request_log: None,
    }
}

impl<T> FromIter<T> {
    /// Record every `request(n)` the subscriber issues into `log`.
    pub(crate) fn with_request_log(mut self, log: Arc<Mutex<Vec<u64>>>) -> Self {
        self.request_log = Some(log);
        self
    }
}

impl<T: Send + 'static> Publisher for FromIter<T> {
    type Item = T;

    fn subscribe(self, subscriber: Arc<dyn Subscriber<Item = T>>) {
        let subscription = Arc::new(IterSubscription {
            subscriber: subscriber.clone(),
            state: Mutex::new(IterState {
                items: self.items,
                end: Some(self.end),
                demand: 0,
                emitting: false,
                done: false,
            }),
            cancelled: AtomicBool::new(false),
            request_log: self.request_log,
        });
        subscriber.on_subscribe(subscription);
    }
}

struct IterState<T> {
    items: VecDeque<T>,
    end: Option<End>,
    demand: u64,
    emitting: bool,
    done: bool,
}

struct IterSubscription<T> {
    subscriber: Arc<dyn Subscriber<Item = T>>,
    state: Mutex<IterState<T>>,
    cancelled: AtomicBool,
    request_log: Option<Arc<Mutex<Vec<u64>>>>,
}

enum Emission<T> {
    Value(T),
    End(End),
    Idle,
}

impl<T: Send + 'static> IterSubscription<T> {
    // Single-threaded drain: the `emitting` flag keeps reentrant request()
    // calls (from within on_next handling) from interleaving emissions.
    fn drain(&self) {
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                self.state.lock().unwrap().emitting = false;
                return;
            }
            let emission = {
                let mut state = self.state.lock().unwrap();
                if state.done {
                    state.emitting = false;
                    Emission::Idle
                } else if state.items.is_empty() {
                    state.done = true;
                    state.emitting = false;
                    match state.end.take() {
                        Some(end) => Emission::End(end),
                        None => Emission::Idle,
                    }
                } else if state.demand == 0 {
                    state.emitting = false;
                    Emission::Idle
                } else {
                    state.demand -= 1;
                    match state.items.pop_front() {
                        Some(value) => Emission::Value(value),
                        None => Emission::Idle,
                    }
                }
            };
            match emission {
                Emission::Value(value) => self.subscriber.on_next(value),
                Emission::End(End::Complete) => {
                    self.subscriber.on_complete();
                    return;
                }
                Emission::End(End::Error(cause)) => {
                    self.subscriber.on_error(cause);
                    return;
                }
                Emission::End(End::Never) | Emission::Idle => return,
            }
        }
    }
}

impl<T: Send + 'static> Subscription for IterSubscription<T> {
    fn request(&self, n: u64) {
        if let Some(log) = &self.request_log {
            log.lock().unwrap().push(n);
        }
        let should_drain = {
            let mut state = self.state.lock().unwrap();
            state.demand = state.demand.saturating_add(n);
            if state.emitting {
                false
            } else {
                state.emitting = true;
                true
            }
        };
        if should_drain {
            self.drain();
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

// ==================== Gated ====================

struct GateShared<T> {
    subscriber: Mutex<Option<Arc<dyn Subscriber<Item = T>>>>,
    fired: AtomicBool,
}

/// Emits up to demand from a fixed sequence but never completes on its own;
/// completion comes from the paired [`Gate`]. The analog of a stream taken
/// until an external trigger fires.
pub(crate) struct GatedPublisher<T> {
    items: VecDeque<T>,
    shared: Arc<GateShared<T>>,
}

pub(crate) struct Gate<T> {
    shared: Arc<GateShared<T>>,
}

pub(crate) fn gated<T: Send + 'static>(
    items: impl IntoIterator<Item = T>,
) -> (GatedPublisher<T>, Gate<T>) {
    let shared = Arc::new(GateShared {
        subscriber: Mutex::new(None),
        fired: AtomicBool::new(false),
    });
    (
        GatedPublisher {
            items: items.into_iter().collect(),
            shared: shared.clone(),
        },
        Gate { shared },
    )
}

impl<T: Send + 'static> Publisher for GatedPublisher<T> {
    type Item = T;

    fn subscribe(self, subscriber: Arc<dyn Subscriber<Item = T>>) {
        *self.shared.subscriber.lock().unwrap() = Some(subscriber.clone());
        let inner = FromIter {
            items: self.items,
            end: End::Never,
            request_log: None,
        };
        inner.subscribe(subscriber);
    }
}

impl<T> Gate<T> {
    /// Completes the gated stream. Safe to call at most once; later calls
    /// are ignored.
    pub(crate) fn complete(&self) {
        if self.shared.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscriber = self.shared.subscriber.lock().unwrap().clone();
        if let Some(subscriber) = subscriber {
            subscriber.on_complete();
        }
    }
}

// ==================== AsyncEmit ====================

struct FlagSubscription {
    cancelled: Arc<AtomicBool>,
}

impl Subscription for FlagSubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Emits a fixed sequence from a spawned task, yielding between values, then
/// completes. Assumes unbounded demand; used to exercise cross-task signal
/// ordering.
pub(crate) struct AsyncEmit<T> {
    items: Vec<T>,
}

pub(crate) fn emit_async<T>(items: impl IntoIterator<Item = T>) -> AsyncEmit<T> {
    AsyncEmit {
        items: items.into_iter().collect(),
    }
}

impl<T: Send + 'static> Publisher for AsyncEmit<T> {
    type Item = T;

    fn subscribe(self, subscriber: Arc<dyn Subscriber<Item = T>>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        subscriber.on_subscribe(Arc::new(FlagSubscription {
            cancelled: cancelled.clone(),
        }));
        tokio::spawn(async move {
            for value in self.items {
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                subscriber.on_next(value);
                tokio::task::yield_now().await;
            }
            if !cancelled.load(Ordering::SeqCst) {
                subscriber.on_complete();
            }
        });
    }
}

// ==================== Delayed ====================

/// Emits one value after `delay` on the timer scheduler, then completes.
/// Under virtual time the value arrives when the script advances past the
/// delay. Assumes demand is granted by then.
pub(crate) struct Delayed<T> {
    value: T,
    delay: Duration,
}

pub(crate) fn delayed<T>(value: T, delay: Duration) -> Delayed<T> {
    Delayed { value, delay }
}

impl<T: Send + 'static> Publisher for Delayed<T> {
    type Item = T;

    fn subscribe(self, subscriber: Arc<dyn Subscriber<Item = T>>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        subscriber.on_subscribe(Arc::new(FlagSubscription {
            cancelled: cancelled.clone(),
        }));
        let value = self.value;
        scheduler::timer().schedule(
            self.delay,
            Box::new(move || {
                if !cancelled.load(Ordering::SeqCst) {
                    subscriber.on_next(value);
                    subscriber.on_complete();
                }
            }),
        );
    }
}

// ==================== Interval ====================

struct IntervalCtx<T> {
    subscriber: Arc<dyn Subscriber<Item = T>>,
    scheduler: Arc<dyn Scheduler>,
    produce: Box<dyn Fn(u64) -> T + Send + Sync>,
    period: Duration,
    take: Option<u64>,
    demand: AtomicU64,
    cancelled: AtomicBool,
}

struct IntervalSubscription<T> {
    ctx: Arc<IntervalCtx<T>>,
}

impl<T: Send + 'static> Subscription for IntervalSubscription<T> {
    fn request(&self, n: u64) {
        self.ctx.demand.fetch_add(n, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.ctx.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Emits `produce(0), produce(1), ...` every `period` on the timer
/// scheduler. A tick with no outstanding demand errors with
/// [`TickOverflow`], like a real interval source. `take` completes the
/// stream after that many ticks.
pub(crate) struct Interval<T> {
    period: Duration,
    take: Option<u64>,
    produce: Box<dyn Fn(u64) -> T + Send + Sync>,
}

pub(crate) fn interval<T>(
    period: Duration,
    produce: impl Fn(u64) -> T + Send + Sync + 'static,
) -> Interval<T> {
    Interval {
        period,
        take: None,
        produce: Box::new(produce),
    }
}

impl<T> Interval<T> {
    pub(crate) fn take(mut self, n: u64) -> Self {
        self.take = Some(n);
        self
    }
}

impl<T: Send + 'static> Publisher for Interval<T> {
    type Item = T;

    fn subscribe(self, subscriber: Arc<dyn Subscriber<Item = T>>) {
        let ctx = Arc::new(IntervalCtx {
            subscriber: subscriber.clone(),
            scheduler: scheduler::timer(),
            produce: self.produce,
            period: self.period,
            take: self.take,
            demand: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        });
        subscriber.on_subscribe(Arc::new(IntervalSubscription { ctx: ctx.clone() }));
        schedule_tick(ctx, 0);
    }
}

fn schedule_tick<T: Send + 'static>(ctx: Arc<IntervalCtx<T>>, index: u64) {
    let scheduler = ctx.scheduler.clone();
    let period = ctx.period;
    scheduler.schedule(
        period,
        Box::new(move || {
            if ctx.cancelled.load(Ordering::SeqCst) {
                return;
            }
            let had_demand = ctx
                .demand
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |demand| {
                    demand.checked_sub(1)
                })
                .is_ok();
            if !had_demand {
                ctx.subscriber.on_error(Arc::new(TickOverflow(index)));
                return;
            }
            ctx.subscriber.on_next((ctx.produce)(index));
            if ctx.take == Some(index + 1) {
                ctx.subscriber.on_complete();
                return;
            }
            schedule_tick(ctx, index + 1);
        }),
    );
}
