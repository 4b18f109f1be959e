//! Scheduler factories and the process-wide virtual time toggle.
//!
//! Publishers obtain their schedulers through the two factories here rather
//! than spawning timers directly, which is what makes them verifiable under
//! virtual time:
//!
//! - [`timer()`] — time-based work (delays, intervals, timeouts).
//! - [`worker()`] — plain deferred work with no time component.
//!
//! By default both are backed by the Tokio runtime. Enabling virtual time
//! swaps [`timer()`] (and, with `all_schedulers`, [`worker()`]) for a shared
//! [`VirtualScheduler`] whose clock only moves when a script advances it.
//!
//! The toggle is process-wide state with an explicit lifecycle; tests that
//! enable it must disable it on teardown to avoid cross-test leakage.

use std::{
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::{Duration, Instant},
};

use crate::virtual_scheduler::VirtualScheduler;

/// Deferred task execution, swappable between real and virtual time.
pub trait Scheduler: Send + Sync {
    /// Runs `task` once `delay` has elapsed on this scheduler's clock.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>);

    /// Elapsed time on this scheduler's clock since its epoch.
    fn now(&self) -> Duration;
}

/// Real-time scheduler backed by the Tokio runtime.
///
/// `schedule` must be called from within a runtime context; the task runs
/// on a spawned Tokio task after a real [`tokio::time::sleep`].
pub struct TokioScheduler {
    epoch: Instant,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task();
        });
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

struct VirtualTime {
    scheduler: Arc<VirtualScheduler>,
    all_schedulers: bool,
}

static VIRTUAL_TIME: Mutex<Option<VirtualTime>> = Mutex::new(None);

fn virtual_time() -> std::sync::MutexGuard<'static, Option<VirtualTime>> {
    VIRTUAL_TIME.lock().unwrap_or_else(PoisonError::into_inner)
}

fn real() -> Arc<TokioScheduler> {
    static REAL: OnceLock<Arc<TokioScheduler>> = OnceLock::new();
    REAL.get_or_init(|| Arc::new(TokioScheduler::new())).clone()
}

/// Installs the process-wide [`VirtualScheduler`] behind [`timer()`];
/// with `all_schedulers` it also captures [`worker()`].
///
/// Idempotent: enabling while already enabled keeps the installed scheduler
/// (and its clock) and only updates the `all_schedulers` coverage.
pub fn enable_virtual_time(all_schedulers: bool) {
    let mut slot = virtual_time();
    match slot.as_mut() {
        Some(installed) => installed.all_schedulers = all_schedulers,
        None => {
            *slot = Some(VirtualTime {
                scheduler: Arc::new(VirtualScheduler::new()),
                all_schedulers,
            });
            tracing::debug!(all_schedulers, "virtual time enabled");
        }
    }
}

/// Uninstalls the virtual scheduler and drops its pending task queue.
pub fn disable_virtual_time() {
    if let Some(installed) = virtual_time().take() {
        installed.scheduler.clear();
        tracing::debug!("virtual time disabled");
    }
}

/// The installed virtual scheduler, if virtual time is enabled.
///
/// Verifiers snapshot this at construction; `advance_time*` steps act on
/// the snapshot.
pub(crate) fn virtual_scheduler() -> Option<Arc<VirtualScheduler>> {
    virtual_time()
        .as_ref()
        .map(|installed| installed.scheduler.clone())
}

/// Scheduler for time-based work. Virtual whenever virtual time is enabled.
pub fn timer() -> Arc<dyn Scheduler> {
    match virtual_time().as_ref() {
        Some(installed) => installed.scheduler.clone(),
        None => real(),
    }
}

/// Scheduler for plain deferred work. Virtual only when virtual time was
/// enabled with `all_schedulers`.
pub fn worker() -> Arc<dyn Scheduler> {
    match virtual_time().as_ref() {
        Some(installed) if installed.all_schedulers => installed.scheduler.clone(),
        _ => real(),
    }
}
