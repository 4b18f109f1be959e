use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedSender;

use crate::{
    flow::{Cause, Subscriber, Subscription},
    signal::Signal,
};

/// Lifecycle of a verifier's one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Built,
    Subscribed,
    Terminated,
}

/// State shared between the publisher-facing collector and the driver.
///
/// The signal queue sender lives here so the queue can never observe a
/// closed-channel state while the verifier is alive. Failures recorded from
/// callback threads (e.g. a duplicate subscription) and from the driver go
/// into the same ordered list.
pub(crate) struct Shared<T> {
    tx: UnboundedSender<Signal<T>>,
    demand_initial: u64,
    control: Mutex<ControlState>,
    failures: Mutex<Vec<String>>,
}

struct ControlState {
    status: Status,
    subscription: Option<Arc<dyn Subscription>>,
}

impl<T> Shared<T> {
    pub(crate) fn new(tx: UnboundedSender<Signal<T>>, demand_initial: u64) -> Self {
        Self {
            tx,
            demand_initial,
            control: Mutex::new(ControlState {
                status: Status::Built,
                subscription: None,
            }),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn status(&self) -> Status {
        self.control().status
    }

    pub(crate) fn set_terminated(&self) {
        self.control().status = Status::Terminated;
    }

    pub(crate) fn subscription(&self) -> Option<Arc<dyn Subscription>> {
        self.control().subscription.clone()
    }

    pub(crate) fn record_failure(&self, message: String) {
        self.failures().push(message);
    }

    pub(crate) fn take_failures(&self) -> Vec<String> {
        std::mem::take(&mut *self.failures())
    }

    fn control(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failures(&self) -> MutexGuard<'_, Vec<String>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The verifier's [`Subscriber`] implementation.
///
/// Callbacks never block beyond a wait-free enqueue onto the signal queue,
/// keeping the publisher's scheduler healthy regardless of what the script
/// is doing.
pub(crate) struct SignalCollector<T> {
    shared: Arc<Shared<T>>,
}

impl<T> SignalCollector<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>) -> Self {
        Self { shared }
    }
}

impl<T: Send + 'static> Subscriber for SignalCollector<T> {
    type Item = T;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let accepted = {
            let mut control = self.shared.control();
            if control.status == Status::Built {
                control.status = Status::Subscribed;
                control.subscription = Some(subscription.clone());
                true
            } else {
                false
            }
        };

        if !accepted {
            self.shared.record_failure(
                "an unexpected subscription was received while already subscribed".to_string(),
            );
            subscription.cancel();
            return;
        }

        // The Subscribed marker goes into the queue before the initial
        // request, so it precedes values the publisher emits synchronously.
        let _ = self.shared.tx.send(Signal::Subscribed);
        if self.shared.demand_initial > 0 {
            subscription.request(self.shared.demand_initial);
        }
    }

    fn on_next(&self, value: T) {
        let _ = self.shared.tx.send(Signal::Next(value));
    }

    fn on_error(&self, cause: Cause) {
        let _ = self.shared.tx.send(Signal::Error(cause));
    }

    fn on_complete(&self) {
        let _ = self.shared.tx.send(Signal::Complete);
    }
}
