use std::{
    collections::VecDeque,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    collector::{Shared, Status},
    flow::Cause,
    signal::Signal,
    step::{panic_message, ErrorExpectation, Step},
    virtual_scheduler::VirtualScheduler,
    Error, Result,
};

/// Outcome of one bounded dequeue.
enum Fetch<T> {
    Signal(Signal<T>),
    TimedOut,
}

/// Outcome of waiting for one value signal.
enum ValueFetch<T> {
    Value(T),
    Terminal(Signal<T>),
    TimedOut,
}

/// The scripted expectation engine.
///
/// Owns the consumer side of the signal queue and drives the script against
/// received signals on a single driver task. Expectation failures are
/// recorded and the script keeps running; only usage errors abort the run.
pub(crate) struct Engine<T> {
    script: VecDeque<Step<T>>,
    rx: UnboundedReceiver<Signal<T>>,
    shared: Arc<Shared<T>>,
    demand: u64,
    virtual_time: Option<Arc<VirtualScheduler>>,
    timeout: Option<Duration>,
    terminated: bool,
}

impl<T: Send + fmt::Debug + 'static> Engine<T> {
    pub(crate) fn new(
        script: VecDeque<Step<T>>,
        rx: UnboundedReceiver<Signal<T>>,
        shared: Arc<Shared<T>>,
        demand_initial: u64,
        virtual_time: Option<Arc<VirtualScheduler>>,
    ) -> Self {
        Self {
            script,
            rx,
            shared,
            demand: demand_initial,
            virtual_time,
            timeout: None,
            terminated: false,
        }
    }

    pub(crate) fn status(&self) -> Status {
        self.shared.status()
    }

    /// Runs the script to its terminal state and reports the wall-clock
    /// duration, or the aggregated expectation failures.
    ///
    /// `had_publisher` selects how a missing subscription surfaces: as a
    /// timeout failure when a publisher was handed to `verify`, or as the
    /// `NotSubscribed` usage error when the caller claimed an external
    /// subscription that never arrived.
    pub(crate) async fn run(
        mut self,
        timeout: Option<Duration>,
        had_publisher: bool,
    ) -> Result<Duration> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        self.timeout = timeout;

        self.await_subscription(deadline, had_publisher).await?;

        while !self.terminated {
            let Some(step) = self.script.pop_front() else {
                break;
            };
            self.execute(step, deadline).await?;
        }

        if !self.terminated {
            // The script ran out without a terminal signal (a terminal
            // expectation was consumed by a mismatched value). Release the
            // upstream before reporting.
            self.cancel_upstream();
            self.terminate();
        }

        let failures = self.shared.take_failures();
        if failures.is_empty() {
            Ok(started.elapsed())
        } else {
            Err(Error::Expectations(failures))
        }
    }

    async fn execute(&mut self, step: Step<T>, deadline: Option<Instant>) -> Result<()> {
        match step {
            Step::Request(n) => self.do_request(n),
            Step::Cancel => self.do_cancel(),
            Step::Run(task) => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                    self.record(panic_message(payload));
                }
            }
            Step::AdvanceTime => {
                let scheduler = self.virtual_time()?;
                if let Some(due) = scheduler.next_due() {
                    let failures = scheduler.advance_to(due);
                    self.record_all(failures);
                }
            }
            Step::AdvanceTimeBy(duration) => {
                let scheduler = self.virtual_time()?;
                let failures = scheduler.advance_by(duration);
                self.record_all(failures);
            }
            Step::AdvanceTimeTo(instant) => {
                let scheduler = self.virtual_time()?;
                let failures = scheduler.advance_to(instant);
                self.record_all(failures);
            }
            Step::NextEqual { values, equals } => {
                self.expect_values(values, equals, deadline).await;
            }
            Step::NextWith { predicate } => {
                match self.next_value("on_next(<predicate>)", deadline).await {
                    ValueFetch::Value(actual) => {
                        match catch_unwind(AssertUnwindSafe(|| predicate(&actual))) {
                            Ok(true) => {}
                            Ok(false) => {
                                self.record(format!("predicate failed on value: {actual:?}"));
                            }
                            Err(payload) => self.record(panic_message(payload)),
                        }
                    }
                    ValueFetch::Terminal(signal) => {
                        self.on_early_terminal(Some(Step::NextWith { predicate }), signal);
                    }
                    ValueFetch::TimedOut => {}
                }
            }
            Step::NextConsume { consumer } => {
                match self.next_value("on_next(<consumer>)", deadline).await {
                    ValueFetch::Value(actual) => {
                        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| consumer(&actual))) {
                            self.record(panic_message(payload));
                        }
                    }
                    ValueFetch::Terminal(signal) => {
                        self.on_early_terminal(Some(Step::NextConsume { consumer }), signal);
                    }
                    ValueFetch::TimedOut => {}
                }
            }
            Step::NextCount { mut remaining } => {
                while remaining > 0 && !self.terminated {
                    let waiting_for = format!("on_next(<{remaining} signal(s)>)");
                    match self.next_value(&waiting_for, deadline).await {
                        ValueFetch::Value(_) => remaining -= 1,
                        ValueFetch::Terminal(signal) => {
                            self.on_early_terminal(Some(Step::NextCount { remaining }), signal);
                            break;
                        }
                        ValueFetch::TimedOut => break,
                    }
                }
            }
            Step::Complete => self.expect_completion(deadline).await,
            Step::Error(expectation) => self.expect_failure(expectation, deadline).await,
        }
        Ok(())
    }

    // ==================== Value Expectations ====================

    async fn expect_values(
        &mut self,
        mut values: VecDeque<T>,
        equals: crate::step::EqualityFn<T>,
        deadline: Option<Instant>,
    ) {
        while let Some(expected) = values.pop_front() {
            let waiting_for = format!("on_next({expected:?})");
            match self.next_value(&waiting_for, deadline).await {
                ValueFetch::Value(actual) => {
                    match catch_unwind(AssertUnwindSafe(|| equals(&expected, &actual))) {
                        Ok(true) => {}
                        Ok(false) => {
                            self.record(format!(
                                "expected value: {expected:?}; actual value: {actual:?}"
                            ));
                            // A mismatch abandons the rest of this step so
                            // later steps still line up with later signals.
                            return;
                        }
                        Err(payload) => {
                            self.record(panic_message(payload));
                            return;
                        }
                    }
                }
                ValueFetch::Terminal(signal) => {
                    values.push_front(expected);
                    self.on_early_terminal(Some(Step::NextEqual { values, equals }), signal);
                    return;
                }
                ValueFetch::TimedOut => return,
            }
        }
    }

    // ==================== Terminal Expectations ====================

    async fn expect_completion(&mut self, deadline: Option<Instant>) {
        match self.next_signal("on_complete()", deadline).await {
            Fetch::TimedOut => {}
            Fetch::Signal(Signal::Complete) => self.terminate(),
            Fetch::Signal(Signal::Next(value)) => {
                self.demand = self.demand.saturating_sub(1);
                self.record(format!("expected: on_complete(); actual: on_next({value:?})"));
            }
            Fetch::Signal(signal) => {
                self.record(format!(
                    "expected: on_complete(); actual: {}",
                    signal.describe()
                ));
                if signal.is_terminal() {
                    self.terminate();
                }
            }
        }
    }

    async fn expect_failure(&mut self, expectation: ErrorExpectation, deadline: Option<Instant>) {
        match self.next_signal(&expectation.describe(), deadline).await {
            Fetch::TimedOut => {}
            Fetch::Signal(Signal::Error(cause)) => {
                self.check_error(expectation, &cause);
                self.terminate();
            }
            Fetch::Signal(Signal::Next(value)) => {
                self.demand = self.demand.saturating_sub(1);
                self.record(format!(
                    "expected: {}; actual: on_next({value:?})",
                    expectation.describe()
                ));
            }
            Fetch::Signal(signal) => {
                self.record(format!(
                    "expected: {}; actual: {}",
                    expectation.describe(),
                    signal.describe()
                ));
                if signal.is_terminal() {
                    self.terminate();
                }
            }
        }
    }

    fn check_error(&mut self, expectation: ErrorExpectation, cause: &Cause) {
        match expectation {
            ErrorExpectation::Any => {}
            ErrorExpectation::OfType { name, matches } => {
                match catch_unwind(AssertUnwindSafe(|| matches(cause))) {
                    Ok(true) => {}
                    Ok(false) => {
                        self.record(format!("expected error of type {name}; actual: {cause}"));
                    }
                    Err(payload) => self.record(panic_message(payload)),
                }
            }
            ErrorExpectation::Message(expected) => {
                let actual = cause.to_string();
                if actual != expected {
                    self.record(format!(
                        "expected error message {expected:?}; actual message {actual:?}"
                    ));
                }
            }
            ErrorExpectation::Predicate(predicate) => {
                match catch_unwind(AssertUnwindSafe(|| predicate(cause))) {
                    Ok(true) => {}
                    Ok(false) => self.record(format!("predicate failed on error: {cause}")),
                    Err(payload) => self.record(panic_message(payload)),
                }
            }
            ErrorExpectation::Consume(consumer) => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| consumer(cause))) {
                    self.record(panic_message(payload));
                }
            }
        }
    }

    /// A terminal signal arrived while non-terminal expectations were still
    /// outstanding: record each as a missing value, skip outstanding control
    /// actions (their upstream is gone), then give the script's terminal
    /// step its match attempt.
    fn on_early_terminal(&mut self, current: Option<Step<T>>, signal: Signal<T>) {
        if let Some(step) = current {
            self.record_all(missing_messages(&step));
        }
        while self.script.len() > 1 {
            if let Some(step) = self.script.pop_front() {
                if !step.is_control() {
                    self.record_all(missing_messages(&step));
                }
            }
        }
        match self.script.pop_front() {
            Some(Step::Complete) => {
                if !matches!(signal, Signal::Complete) {
                    self.record(format!(
                        "expected: on_complete(); actual: {}",
                        signal.describe()
                    ));
                }
            }
            Some(Step::Error(expectation)) => match signal {
                Signal::Error(cause) => self.check_error(expectation, &cause),
                other => self.record(format!(
                    "expected: {}; actual: {}",
                    expectation.describe(),
                    other.describe()
                )),
            },
            // then_cancel, or a script already drained: the stream ended on
            // its own, there is nothing left to cancel or match.
            Some(Step::Cancel) | None => {}
            Some(step) => self.record_all(missing_messages(&step)),
        }
        self.terminate();
    }

    // ==================== Control Actions ====================

    fn do_request(&mut self, n: u64) {
        self.demand = self.demand.saturating_add(n);
        match self.shared.subscription() {
            Some(subscription) => {
                tracing::trace!(n, outstanding = self.demand, "forwarding request upstream");
                subscription.request(n);
            }
            None => self.record(format!("request({n}) could not be forwarded; not subscribed")),
        }
    }

    fn do_cancel(&mut self) {
        self.cancel_upstream();
        self.terminate();
        // Already-queued signals are dropped without matching.
        while self.rx.try_recv().is_ok() {}
    }

    fn cancel_upstream(&self) {
        if let Some(subscription) = self.shared.subscription() {
            subscription.cancel();
        }
    }

    fn virtual_time(&self) -> Result<Arc<VirtualScheduler>> {
        self.virtual_time
            .clone()
            .ok_or(Error::VirtualTimeDisabled)
    }

    // ==================== Signal Intake ====================

    async fn await_subscription(
        &mut self,
        deadline: Option<Instant>,
        had_publisher: bool,
    ) -> Result<()> {
        loop {
            match self.recv(deadline).await {
                Some(Signal::Subscribed) => return Ok(()),
                Some(signal) => {
                    self.record(format!("received {} before subscription", signal.describe()));
                }
                None => {
                    if !had_publisher && self.shared.status() == Status::Built {
                        return Err(Error::NotSubscribed);
                    }
                    self.record_timeout("on_subscribe");
                    self.terminate();
                    return Ok(());
                }
            }
        }
    }

    async fn next_value(&mut self, waiting_for: &str, deadline: Option<Instant>) -> ValueFetch<T> {
        loop {
            match self.next_signal(waiting_for, deadline).await {
                Fetch::TimedOut => return ValueFetch::TimedOut,
                Fetch::Signal(Signal::Next(value)) => {
                    self.demand = self.demand.saturating_sub(1);
                    return ValueFetch::Value(value);
                }
                Fetch::Signal(Signal::Subscribed) => {
                    self.record("received an unexpected on_subscribe signal".to_string());
                }
                Fetch::Signal(signal) => return ValueFetch::Terminal(signal),
            }
        }
    }

    async fn next_signal(&mut self, waiting_for: &str, deadline: Option<Instant>) -> Fetch<T> {
        match self.recv(deadline).await {
            Some(signal) => Fetch::Signal(signal),
            None => {
                self.record_timeout(waiting_for);
                self.cancel_upstream();
                self.terminate();
                Fetch::TimedOut
            }
        }
    }

    /// One dequeue, bounded by the verification deadline. `None` means the
    /// deadline expired (the queue itself cannot close while the engine is
    /// alive: the sender lives in the shared state).
    async fn recv(&mut self, deadline: Option<Instant>) -> Option<Signal<T>> {
        match deadline {
            None => self.rx.recv().await,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return None;
                }
                match tokio::time::timeout(remaining, self.rx.recv()).await {
                    Ok(signal) => signal,
                    Err(_) => None,
                }
            }
        }
    }

    // ==================== Bookkeeping ====================

    fn record(&mut self, message: String) {
        self.shared.record_failure(message);
    }

    fn record_all(&mut self, messages: Vec<String>) {
        for message in messages {
            self.record(message);
        }
    }

    fn record_timeout(&mut self, waiting_for: &str) {
        let message = match self.timeout {
            Some(timeout) => {
                tracing::debug!(?timeout, waiting_for, "verification timed out");
                format!("verification timed out after {timeout:?} while waiting for {waiting_for}")
            }
            None => format!("signal queue closed while waiting for {waiting_for}"),
        };
        self.record(message);
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.shared.set_terminated();
    }
}

fn missing_messages<T: fmt::Debug>(step: &Step<T>) -> Vec<String> {
    match step {
        Step::NextEqual { values, .. } => values
            .iter()
            .map(|value| format!("missing value; expected on_next({value:?})"))
            .collect(),
        Step::NextWith { .. } | Step::NextConsume { .. } => {
            vec![format!("missing value; expected {}", step.describe())]
        }
        Step::NextCount { remaining } => {
            vec![format!(
                "missing values; expected {remaining} more on_next signal(s)"
            )]
        }
        _ => Vec::new(),
    }
}
