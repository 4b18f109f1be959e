use std::{fmt, sync::Arc, time::Duration};

use tokio::sync::mpsc::unbounded_channel;

use crate::{
    collector::{Shared, SignalCollector, Status},
    engine::Engine,
    flow::{Publisher, Subscriber},
    scheduler,
    step::Step,
    Error, Result,
};

/// Built phase of a scenario: a one-shot verification run.
///
/// Produced by the terminal methods of [`Scenario`](crate::Scenario). Either
/// hand a publisher to one of the `verify*` methods, or subscribe the
/// [`subscriber`](Self::subscriber) handle externally and call
/// [`verify_subscribed`](Self::verify_subscribed).
///
/// All `verify*` methods block (asynchronously) until the stream terminates
/// — through completion, error, script cancellation or the verification
/// deadline — and return the wall-clock [`Duration`] of the run. Expectation
/// failures are aggregated into a single
/// [`Error::Expectations`](crate::Error::Expectations).
///
/// A verifier runs once: a second `verify*` call fails with
/// [`Error::AlreadyVerified`](crate::Error::AlreadyVerified).
pub struct Verifier<T> {
    engine: Option<Engine<T>>,
    collector: Arc<SignalCollector<T>>,
}

impl<T> fmt::Debug for Verifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("consumed", &self.engine.is_none())
            .finish_non_exhaustive()
    }
}

impl<T: Send + fmt::Debug + 'static> Verifier<T> {
    pub(crate) fn build(steps: Vec<Step<T>>, demand_initial: u64) -> Self {
        let (tx, rx) = unbounded_channel();
        let shared = Arc::new(Shared::new(tx, demand_initial));
        let collector = Arc::new(SignalCollector::new(shared.clone()));
        // Virtual time is snapshotted here: enabling it after the scenario
        // is built has no effect on this verifier.
        let engine = Engine::new(
            steps.into(),
            rx,
            shared,
            demand_initial,
            scheduler::virtual_scheduler(),
        );
        Self {
            engine: Some(engine),
            collector,
        }
    }

    /// The verifier's subscriber handle, for subscribing externally before
    /// [`verify_subscribed`](Self::verify_subscribed).
    pub fn subscriber(&self) -> Arc<dyn Subscriber<Item = T>> {
        self.collector.clone()
    }

    /// Subscribes to `publisher` and runs the script to its terminal state.
    pub async fn verify<P>(&mut self, publisher: P) -> Result<Duration>
    where
        P: Publisher<Item = T>,
    {
        let engine = self.take_engine()?;
        publisher.subscribe(self.collector.clone());
        engine.run(None, true).await
    }

    /// Like [`verify`](Self::verify), bounded by `timeout`. On expiry the
    /// upstream subscription is cancelled and a timeout failure is reported
    /// with the other expectation failures.
    pub async fn verify_within<P>(&mut self, publisher: P, timeout: Duration) -> Result<Duration>
    where
        P: Publisher<Item = T>,
    {
        let engine = self.take_engine()?;
        publisher.subscribe(self.collector.clone());
        engine.run(Some(timeout), true).await
    }

    /// Runs the script against a subscription established externally via
    /// [`subscriber`](Self::subscriber).
    ///
    /// Fails with [`Error::NotSubscribed`](crate::Error::NotSubscribed) if
    /// no subscription has arrived yet.
    pub async fn verify_subscribed(&mut self) -> Result<Duration> {
        let engine = self.take_engine()?;
        if engine.status() == Status::Built {
            return Err(Error::NotSubscribed);
        }
        engine.run(None, false).await
    }

    /// Like [`verify_subscribed`](Self::verify_subscribed), bounded by
    /// `timeout`. Waits up to the deadline for the external subscription to
    /// arrive before failing with
    /// [`Error::NotSubscribed`](crate::Error::NotSubscribed).
    pub async fn verify_subscribed_within(&mut self, timeout: Duration) -> Result<Duration> {
        let engine = self.take_engine()?;
        engine.run(Some(timeout), false).await
    }

    fn take_engine(&mut self) -> Result<Engine<T>> {
        self.engine.take().ok_or(Error::AlreadyVerified)
    }
}
