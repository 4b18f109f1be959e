use std::{any::type_name, collections::VecDeque, fmt, time::Duration};

use crate::{
    flow::Cause,
    step::{ErrorExpectation, Step},
    verifier::Verifier,
};

/// Sequence-phase builder for a verification script.
///
/// Accumulate value expectations and control actions in the order the
/// publisher is expected to produce them, then commit exactly one terminal
/// step ([`expect_complete`](Self::expect_complete), one of the
/// `expect_error*` variants, or [`then_cancel`](Self::then_cancel)). The
/// terminal step converts the scenario into a [`Verifier`]; nothing can be
/// chained after it, so a script always ends in a terminal step.
///
/// # Example
///
/// ```
/// use rehearse::Scenario;
///
/// let verifier = Scenario::new()
///     .expect_next("foo")
///     .expect_next("bar")
///     .expect_complete();
/// # let _ = verifier;
/// ```
pub struct Scenario<T> {
    steps: Vec<Step<T>>,
    demand: u64,
}

impl<T: Send + fmt::Debug + 'static> Scenario<T> {
    /// Starts a scenario that requests an unbounded amount of values on
    /// subscribe.
    pub fn new() -> Self {
        Self::with_demand(u64::MAX)
    }

    /// Starts a scenario that requests `n` values on subscribe.
    ///
    /// With `n = 0` the publisher may not emit anything until the script
    /// issues a [`then_request`](Self::then_request).
    pub fn with_demand(n: u64) -> Self {
        Self {
            steps: Vec::new(),
            demand: n,
        }
    }

    // ==================== Value Expectations ====================

    /// Expect the next signal to be a value equal to `value`.
    pub fn expect_next(self, value: T) -> Self
    where
        T: PartialEq,
    {
        self.expect_next_seq([value])
    }

    /// Expect the next signals to be values equal to `values`, in order.
    ///
    /// An empty sequence is a no-op step.
    pub fn expect_next_seq(self, values: impl IntoIterator<Item = T>) -> Self
    where
        T: PartialEq,
    {
        self.expect_next_seq_by(values, |expected, actual| expected == actual)
    }

    /// Expect the next signals to be values matching `values` under the
    /// supplied equality, in order.
    pub fn expect_next_seq_by(
        mut self,
        values: impl IntoIterator<Item = T>,
        equals: impl Fn(&T, &T) -> bool + Send + 'static,
    ) -> Self {
        self.steps.push(Step::NextEqual {
            values: VecDeque::from_iter(values),
            equals: Box::new(equals),
        });
        self
    }

    /// Expect one value satisfying `predicate`.
    pub fn expect_next_with(mut self, predicate: impl Fn(&T) -> bool + Send + 'static) -> Self {
        self.steps.push(Step::NextWith {
            predicate: Box::new(predicate),
        });
        self
    }

    /// Expect one value and hand it to `consumer`.
    ///
    /// A panic inside the consumer (e.g. a failed `assert!`) is recorded as
    /// a script failure at this step, with the panic message as the failure
    /// text; the script then continues.
    pub fn consume_next_with(mut self, consumer: impl Fn(&T) + Send + 'static) -> Self {
        self.steps.push(Step::NextConsume {
            consumer: Box::new(consumer),
        });
        self
    }

    /// Expect `n` values without inspecting them. `n = 0` matches
    /// immediately.
    pub fn expect_next_count(mut self, n: u64) -> Self {
        self.steps.push(Step::NextCount { remaining: n });
        self
    }

    // ==================== Control Actions ====================

    /// Request `n` more values from the upstream subscription, in addition
    /// to the initial demand.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn then_request(mut self, n: u64) -> Self {
        assert!(n >= 1, "then_request requires a demand of at least 1");
        self.steps.push(Step::Request(n));
        self
    }

    /// Run an arbitrary task after the previous expectations, typically to
    /// trigger an upstream event. A panic inside the task is recorded as a
    /// script failure; the script then continues.
    pub fn then_run(mut self, task: impl FnOnce() + Send + 'static) -> Self {
        self.steps.push(Step::Run(Box::new(task)));
        self
    }

    /// Advance virtual time to the earliest scheduled instant. A no-op when
    /// nothing is scheduled.
    ///
    /// Valid only when virtual time was enabled before the scenario was
    /// built; otherwise verification fails with
    /// [`Error::VirtualTimeDisabled`](crate::Error::VirtualTimeDisabled).
    pub fn advance_time(mut self) -> Self {
        self.steps.push(Step::AdvanceTime);
        self
    }

    /// Advance virtual time by `duration`. See [`advance_time`](Self::advance_time).
    pub fn advance_time_by(mut self, duration: Duration) -> Self {
        self.steps.push(Step::AdvanceTimeBy(duration));
        self
    }

    /// Advance virtual time to the given offset from the virtual epoch.
    /// See [`advance_time`](Self::advance_time).
    pub fn advance_time_to(mut self, instant: Duration) -> Self {
        self.steps.push(Step::AdvanceTimeTo(instant));
        self
    }

    // ==================== Terminal Steps ====================

    /// Expect the completion signal. Builds the [`Verifier`].
    pub fn expect_complete(self) -> Verifier<T> {
        self.finish(Step::Complete)
    }

    /// Expect any error signal. Builds the [`Verifier`].
    pub fn expect_error(self) -> Verifier<T> {
        self.finish(Step::Error(ErrorExpectation::Any))
    }

    /// Expect an error signal carrying an error of type `E`. Builds the
    /// [`Verifier`].
    pub fn expect_error_of<E>(self) -> Verifier<T>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.finish(Step::Error(ErrorExpectation::OfType {
            name: short_type_name::<E>(),
            matches: Box::new(|cause: &Cause| cause.downcast_ref::<E>().is_some()),
        }))
    }

    /// Expect an error signal whose message (its `Display` form) equals
    /// `message`. Builds the [`Verifier`].
    pub fn expect_error_message(self, message: impl Into<String>) -> Verifier<T> {
        self.finish(Step::Error(ErrorExpectation::Message(message.into())))
    }

    /// Expect an error signal satisfying `predicate`. Builds the
    /// [`Verifier`].
    pub fn expect_error_with(
        self,
        predicate: impl Fn(&Cause) -> bool + Send + 'static,
    ) -> Verifier<T> {
        self.finish(Step::Error(ErrorExpectation::Predicate(Box::new(predicate))))
    }

    /// Expect an error signal and hand it to `consumer`. Panics inside the
    /// consumer are recorded as script failures, with the panic message as
    /// the failure text. Builds the [`Verifier`].
    pub fn consume_error_with(self, consumer: impl Fn(&Cause) + Send + 'static) -> Verifier<T> {
        self.finish(Step::Error(ErrorExpectation::Consume(Box::new(consumer))))
    }

    /// Cancel the subscription after the previous expectations. Builds the
    /// [`Verifier`].
    pub fn then_cancel(self) -> Verifier<T> {
        self.finish(Step::Cancel)
    }

    fn finish(mut self, terminal: Step<T>) -> Verifier<T> {
        debug_assert!(terminal.is_terminal());
        self.steps.push(terminal);
        Verifier::build(self.steps, self.demand)
    }
}

impl<T: Send + fmt::Debug + 'static> Default for Scenario<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn short_type_name<E>() -> &'static str {
    let name = type_name::<E>();
    name.rsplit("::").next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "demand of at least 1")]
    fn then_request_rejects_zero() {
        let _ = Scenario::<u32>::new().then_request(0);
    }

    #[test]
    fn short_type_names_drop_the_module_path() {
        assert_eq!(short_type_name::<std::io::Error>(), "Error");
        assert_eq!(short_type_name::<u32>(), "u32");
    }

    #[test]
    fn with_demand_zero_is_allowed() {
        let verifier = Scenario::<u32>::with_demand(0)
            .then_request(1)
            .expect_next(1)
            .expect_complete();
        let _ = verifier;
    }
}
