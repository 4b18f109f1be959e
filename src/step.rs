use std::{collections::VecDeque, fmt, time::Duration};

use crate::flow::Cause;

pub(crate) type EqualityFn<T> = Box<dyn Fn(&T, &T) -> bool + Send>;
pub(crate) type ValuePredicate<T> = Box<dyn Fn(&T) -> bool + Send>;
pub(crate) type ValueConsumer<T> = Box<dyn Fn(&T) + Send>;
pub(crate) type ErrorPredicate = Box<dyn Fn(&Cause) -> bool + Send>;
pub(crate) type ErrorConsumer = Box<dyn Fn(&Cause) + Send>;
pub(crate) type Task = Box<dyn FnOnce() + Send>;

/// One entry of the script: either an expectation matched against received
/// signals, or a control action executed without consuming a signal.
///
/// The set is closed; the builder in [`Scenario`](crate::Scenario) is the
/// only producer. Compound steps (`NextEqual`, `NextCount`) carry their own
/// progress and consume several signals before the cursor advances.
pub(crate) enum Step<T> {
    NextEqual {
        values: VecDeque<T>,
        equals: EqualityFn<T>,
    },
    NextWith {
        predicate: ValuePredicate<T>,
    },
    NextConsume {
        consumer: ValueConsumer<T>,
    },
    NextCount {
        remaining: u64,
    },
    Complete,
    Error(ErrorExpectation),
    Request(u64),
    Cancel,
    Run(Task),
    AdvanceTime,
    AdvanceTimeBy(Duration),
    AdvanceTimeTo(Duration),
}

impl<T: fmt::Debug> Step<T> {
    /// Short form used in failure messages, mirroring
    /// [`Signal::describe`](crate::signal::Signal::describe). Compound steps
    /// describe the next signal they are waiting for.
    pub(crate) fn describe(&self) -> String {
        match self {
            Step::NextEqual { values, .. } => match values.front() {
                Some(value) => format!("on_next({value:?})"),
                None => "on_next(<no further values>)".to_string(),
            },
            Step::NextWith { .. } => "on_next(<predicate>)".to_string(),
            Step::NextConsume { .. } => "on_next(<consumer>)".to_string(),
            Step::NextCount { remaining } => {
                format!("on_next(<{remaining} signal(s)>)")
            }
            Step::Complete => "on_complete()".to_string(),
            Step::Error(expectation) => expectation.describe(),
            Step::Request(n) => format!("request({n})"),
            Step::Cancel => "cancel()".to_string(),
            Step::Run(_) => "run(<task>)".to_string(),
            Step::AdvanceTime => "advance_time()".to_string(),
            Step::AdvanceTimeBy(d) => format!("advance_time_by({d:?})"),
            Step::AdvanceTimeTo(t) => format!("advance_time_to({t:?})"),
        }
    }

    /// True for steps that close the script: a terminal-signal expectation
    /// or `then_cancel`.
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, Step::Complete | Step::Error(_) | Step::Cancel)
    }

    /// True for control actions, which execute without consuming a signal.
    pub(crate) fn is_control(&self) -> bool {
        matches!(
            self,
            Step::Request(_)
                | Step::Cancel
                | Step::Run(_)
                | Step::AdvanceTime
                | Step::AdvanceTimeBy(_)
                | Step::AdvanceTimeTo(_)
        )
    }
}

/// How an `expect_error*` terminal step matches the received error.
pub(crate) enum ErrorExpectation {
    Any,
    OfType {
        name: &'static str,
        matches: Box<dyn Fn(&Cause) -> bool + Send>,
    },
    Message(String),
    Predicate(ErrorPredicate),
    Consume(ErrorConsumer),
}

impl ErrorExpectation {
    pub(crate) fn describe(&self) -> String {
        match self {
            ErrorExpectation::Any => "on_error(<any>)".to_string(),
            ErrorExpectation::OfType { name, .. } => format!("on_error(<type {name}>)"),
            ErrorExpectation::Message(message) => format!("on_error(<message {message:?}>)"),
            ErrorExpectation::Predicate(_) => "on_error(<predicate>)".to_string(),
            ErrorExpectation::Consume(_) => "on_error(<consumer>)".to_string(),
        }
    }
}

/// Extracts a human-readable message from a caught panic payload.
///
/// User-supplied consumers, predicates and tasks report failure by
/// panicking; `assert!`-style macros and explicit `panic!("...")` both
/// produce `String`/`&str` payloads, which are recorded verbatim.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "callback panicked with a non-string payload".to_string(),
        },
    }
}
