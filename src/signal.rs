use std::fmt;

use crate::flow::Cause;

/// A signal received from the publisher, buffered until the driver matches
/// it against the script.
///
/// `Subscribed` is produced exactly once per subscription and always
/// precedes every other signal in the queue; the subscription handle itself
/// is stored by the collector, not carried here.
pub(crate) enum Signal<T> {
    Subscribed,
    Next(T),
    Error(Cause),
    Complete,
}

impl<T: fmt::Debug> Signal<T> {
    /// Short form used in failure messages, e.g. `on_next("bar")`.
    pub(crate) fn describe(&self) -> String {
        match self {
            Signal::Subscribed => "on_subscribe".to_string(),
            Signal::Next(value) => format!("on_next({value:?})"),
            Signal::Error(cause) => format!("on_error({cause})"),
            Signal::Complete => "on_complete()".to_string(),
        }
    }

    /// True for the signals that end a subscription.
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, Signal::Error(_) | Signal::Complete)
    }
}
