//! The reactive-streams contract consumed by the verifier.
//!
//! The verifier observes a publisher exclusively through these traits; it
//! brings no operator library of its own. Any source that honors the
//! protocol below can be verified:
//!
//! 1. At most one [`Subscriber::on_subscribe`], first, delivering a
//!    [`Subscription`].
//! 2. After `on_subscribe`, zero or more [`Subscriber::on_next`] calls, up
//!    to the cumulative demand passed to [`Subscription::request`].
//! 3. Optionally terminated by exactly one of [`Subscriber::on_complete`]
//!    or [`Subscriber::on_error`].
//! 4. After [`Subscription::cancel`], in-flight signals may still be
//!    delivered; the verifier ignores them.

use std::sync::Arc;

/// Error payload carried by [`Subscriber::on_error`].
///
/// `Arc` rather than `Box` so a single failure can be shared between the
/// publisher's bookkeeping and the verifier's failure report.
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// A producer of a potentially asynchronous sequence of values, terminated
/// by completion or error.
///
/// `subscribe` consumes the publisher: one publisher instance serves one
/// subscriber. Signals may be delivered synchronously from `subscribe`
/// itself or later from arbitrary threads, but must be serialized per
/// subscription.
pub trait Publisher {
    type Item: Send + 'static;

    fn subscribe(self, subscriber: Arc<dyn Subscriber<Item = Self::Item>>);
}

/// Receiver of the four reactive-streams callbacks.
///
/// Implementations must be callable from any thread the publisher chooses;
/// none of the callbacks may block.
pub trait Subscriber: Send + Sync {
    type Item;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
    fn on_next(&self, value: Self::Item);
    fn on_error(&self, cause: Cause);
    fn on_complete(&self);
}

/// Handle issued by the publisher granting the subscriber the ability to
/// request values or cancel.
///
/// `cancel` must be idempotent.
pub trait Subscription: Send + Sync {
    /// Adds `n` to the demand the publisher may deliver.
    fn request(&self, n: u64);

    /// Stops the flow of signals. In-flight signals may still arrive.
    fn cancel(&self);
}
