//! # Rehearse
//!
//! Scripted expectation verification for reactive stream publishers.
//!
//! Declare, in advance, the exact sequence of values, errors, completions
//! and control actions a publisher is expected to produce; then subscribe
//! and let the verifier assert that reality matches the script, while
//! participating correctly in the backpressure protocol. A virtual time
//! facility makes time-dependent publishers deterministic to test.
//!
//! ## Quick Start
//!
//! Build a script with [`Scenario`], commit it with a terminal expectation,
//! and run it against a publisher:
//!
//! ```rust
//! use rehearse::Scenario;
//!
//! let verifier = Scenario::new()
//!     .expect_next("foo")
//!     .expect_next("bar")
//!     .expect_complete();
//! # let _ = verifier;
//! ```
//!
//! ```rust,ignore
//! // `publisher` is anything implementing rehearse::Publisher.
//! let duration = verifier.verify(publisher).await?;
//! ```
//!
//! On a mismatch, `verify` returns an [`Error::Expectations`] aggregating
//! every failure observed during the run:
//!
//! ```text
//! Expectation failure(s):
//!  - expected value: "baz"; actual value: "bar"
//! ```
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Scenario`] | Sequence-phase builder accumulating expectations and control actions |
//! | [`Verifier`] | Built script; subscribes and runs it to the terminal state |
//! | [`Publisher`] / [`Subscriber`] / [`Subscription`] | The reactive-streams contract the verifier consumes |
//! | [`Error`] | Aggregated expectation failures and synchronous usage errors |
//! | [`scheduler`] | Scheduler factories and the process-wide virtual time toggle |
//! | [`VirtualScheduler`] | Deterministic clock + priority queue behind virtual time |
//!
//! ## Backpressure
//!
//! [`Scenario::with_demand`] fixes the demand requested on subscribe;
//! [`Scenario::then_request`] grows it mid-script. Requests are forwarded
//! upstream before the following expectation dequeues, so a script is the
//! single source of truth for when the publisher is allowed to emit:
//!
//! ```rust
//! use rehearse::Scenario;
//!
//! let verifier = Scenario::with_demand(0)
//!     .then_request(2)
//!     .expect_next_seq([1, 2])
//!     .then_request(1)
//!     .expect_next(3)
//!     .expect_complete();
//! # let _ = verifier;
//! ```
//!
//! ## Virtual Time
//!
//! Publishers that schedule through [`scheduler::timer`] become
//! deterministic once [`scheduler::enable_virtual_time`] is installed;
//! scripts then move the clock explicitly with
//! [`advance_time_by`](Scenario::advance_time_by) and friends. The toggle
//! is process-wide: enable it before building the scenario and disable it
//! on teardown.
//!
//! ```rust,ignore
//! rehearse::enable_virtual_time(false);
//!
//! let duration = Scenario::new()
//!     .advance_time_by(Duration::from_secs(3 * 86_400))
//!     .expect_next("foo")
//!     .expect_complete()
//!     .verify(delayed_by_two_days)
//!     .await?;
//!
//! rehearse::disable_virtual_time();
//! ```

mod collector;
mod engine;
mod error;
mod scenario;
mod signal;
mod step;
mod verifier;
mod virtual_scheduler;

pub mod flow;
pub mod scheduler;

#[cfg(test)]
mod support;

pub use error::Error;
pub use flow::{Cause, Publisher, Subscriber, Subscription};
pub use scenario::Scenario;
pub use scheduler::{disable_virtual_time, enable_virtual_time, Scheduler, TokioScheduler};
pub use verifier::Verifier;
pub use virtual_scheduler::VirtualScheduler;

/// Convenience alias for `Result<T, rehearse::Error>`.
pub type Result<T = ()> = std::result::Result<T, Error>;
