//! Deterministic verification of a time-dependent publisher.
//!
//! Run with: `cargo run --example virtual-time`

use std::{sync::Arc, time::Duration};

use rehearse::{scheduler, Publisher, Scenario, Subscriber, Subscription};

const DAY: Duration = Duration::from_secs(86_400);

/// Emits one value after a delay on the timer scheduler, then completes.
/// Under virtual time the delay elapses only when the script advances the
/// clock.
struct DelayedValue<T> {
    value: T,
    delay: Duration,
}

struct Inert;

impl Subscription for Inert {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}

impl<T: Send + 'static> Publisher for DelayedValue<T> {
    type Item = T;

    fn subscribe(self, subscriber: Arc<dyn Subscriber<Item = T>>) {
        subscriber.on_subscribe(Arc::new(Inert));
        let value = self.value;
        scheduler::timer().schedule(
            self.delay,
            Box::new(move || {
                subscriber.on_next(value);
                subscriber.on_complete();
            }),
        );
    }
}

#[tokio::main]
async fn main() -> rehearse::Result {
    rehearse::enable_virtual_time(false);

    let duration = Scenario::new()
        .advance_time_by(3 * DAY)
        .expect_next("payday")
        .expect_complete()
        .verify(DelayedValue {
            value: "payday",
            delay: 2 * DAY,
        })
        .await?;
    println!("two virtual days verified in {duration:?} of wall time");

    rehearse::disable_virtual_time();
    Ok(())
}
