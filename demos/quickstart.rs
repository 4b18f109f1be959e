//! Verify a simple two-value publisher, then watch a mismatch get reported.
//!
//! Run with: `cargo run --example quickstart`

use std::sync::{Arc, Mutex};

use rehearse::{Publisher, Scenario, Subscriber, Subscription};

/// Minimal publisher: emits a fixed sequence on the first request, then
/// completes. Assumes the subscriber requested unbounded demand.
struct Just<T> {
    items: Vec<T>,
}

struct JustSubscription<T> {
    subscriber: Arc<dyn Subscriber<Item = T>>,
    items: Mutex<Option<Vec<T>>>,
}

impl<T: Send + 'static> Subscription for JustSubscription<T> {
    fn request(&self, _n: u64) {
        if let Some(items) = self.items.lock().unwrap().take() {
            for value in items {
                self.subscriber.on_next(value);
            }
            self.subscriber.on_complete();
        }
    }

    fn cancel(&self) {}
}

impl<T: Send + 'static> Publisher for Just<T> {
    type Item = T;

    fn subscribe(self, subscriber: Arc<dyn Subscriber<Item = T>>) {
        let subscription = Arc::new(JustSubscription {
            subscriber: subscriber.clone(),
            items: Mutex::new(Some(self.items)),
        });
        subscriber.on_subscribe(subscription);
    }
}

#[tokio::main]
async fn main() -> rehearse::Result {
    let duration = Scenario::new()
        .expect_next("foo")
        .expect_next("bar")
        .expect_complete()
        .verify(Just {
            items: vec!["foo", "bar"],
        })
        .await?;
    println!("matched in {duration:?}");

    // The same publisher against a script expecting the wrong value.
    let err = Scenario::new()
        .expect_next("foo")
        .expect_next("baz")
        .expect_complete()
        .verify(Just {
            items: vec!["foo", "bar"],
        })
        .await
        .unwrap_err();
    println!("{err}");

    Ok(())
}
