//! Typed subscription bus
//!
//! Holds the current value of a piece of state and fans every published
//! value out to subscribers. Callbacks never run on the publisher's thread:
//! they are marshaled onto the bus's [`DispatchQueue`], which the consumer
//! designates when constructing the bus.
//!
//! Each subscriber sees values in the order they were published. Order
//! across subscribers is unspecified.
//!
//! # Example
//!
//! ```
//! use common::{DispatchQueue, SubscriptionBus};
//! use std::sync::{Arc, Mutex};
//!
//! let queue = DispatchQueue::manual("ui");
//! let bus = SubscriptionBus::new(0u32, queue.clone());
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let subscription = bus.subscribe(move |v| sink.lock().unwrap().push(v));
//!
//! bus.publish(1);
//! queue.drain();
//! assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
//!
//! drop(subscription);
//! assert_eq!(bus.subscriber_count(), 0);
//! ```

use crate::dispatch::DispatchQueue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::trace;

/// Opaque subscriber identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Inner<T> {
    current: T,
    subscribers: HashMap<SubscriptionToken, Callback<T>>,
    next_token: u64,
}

/// Thread-safe publish/subscribe hub for one value type
pub struct SubscriptionBus<T> {
    inner: Arc<Mutex<Inner<T>>>,
    queue: DispatchQueue,
}

impl<T> Clone for SubscriptionBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<T> SubscriptionBus<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(initial: T, queue: DispatchQueue) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                current: initial,
                subscribers: HashMap::new(),
                next_token: 1,
            })),
            queue,
        }
    }

    /// Last published value
    pub fn current(&self) -> T {
        self.lock().current.clone()
    }

    /// Register a callback
    ///
    /// The current value is queued for the new subscriber before this
    /// returns, ahead of anything published afterwards. Dropping the
    /// returned guard unsubscribes.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let mut inner = self.lock();

        let token = SubscriptionToken(inner.next_token);
        inner.next_token += 1;
        inner.subscribers.insert(token, callback.clone());

        let current = inner.current.clone();
        self.queue.dispatch(move || callback(current));

        trace!("Subscriber {:?} added ({} total)", token, inner.subscribers.len());

        Subscription {
            inner: Arc::downgrade(&self.inner),
            token: Some(token),
        }
    }

    /// Subscribe through an async channel instead of a callback
    pub fn watch(&self) -> StateStream<T> {
        let (tx, rx) = async_channel::unbounded();
        let subscription = self.subscribe(move |value| {
            let _ = tx.try_send(value);
        });
        StateStream {
            rx,
            _subscription: subscription,
        }
    }

    /// Remove a subscriber; no-op if it is already gone
    ///
    /// Returns whether an entry was removed. Values already queued for the
    /// subscriber may still be delivered.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        remove_subscriber(&self.inner, token)
    }

    /// Store `value` as current and queue it for every subscriber
    pub fn publish(&self, value: T) {
        let mut inner = self.lock();
        inner.current = value.clone();

        for callback in inner.subscribers.values() {
            let callback = callback.clone();
            let value = value.clone();
            self.queue.dispatch(move || callback(value));
        }

        trace!("Published to {} subscribers", inner.subscribers.len());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn remove_subscriber<T>(inner: &Mutex<Inner<T>>, token: SubscriptionToken) -> bool {
    let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let removed = inner.subscribers.remove(&token).is_some();
    if removed {
        trace!("Subscriber {:?} removed", token);
    }
    removed
}

/// Scoped subscription; unsubscribes on drop
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<T> {
    inner: Weak<Mutex<Inner<T>>>,
    token: Option<SubscriptionToken>,
}

impl<T> Subscription<T> {
    pub fn token(&self) -> Option<SubscriptionToken> {
        self.token
    }

    /// Keep the subscription alive past this guard
    ///
    /// The caller takes over the bookkeeping and releases it with
    /// [`SubscriptionBus::unsubscribe`].
    pub fn into_token(mut self) -> Option<SubscriptionToken> {
        self.token.take()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let (Some(token), Some(inner)) = (self.token.take(), self.inner.upgrade()) {
            remove_subscriber(&inner, token);
        }
    }
}

/// Channel-backed subscription for async consumers
pub struct StateStream<T> {
    rx: async_channel::Receiver<T>,
    _subscription: Subscription<T>,
}

impl<T> StateStream<T> {
    /// Next value; `None` once the bus side is gone
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_bus() -> (SubscriptionBus<u32>, DispatchQueue, Arc<Mutex<Vec<u32>>>) {
        let queue = DispatchQueue::manual("test");
        let bus = SubscriptionBus::new(0, queue.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        (bus, queue, seen)
    }

    #[test]
    fn test_subscribe_delivers_current_first() {
        let (bus, queue, seen) = recording_bus();
        bus.publish(7);

        let sink = seen.clone();
        let _sub = bus.subscribe(move |v| sink.lock().unwrap().push(v));
        bus.publish(8);

        queue.drain();
        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_callbacks_deferred_until_drain() {
        let (bus, queue, seen) = recording_bus();
        let sink = seen.clone();
        let _sub = bus.subscribe(move |v| sink.lock().unwrap().push(v));
        bus.publish(1);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(queue.drain(), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let (bus, _queue, _seen) = recording_bus();
        let token = bus.subscribe(|_| {}).into_token().unwrap();

        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.unsubscribe(token));
        assert!(!bus.unsubscribe(token));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_guard_drop_unsubscribes() {
        let (bus, queue, seen) = recording_bus();
        let sink = seen.clone();
        let sub = bus.subscribe(move |v| sink.lock().unwrap().push(v));
        queue.drain();

        drop(sub);
        bus.publish(5);
        queue.drain();

        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_guard_outliving_bus() {
        let (bus, _queue, _seen) = recording_bus();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        drop(sub);
    }

    #[tokio::test]
    async fn test_watch_stream() {
        let (bus, queue, _seen) = recording_bus();
        let mut stream = bus.watch();
        bus.publish(3);
        queue.drain();

        assert_eq!(stream.recv().await, Some(0));
        assert_eq!(stream.recv().await, Some(3));
        assert_eq!(stream.try_recv(), None);
    }
}
