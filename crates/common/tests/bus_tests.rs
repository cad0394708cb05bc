//! Subscription bus integration tests
//!
//! Exercises the bus together with a thread-served dispatch queue:
//! per-subscriber ordering, subscription churn while publishing, and the
//! channel-backed stream.
//!
//! Run with: `cargo test -p common --test bus_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, with_timeout};
use common::{DispatchQueue, SubscriptionBus};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

/// Block until every job queued so far on `queue` has run
fn flush(queue: &DispatchQueue) {
    let (tx, rx) = mpsc::channel();
    queue.dispatch(move || {
        let _ = tx.send(());
    });
    rx.recv_timeout(DEFAULT_TEST_TIMEOUT)
        .expect("dispatch queue did not flush");
}

#[test]
fn test_each_subscriber_sees_publish_order() {
    let (queue, _handle) = DispatchQueue::spawn("bus-order").unwrap();
    let bus = SubscriptionBus::new(0u32, queue.clone());

    let logs: Vec<Arc<Mutex<Vec<u32>>>> = (0..4).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    let _subs: Vec<_> = logs
        .iter()
        .map(|log| {
            let log = log.clone();
            bus.subscribe(move |v| log.lock().unwrap().push(v))
        })
        .collect();

    for i in 1..=200 {
        bus.publish(i);
    }
    flush(&queue);

    let expected: Vec<u32> = (0..=200).collect();
    for log in &logs {
        assert_eq!(*log.lock().unwrap(), expected);
    }
}

#[test]
fn test_late_subscribers_see_monotonic_suffix() {
    let (queue, _handle) = DispatchQueue::spawn("bus-churn").unwrap();
    let bus = SubscriptionBus::new(0u32, queue.clone());

    let publisher = {
        let bus = bus.clone();
        thread::spawn(move || {
            for i in 1..=500 {
                bus.publish(i);
            }
        })
    };

    let mut logs = Vec::new();
    let mut subs = Vec::new();
    for _ in 0..20 {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        subs.push(bus.subscribe(move |v| sink.lock().unwrap().push(v)));
        logs.push(log);
        thread::yield_now();
    }

    publisher.join().unwrap();
    flush(&queue);

    for log in &logs {
        let log = log.lock().unwrap();
        assert!(!log.is_empty(), "subscriber never received current value");
        assert!(log.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(*log.last().unwrap(), 500);
    }
}

#[test]
fn test_dropped_subscription_stops_delivery() {
    let queue = DispatchQueue::manual("bus-drop");
    let bus = SubscriptionBus::new("a".to_string(), queue.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = bus.subscribe(move |v: String| sink.lock().unwrap().push(v));
    queue.drain();
    drop(sub);

    bus.publish("b".to_string());
    queue.drain();

    assert_eq!(*seen.lock().unwrap(), vec!["a".to_string()]);
    assert_eq!(bus.current(), "b");
}

#[tokio::test]
async fn test_watch_receives_from_spawned_queue() {
    let (queue, _handle) = DispatchQueue::spawn("bus-watch").unwrap();
    let bus = SubscriptionBus::new(1u8, queue);
    let mut stream = bus.watch();

    bus.publish(2);
    bus.publish(3);

    let mut got = Vec::new();
    for _ in 0..3 {
        let value = with_timeout(DEFAULT_TEST_TIMEOUT, stream.recv())
            .await
            .expect("timed out waiting for state");
        got.push(value.unwrap());
    }
    assert_eq!(got, vec![1, 2, 3]);
}

#[test]
fn test_unsubscribe_from_inside_callback() {
    let (queue, _handle) = DispatchQueue::spawn("bus-reentrant").unwrap();
    let bus = SubscriptionBus::new(0u32, queue.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let token = Arc::new(Mutex::new(None));
    let subscription = {
        let bus = bus.clone();
        let seen = seen.clone();
        let token = token.clone();
        bus.clone().subscribe(move |v| {
            seen.lock().unwrap().push(v);
            if v == 1 {
                if let Some(t) = token.lock().unwrap().take() {
                    assert!(bus.unsubscribe(t));
                }
            }
        })
    };
    *token.lock().unwrap() = subscription.into_token();

    bus.publish(1);
    flush(&queue);
    bus.publish(2);
    flush(&queue);

    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    assert_eq!(bus.subscriber_count(), 0);
}
