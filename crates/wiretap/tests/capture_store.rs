//! Capture store behaviour as seen by a test suite.

use chrono::{DateTime, Utc};
use hyper::{HeaderMap, Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiretap::{CaptureStore, Exchange, RequestSnapshot, ResponseSnapshot};

const BASE: &str = "https://example.com/";

fn exchange(method: Method, path: &str, start: DateTime<Utc>) -> Exchange {
    Exchange::new(RequestSnapshot::new(method, format!("{BASE}{path}")), start).with_response(
        ResponseSnapshot {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: bytes::Bytes::from_static(b"{}"),
        },
    )
}

#[tokio::test]
async fn test_already_captured_exchange_returns_immediately() {
    let store = CaptureStore::new(BASE);
    let t0 = Utc::now();
    store.append(exchange(Method::GET, "example", t0));

    let started = Instant::now();
    let found = store
        .wait_for("example", "GET", t0, Duration::from_secs(2))
        .await
        .expect("exchange should already be captured");

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(found.url(), "https://example.com/example");
    assert!(!store.has_active_query());
}

#[tokio::test]
async fn test_late_exchange_times_out() {
    let store = Arc::new(CaptureStore::new(BASE));
    let since = Utc::now();

    let producer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            store.append(exchange(Method::GET, "example", Utc::now()));
        })
    };

    let started = Instant::now();
    let found = store
        .wait_for("example", "GET", since, Duration::from_secs(1))
        .await;
    let elapsed = started.elapsed();

    assert!(found.is_none());
    assert!(elapsed >= Duration::from_millis(950), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "returned late: {elapsed:?}");
    assert!(!store.has_active_query());
    producer.abort();
}

#[tokio::test]
async fn test_wait_for_many_with_concurrent_producer() {
    let store = Arc::new(CaptureStore::new(BASE));
    let since = Utc::now();

    let producer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for path in ["multiple", "multiple2", "multiple3", "multiple", "multiple"] {
                tokio::time::sleep(Duration::from_millis(20)).await;
                store.append(exchange(Method::GET, path, Utc::now()));
            }
        })
    };

    let found = store
        .wait_for_many("multiple", "GET", since, Duration::from_secs(2), 3)
        .await;
    producer.await.unwrap();

    assert_eq!(found.len(), 3);
    assert!(found
        .iter()
        .all(|e| e.url() == "https://example.com/multiple"));
    let sequences: Vec<u64> = found.iter().map(|e| e.sequence()).collect();
    assert!(sequences.windows(2).all(|w| w[0] > w[1]), "most recent first");
}

#[tokio::test]
async fn test_partial_results_on_timeout() {
    let store = CaptureStore::new(BASE);
    let since = Utc::now();
    store.append(exchange(Method::GET, "multiple", since));
    store.append(exchange(Method::POST, "multiple", since));

    let found = store
        .wait_for_many("multiple", "GET", since, Duration::from_millis(100), 3)
        .await;

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].method(), Method::GET);
}

#[tokio::test]
async fn test_exchanges_before_since_are_ignored() {
    let store = CaptureStore::new(BASE);
    let earlier = Utc::now() - chrono::Duration::seconds(5);
    store.append(exchange(Method::GET, "example", earlier));

    let found = store
        .wait_for("example", "GET", Utc::now(), Duration::from_millis(100))
        .await;
    assert!(found.is_none());
}

#[tokio::test]
async fn test_reset_clears_history_and_releases_waiter() {
    let store = Arc::new(CaptureStore::new(BASE));
    let since = Utc::now();
    store.append(exchange(Method::GET, "example", since));

    let waiter = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store
                .wait_for_many("example", "GET", since, Duration::from_secs(5), 2)
                .await
        })
    };
    while !store.has_active_query() {
        tokio::task::yield_now().await;
    }

    let started = Instant::now();
    store.reset();
    let released = waiter.await.unwrap();
    assert!(released.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(store.is_empty());
    assert!(!store.has_active_query());

    let found = store
        .wait_for("example", "GET", since, Duration::from_millis(100))
        .await;
    assert!(found.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_are_matched_exactly_once() {
    const PRODUCERS: usize = 64;

    for _ in 0..10 {
        let store = Arc::new(CaptureStore::new(BASE));
        let since = Utc::now();

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .wait_for_many("burst", "GET", since, Duration::from_secs(5), PRODUCERS)
                    .await
            })
        };
        while !store.has_active_query() {
            tokio::task::yield_now().await;
        }

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.append(exchange(Method::GET, "burst", Utc::now()));
                    if i % 4 == 0 {
                        store.append(exchange(Method::POST, "burst", Utc::now()));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        let found = waiter.await.unwrap();
        assert_eq!(found.len(), PRODUCERS);
        let mut sequences: Vec<u64> = found.iter().map(|e| e.sequence()).collect();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), PRODUCERS, "duplicate match returned");
        assert!(found.iter().all(|e| e.method() == Method::GET));
        assert_eq!(store.len(), PRODUCERS + PRODUCERS / 4);
        assert!(!store.has_active_query());
    }
}
