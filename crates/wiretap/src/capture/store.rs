//! Capture store: the exchange log and the wait-for-match machinery.

use super::query::{ActiveQuery, Criteria, ReleaseReason};
use crate::config::CaptureConfig;
use crate::exchange::Exchange;
use crate::metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Ordered log of completed exchanges plus at most one active query.
///
/// Every log mutation and every query evaluation happens under one lock, and a
/// satisfied waiter is released while that lock is still held.
pub struct CaptureStore {
    state: Mutex<StoreState>,
}

struct StoreState {
    base_url: String,
    /// Most recently completed first.
    log: VecDeque<Arc<Exchange>>,
    next_sequence: u64,
    next_generation: u64,
    active: Option<ActiveQuery>,
}

impl CaptureStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                base_url: base_url.into(),
                log: VecDeque::new(),
                next_sequence: 0,
                next_generation: 0,
                active: None,
            }),
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.base_url.clone())
    }

    pub fn base_url(&self) -> String {
        self.state.lock().base_url.clone()
    }

    /// Change the prefix joined with query paths. Affects waits started afterwards.
    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.state.lock().base_url = base_url.into();
    }

    /// Record a completed exchange and offer it to the active query.
    pub fn append(&self, mut exchange: Exchange) -> Arc<Exchange> {
        let mut state = self.state.lock();

        state.next_sequence += 1;
        exchange.set_sequence(state.next_sequence);
        let exchange = Arc::new(exchange);
        state.log.push_front(Arc::clone(&exchange));

        let satisfied = state
            .active
            .as_mut()
            .is_some_and(|query| query.offer(&exchange));
        if satisfied {
            if let Some(query) = state.active.take() {
                debug!(
                    "Query for {} {} satisfied by #{}",
                    query.criteria.method,
                    query.criteria.url,
                    exchange.sequence()
                );
                query.release(ReleaseReason::Satisfied);
            }
        }
        drop(state);

        let outcome = if exchange.error().is_some() {
            "error"
        } else {
            "response"
        };
        metrics::record_exchange(exchange.method().as_str(), outcome, exchange.duration_ms());
        info!("Captured {}", exchange);

        exchange
    }

    /// Wait for one exchange matching `path`, `method` and `since`.
    ///
    /// Returns `None` when nothing matched within `timeout`.
    pub async fn wait_for(
        &self,
        path: &str,
        method: &str,
        since: DateTime<Utc>,
        timeout: Duration,
    ) -> Option<Arc<Exchange>> {
        self.wait_for_many(path, method, since, timeout, 1)
            .await
            .into_iter()
            .next()
    }

    /// Wait until `required` exchanges match, or until `timeout`.
    ///
    /// Returns the matches accumulated when the wait ends, most recent first:
    /// exactly `required` when satisfied, fewer otherwise. A new wait started
    /// meanwhile replaces this one and releases it with what it had so far.
    pub async fn wait_for_many(
        &self,
        path: &str,
        method: &str,
        since: DateTime<Utc>,
        timeout: Duration,
        required: usize,
    ) -> Vec<Arc<Exchange>> {
        if required == 0 {
            return Vec::new();
        }

        let (mut rx, generation) = {
            let mut state = self.state.lock();
            let criteria = Criteria {
                url: format!("{}{}", state.base_url, path),
                method: method.to_string(),
                since,
                required,
            };

            let seed = criteria.prescan(&state.log);
            if seed.len() >= required {
                metrics::record_query("immediate");
                return seed;
            }

            debug!(
                "Waiting up to {:?} for {} x {} {} ({} already matched)",
                timeout,
                required,
                criteria.method,
                criteria.url,
                seed.len()
            );

            let (tx, rx) = oneshot::channel();
            state.next_generation += 1;
            let generation = state.next_generation;
            let query = ActiveQuery::new(generation, criteria, seed, tx);
            if let Some(previous) = state.active.replace(query) {
                previous.release(ReleaseReason::Replaced);
            }
            (rx, generation)
        };
        let _abandon = AbandonGuard {
            store: self,
            generation,
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(release)) => {
                metrics::record_query(release.reason.as_str());
                release.results
            }
            Ok(Err(_)) => Vec::new(),
            Err(_) => {
                let mut state = self.state.lock();
                if let Some(query) = state.active.take_if(|q| q.generation == generation) {
                    metrics::record_query("timeout");
                    debug!(
                        "Query for {} {} timed out with {}/{} matches",
                        query.criteria.method,
                        query.criteria.url,
                        query.results.len(),
                        required
                    );
                    return query.results;
                }
                drop(state);

                // Released between the timeout firing and taking the lock.
                match rx.try_recv() {
                    Ok(release) => {
                        metrics::record_query(release.reason.as_str());
                        release.results
                    }
                    Err(_) => Vec::new(),
                }
            }
        }
    }

    /// Release any waiter and forget all history.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if let Some(mut query) = state.active.take() {
            query.results.clear();
            query.release(ReleaseReason::Reset);
        }
        let cleared = state.log.len();
        state.log.clear();
        drop(state);
        info!("Capture store reset ({} exchanges cleared)", cleared);
    }

    /// Snapshot of the log, most recently completed first.
    pub fn exchanges(&self) -> Vec<Arc<Exchange>> {
        self.state.lock().log.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().log.is_empty()
    }

    pub fn has_active_query(&self) -> bool {
        self.state.lock().active.is_some()
    }
}

/// Uninstalls a wait's query when its future is dropped before the wait ended.
struct AbandonGuard<'a> {
    store: &'a CaptureStore,
    generation: u64,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        let generation = self.generation;
        let mut state = self.store.state.lock();
        if let Some(query) = state.active.take_if(|q| q.generation == generation) {
            drop(state);
            metrics::record_query("abandoned");
            debug!(
                "Query for {} {} abandoned by its waiter",
                query.criteria.method, query.criteria.url
            );
        }
    }
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::RequestSnapshot;
    use chrono::TimeDelta;
    use hyper::Method;

    fn get(url: &str, start: DateTime<Utc>) -> Exchange {
        Exchange::new(RequestSnapshot::new(Method::GET, url), start)
    }

    #[test]
    fn test_append_assigns_sequence_most_recent_first() {
        let store = CaptureStore::new("https://example.com/");
        let now = Utc::now();
        store.append(get("https://example.com/a", now));
        store.append(get("https://example.com/b", now));

        let log = store.exchanges();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].url(), "https://example.com/b");
        assert_eq!(log[0].sequence(), 2);
        assert_eq!(log[1].sequence(), 1);
    }

    #[tokio::test]
    async fn test_zero_required_returns_empty() {
        let store = CaptureStore::default();
        store.append(get("https://example.com/a", Utc::now()));
        let found = store
            .wait_for_many("a", "GET", Utc::now() - TimeDelta::seconds(5), Duration::from_secs(5), 0)
            .await;
        assert!(found.is_empty());
        assert!(!store.has_active_query());
    }

    #[tokio::test]
    async fn test_prescan_stops_at_older_exchange() {
        let store = CaptureStore::new("https://example.com/");
        let t0 = Utc::now();
        store.append(get("https://example.com/a", t0));
        store.append(get("https://example.com/b", t0 - TimeDelta::seconds(10)));

        // The head started before `since`, so the matching entry behind it is never reached.
        let found = store
            .wait_for("a", "GET", t0, Duration::from_millis(20))
            .await;
        assert!(found.is_none());
        assert!(!store.has_active_query());
    }

    #[tokio::test]
    async fn test_new_wait_replaces_previous() {
        let store = Arc::new(CaptureStore::new("https://example.com/"));
        let since = Utc::now();
        store.append(get("https://example.com/first", since));

        let waiting = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .wait_for_many("first", "GET", since, Duration::from_secs(5), 2)
                    .await
            })
        };
        while !store.has_active_query() {
            tokio::task::yield_now().await;
        }

        let second = store
            .wait_for("other", "GET", since, Duration::from_millis(10))
            .await;
        assert!(second.is_none());

        let replaced = waiting.await.unwrap();
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].url(), "https://example.com/first");
    }

    #[tokio::test]
    async fn test_reset_releases_waiter() {
        let store = Arc::new(CaptureStore::default());
        let waiting = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .wait_for("never", "GET", Utc::now(), Duration::from_secs(5))
                    .await
            })
        };
        while !store.has_active_query() {
            tokio::task::yield_now().await;
        }

        store.reset();
        assert!(waiting.await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_wait_uninstalls_query() {
        let store = CaptureStore::new("https://example.com/");
        let since = Utc::now();

        let outer = tokio::time::timeout(
            Duration::from_millis(20),
            store.wait_for("late", "GET", since, Duration::from_secs(10)),
        )
        .await;
        assert!(outer.is_err());
        assert!(!store.has_active_query());

        // A later append is only logged, and a fresh wait still sees it.
        store.append(get("https://example.com/late", Utc::now()));
        let found = store
            .wait_for("late", "GET", since, Duration::from_millis(50))
            .await;
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_dropped_replaced_wait_keeps_newer_query() {
        let store = Arc::new(CaptureStore::new("https://example.com/"));
        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .wait_for("first", "GET", Utc::now(), Duration::from_secs(10))
                    .await
            })
        };
        while !store.has_active_query() {
            tokio::task::yield_now().await;
        }

        let second = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .wait_for("second", "GET", Utc::now(), Duration::from_secs(10))
                    .await
            })
        };
        assert!(first.await.unwrap().is_none());
        while !store.has_active_query() {
            tokio::task::yield_now().await;
        }

        second.abort();
        assert!(second.await.unwrap_err().is_cancelled());
        assert!(!store.has_active_query());
    }

    #[test]
    fn test_set_base_url() {
        let store = CaptureStore::default();
        assert_eq!(store.base_url(), "https://example.com/");
        store.set_base_url("http://127.0.0.1:9000/");
        assert_eq!(store.base_url(), "http://127.0.0.1:9000/");
    }
}
