use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use lru::LruCache;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::query";

/// Cache key: procedure path plus the canonical JSON encoding of its input.
///
/// `serde_json` objects are key-sorted, so equal inputs always encode equally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    procedure: &'static str,
    input: String,
}

impl QueryKey {
    pub fn new(procedure: &'static str, input: &Value) -> Self {
        let input = match input {
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Self { procedure, input }
    }

    pub fn procedure(&self) -> &'static str {
        self.procedure
    }

    pub fn input(&self) -> Value {
        if self.input.is_empty() {
            return Value::Null;
        }
        serde_json::from_str(&self.input).unwrap_or(Value::Null)
    }
}

/// A resolved query result.
#[derive(Debug, Clone)]
pub struct CachedQuery {
    pub data: Value,
    pub updated_at: OffsetDateTime,
    fetched_at: Instant,
}

impl CachedQuery {
    pub fn fresh(data: Value) -> Self {
        Self {
            data,
            updated_at: OffsetDateTime::now_utc(),
            fetched_at: Instant::now(),
        }
    }
}

type SharedFetch<E> = Shared<BoxFuture<'static, Result<CachedQuery, E>>>;

enum Slot<E: Clone> {
    Ready(CachedQuery),
    Pending { epoch: u64, fetch: SharedFetch<E> },
}

struct Slots<E: Clone> {
    entries: LruCache<QueryKey, Slot<E>>,
    epochs: HashMap<&'static str, u64>,
}

impl<E: Clone> Slots<E> {
    fn epoch(&self, procedure: &'static str) -> u64 {
        self.epochs.get(procedure).copied().unwrap_or(0)
    }
}

/// Shared query-result cache with request deduplication and explicit invalidation.
///
/// Holds at most `limit` keys; the least recently used one is evicted first.
pub struct QueryCache<E: Clone> {
    enabled: bool,
    ttl: Duration,
    limit: NonZeroUsize,
    slots: Mutex<Slots<E>>,
}

impl<E> QueryCache<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(enabled: bool, ttl: Duration, limit: NonZeroUsize) -> Self {
        Self {
            enabled,
            ttl,
            limit,
            slots: Mutex::new(Slots {
                entries: LruCache::new(limit),
                epochs: HashMap::new(),
            }),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, Duration::ZERO, NonZeroUsize::MIN)
    }

    pub fn limit(&self) -> NonZeroUsize {
        self.limit
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return the cached result for `key`, joining an in-flight fetch or starting one.
    ///
    /// Failures are handed to every waiter and never stored.
    pub async fn fetch<F, Fut>(&self, key: QueryKey, fetch: F) -> Result<CachedQuery, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
    {
        if !self.enabled {
            return fetch().await.map(CachedQuery::fresh);
        }

        let (shared, epoch) = {
            let mut slots = mutex_lock(&self.slots, SOURCE, "fetch.lookup");
            let epoch = slots.epoch(key.procedure);
            match slots.entries.get(&key) {
                Some(Slot::Ready(cached)) if cached.fetched_at.elapsed() < self.ttl => {
                    metrics::counter!("chirp_query_cache_hit_total", "procedure" => key.procedure)
                        .increment(1);
                    debug!(procedure = key.procedure, outcome = "hit", "query cache");
                    return Ok(cached.clone());
                }
                Some(Slot::Pending { epoch, fetch }) => {
                    debug!(procedure = key.procedure, outcome = "joined", "query cache");
                    (fetch.clone(), *epoch)
                }
                _ => {
                    metrics::counter!("chirp_query_cache_miss_total", "procedure" => key.procedure)
                        .increment(1);
                    debug!(procedure = key.procedure, outcome = "miss", "query cache");
                    let shared = fetch().map(|result| result.map(CachedQuery::fresh)).boxed().shared();
                    let evicted = slots.entries.push(
                        key.clone(),
                        Slot::Pending {
                            epoch,
                            fetch: shared.clone(),
                        },
                    );
                    if let Some((evicted, _)) = evicted.filter(|(evicted, _)| evicted != &key) {
                        metrics::counter!(
                            "chirp_query_cache_evicted_total",
                            "procedure" => evicted.procedure
                        )
                        .increment(1);
                        debug!(procedure = evicted.procedure, "query cache evicted");
                    }
                    (shared, epoch)
                }
            }
        };

        let result = shared.clone().await;
        self.settle(&key, epoch, &shared, &result);
        result
    }

    /// Drop every cached or in-flight result of `procedure`.
    ///
    /// Fetches that started before this call still resolve for their waiters but are
    /// not stored, so the next read goes back to the source.
    pub fn invalidate(&self, procedure: &'static str) {
        let mut slots = mutex_lock(&self.slots, SOURCE, "invalidate");
        *slots.epochs.entry(procedure).or_insert(0) += 1;
        let stale: Vec<QueryKey> = slots
            .entries
            .iter()
            .filter(|(key, _)| key.procedure == procedure)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            slots.entries.pop(key);
        }
        debug!(procedure, "query cache invalidated");
    }

    pub fn clear(&self) {
        let mut slots = mutex_lock(&self.slots, SOURCE, "clear");
        for epoch in slots.epochs.values_mut() {
            *epoch += 1;
        }
        slots.entries.clear();
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.slots, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn settle(
        &self,
        key: &QueryKey,
        epoch: u64,
        shared: &SharedFetch<E>,
        result: &Result<CachedQuery, E>,
    ) {
        let mut slots = mutex_lock(&self.slots, SOURCE, "fetch.settle");
        if slots.epoch(key.procedure) != epoch {
            return;
        }

        let still_pending = matches!(
            slots.entries.peek(key),
            Some(Slot::Pending { fetch, .. }) if fetch.ptr_eq(shared)
        );
        if !still_pending {
            return;
        }

        match result {
            Ok(cached) => {
                slots.entries.put(key.clone(), Slot::Ready(cached.clone()));
            }
            Err(_) => {
                slots.entries.pop(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;

    const FEED: &str = "posts.getAll";
    const BY_USER: &str = "posts.getPostsByUserId";
    const LIMIT: NonZeroUsize = NonZeroUsize::new(64).expect("non-zero");

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: Value,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Value, String>> {
        let calls = calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
            .boxed()
        }
    }

    #[test]
    fn key_is_insensitive_to_object_field_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).expect("json");
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).expect("json");
        assert_eq!(QueryKey::new(FEED, &a), QueryKey::new(FEED, &b));
        assert_eq!(QueryKey::new(FEED, &a).input(), a);
        assert_eq!(QueryKey::new(FEED, &Value::Null).input(), Value::Null);
    }

    #[tokio::test]
    async fn caches_until_invalidated() {
        let cache = QueryCache::<String>::new(true, Duration::from_secs(60), LIMIT);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new(FEED, &Value::Null);

        let first = cache
            .fetch(key.clone(), counting_fetch(&calls, json!([1])))
            .await
            .expect("first");
        let second = cache
            .fetch(key.clone(), counting_fetch(&calls, json!([2])))
            .await
            .expect("second");
        assert_eq!(first.data, json!([1]));
        assert_eq!(second.data, json!([1]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate(FEED);
        let third = cache
            .fetch(key, counting_fetch(&calls, json!([3])))
            .await
            .expect("third");
        assert_eq!(third.data, json!([3]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_identical_queries_share_one_fetch() {
        let cache = Arc::new(QueryCache::<String>::new(true, Duration::from_secs(60), LIMIT));
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let key = QueryKey::new(FEED, &Value::Null);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            let gate = gate.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .fetch(key, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok::<_, String>(json!("shared"))
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_one();

        for handle in handles {
            let result = handle.await.expect("join").expect("fetch");
            assert_eq!(result.data, json!("shared"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_started_before_invalidation_is_not_stored() {
        let cache = Arc::new(QueryCache::<String>::new(true, Duration::from_secs(60), LIMIT));
        let gate = Arc::new(Notify::new());
        let key = QueryKey::new(FEED, &Value::Null);

        let stale = {
            let cache = cache.clone();
            let gate = gate.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .fetch(key, move || async move {
                        gate.notified().await;
                        Ok::<_, String>(json!("before write"))
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.invalidate(FEED);
        gate.notify_one();
        let stale = stale.await.expect("join").expect("fetch");
        assert_eq!(stale.data, json!("before write"));

        let calls = Arc::new(AtomicUsize::new(0));
        let fresh = cache
            .fetch(key, counting_fetch(&calls, json!("after write")))
            .await
            .expect("fresh");
        assert_eq!(fresh.data, json!("after write"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = QueryCache::<String>::new(true, Duration::from_secs(60), LIMIT);
        let key = QueryKey::new(FEED, &Value::Null);

        let err = cache
            .fetch(key.clone(), || async { Err::<Value, _>("boom".to_string()) })
            .await
            .expect_err("failure");
        assert_eq!(err, "boom");
        assert!(cache.is_empty());

        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .fetch(key, counting_fetch(&calls, json!(1)))
            .await
            .expect("retry");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn least_recently_used_key_is_evicted_at_the_limit() {
        let limit = NonZeroUsize::new(2).expect("non-zero");
        let cache = QueryCache::<String>::new(true, Duration::from_secs(60), limit);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = |user: &str| QueryKey::new(BY_USER, &json!({ "userId": user }));

        for user in ["u1", "u2"] {
            cache
                .fetch(key(user), counting_fetch(&calls, json!(user)))
                .await
                .expect("fetch");
        }
        cache
            .fetch(key("u1"), counting_fetch(&calls, json!("again")))
            .await
            .expect("hit");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cache
            .fetch(key("u3"), counting_fetch(&calls, json!("u3")))
            .await
            .expect("fetch");
        assert_eq!(cache.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let u1 = cache
            .fetch(key("u1"), counting_fetch(&calls, json!("refetched")))
            .await
            .expect("still cached");
        assert_eq!(u1.data, json!("u1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let u2 = cache
            .fetch(key("u2"), counting_fetch(&calls, json!("refetched")))
            .await
            .expect("evicted");
        assert_eq!(u2.data, json!("refetched"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn disabled_cache_always_fetches() {
        let cache = QueryCache::<String>::disabled();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            cache
                .fetch(QueryKey::new(FEED, &Value::Null), counting_fetch(&calls, json!(1)))
                .await
                .expect("fetch");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }
}
