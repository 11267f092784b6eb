//! Integration Tests for the Shared Cache Handle
//!
//! Exercises fetch-through deduplication, stale-while-refresh, disposal
//! notification and periodic reaping through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mini_lru::{Cache, CacheError, DisposeReason};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Events = Arc<Mutex<Vec<(String, String, DisposeReason)>>>;

// == Helper Functions ==

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mini_lru=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Cache whose fetcher counts calls and answers after `delay`.
fn slow_cache(calls: Arc<AtomicUsize>, delay: Duration) -> Cache<String, String> {
    init_tracing();
    Cache::builder()
        .max_entries(100)
        .fetcher(move |key: String| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(Some(format!("value-for-{}", key)))
            }
        })
        .build()
        .unwrap()
}

fn recorder() -> (Events, impl Fn(&String, &String, DisposeReason) + Send + Sync + 'static) {
    let events: Events = Arc::default();
    let sink = events.clone();
    let observer = move |key: &String, value: &String, reason: DisposeReason| {
        sink.lock().push((key.clone(), value.clone(), reason));
    };
    (events, observer)
}

fn s(value: &str) -> String {
    value.to_string()
}

// == Fetch Deduplication ==

#[tokio::test(start_paused = true)]
async fn test_concurrent_fetch_calls_population_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = slow_cache(calls.clone(), Duration::from_millis(50));

    let (a, b, c) = tokio::join!(
        cache.fetch(s("k")),
        cache.fetch(s("k")),
        cache.fetch(s("k"))
    );

    assert_eq!(assert_ok!(a), Some(s("value-for-k")));
    assert_eq!(assert_ok!(b), Some(s("value-for-k")));
    assert_eq!(assert_ok!(c), Some(s("value-for-k")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("k"), Some(s("value-for-k")));
    assert_eq!(cache.stats().fetches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_fetch_independently() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = slow_cache(calls.clone(), Duration::from_millis(50));

    let (a, b) = tokio::join!(cache.fetch(s("a")), cache.fetch(s("b")));

    assert_eq!(assert_ok!(a), Some(s("value-for-a")));
    assert_eq!(assert_ok!(b), Some(s("value-for-b")));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_fetch_across_threads_calls_population_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = slow_cache(calls.clone(), Duration::from_millis(50));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.fetch(s("shared")).await })
        })
        .collect();

    for handle in handles {
        let value = assert_ok!(handle.await.expect("fetch task panicked"));
        assert_eq!(value, Some(s("value-for-shared")));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_reaches_every_joined_caller() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let cache: Cache<String, String> = Cache::builder()
        .max_entries(10)
        .fetcher(move |_key: String| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if attempt == 0 {
                    Err(anyhow::anyhow!("upstream down"))
                } else {
                    Ok(Some(s("recovered")))
                }
            }
        })
        .build()
        .unwrap();

    let (a, b) = tokio::join!(cache.fetch(s("k")), cache.fetch(s("k")));
    let (a, b) = (assert_err!(a), assert_err!(b));

    match (&a, &b) {
        (CacheError::Fetch(a), CacheError::Fetch(b)) => assert!(Arc::ptr_eq(a, b)),
        other => panic!("expected shared fetch errors, got {:?}", other),
    }
    assert!(a.to_string().contains("upstream down"));
    assert!(cache.is_empty(), "a failed population must not store anything");
    assert_eq!(cache.stats().fetch_failures, 1);

    // No automatic retry; the next call starts a fresh population.
    assert_eq!(assert_ok!(cache.fetch(s("k")).await), Some(s("recovered")));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_panic_reaches_every_joined_caller() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let cache: Cache<String, String> = Cache::builder()
        .max_entries(10)
        .fetcher(move |_key: String| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if attempt == 0 {
                    panic!("population blew up");
                }
                Ok(Some(s("ok")))
            }
        })
        .build()
        .unwrap();

    let (a, b) = tokio::join!(cache.fetch(s("k")), cache.fetch(s("k")));

    assert!(matches!(assert_err!(a), CacheError::PopulationAborted(_)));
    assert!(matches!(assert_err!(b), CacheError::PopulationAborted(_)));
    assert!(cache.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The panicked population is unregistered, so a new one starts.
    assert_eq!(assert_ok!(cache.fetch(s("k")).await), Some(s("ok")));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_caller_does_not_cancel_population() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = slow_cache(calls.clone(), Duration::from_millis(50));

    let caller = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.fetch(s("k")).await })
    };
    while cache.stats().fetches == 0 {
        tokio::task::yield_now().await;
    }
    caller.abort();

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(cache.peek("k"), Some(s("value-for-k")));
    assert_eq!(assert_ok!(cache.fetch(s("k")).await), Some(s("value-for-k")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// == Stale Handling ==

#[tokio::test(start_paused = true)]
async fn test_fetch_allow_stale_returns_old_value_and_refreshes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = slow_cache(calls.clone(), Duration::from_secs(1));

    cache.set(s("k"), s("old"), Some(Duration::from_millis(50)));
    tokio::time::advance(Duration::from_millis(60)).await;

    let started = Instant::now();
    let value = assert_ok!(cache.fetch_allow_stale(s("k")).await);
    assert_eq!(value, Some(s("old")));
    assert!(started.elapsed() < Duration::from_millis(1), "stale fetch must not wait");

    // Refresh still in flight: the stale entry is untouched.
    assert_eq!(cache.get_allow_stale("k"), Some(s("old")));

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(cache.get("k"), Some(s("value-for-k")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_replaces_stale_entry_without_allowance() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = slow_cache(calls.clone(), Duration::from_millis(10));

    cache.set(s("k"), s("old"), Some(Duration::from_millis(50)));
    tokio::time::advance(Duration::from_millis(60)).await;

    assert_eq!(assert_ok!(cache.fetch(s("k")).await), Some(s("value-for-k")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_without_fetcher_drops_stale_entry() {
    let (events, observer) = recorder();
    let cache: Cache<String, String> = Cache::builder()
        .max_entries(10)
        .dispose(observer)
        .build()
        .unwrap();

    cache.set(s("k"), s("old"), Some(Duration::from_millis(50)));
    tokio::time::advance(Duration::from_millis(60)).await;

    assert_eq!(assert_ok!(cache.fetch_allow_stale(s("k")).await), Some(s("old")));
    assert_eq!(cache.len(), 1);

    assert_eq!(assert_ok!(cache.fetch(s("k")).await), None);
    assert!(cache.is_empty());
    assert_eq!(*events.lock(), vec![(s("k"), s("old"), DisposeReason::Expire)]);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_and_remaining_ttl() {
    let cache: Cache<String, String> = Cache::new(10);

    cache.set(s("k"), s("v"), Some(Duration::from_millis(100)));
    cache.set(s("forever"), s("v"), None);

    assert_eq!(cache.remaining_ttl("k"), Duration::from_millis(100));
    tokio::time::advance(Duration::from_millis(30)).await;
    assert_eq!(cache.remaining_ttl("k"), Duration::from_millis(70));
    assert!(cache.has("k"));

    tokio::time::advance(Duration::from_millis(70)).await;
    assert_eq!(cache.remaining_ttl("k"), Duration::ZERO);
    assert!(!cache.has("k"));
    assert_eq!(cache.get("k"), None);

    assert_eq!(cache.remaining_ttl("forever"), Duration::ZERO);
    assert_eq!(cache.remaining_ttl("missing"), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_default_ttl_applies_to_fetched_values() {
    let cache: Cache<String, String> = Cache::builder()
        .max_entries(10)
        .default_ttl(Duration::from_millis(100))
        .fetcher(|key: String| async move { Ok(Some(key)) })
        .build()
        .unwrap();

    assert_ok!(cache.fetch(s("k")).await);
    assert_eq!(cache.remaining_ttl("k"), Duration::from_millis(100));
}

// == Disposal ==

#[tokio::test]
async fn test_disposal_reasons() {
    let (events, observer) = recorder();
    let cache: Cache<String, String> = Cache::builder()
        .max_entries(2)
        .dispose(observer)
        .build()
        .unwrap();

    cache.set(s("k1"), s("v1"), None);
    cache.set(s("k2"), s("v2"), None);
    cache.set(s("k3"), s("v3"), None);
    cache.set(s("k2"), s("v2b"), None);
    cache.delete("k3");

    assert_eq!(
        *events.lock(),
        vec![
            (s("k1"), s("v1"), DisposeReason::Evict),
            (s("k2"), s("v2"), DisposeReason::Set),
            (s("k3"), s("v3"), DisposeReason::Delete),
        ]
    );
}

#[tokio::test]
async fn test_size_bounded_cache_with_fetch() {
    let cache: Cache<String, String> = Cache::builder()
        .max_size(10)
        .size_fn(|value: &String, _key: &String| value.len())
        .fetcher(|key: String| async move { Ok(Some(key.repeat(5))) })
        .build()
        .unwrap();

    assert_ok!(cache.fetch(s("a")).await);
    assert_ok!(cache.fetch(s("b")).await);
    assert_eq!(cache.total_size(), 10);

    assert_ok!(cache.fetch(s("c")).await);
    assert_eq!(cache.total_size(), 10);
    assert_eq!(cache.keys().collect::<Vec<_>>(), vec![s("c"), s("b")]);
}

#[test]
fn test_dispose_panic_propagates_and_cache_stays_usable() {
    let cache: Cache<String, String> = Cache::builder()
        .max_entries(1)
        .dispose(|_key: &String, _value: &String, reason| {
            if reason == DisposeReason::Evict {
                panic!("observer failure");
            }
        })
        .build()
        .unwrap();

    cache.set(s("a"), s("1"), None);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        cache.set(s("b"), s("2"), None);
    }));

    assert!(result.is_err());
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("b"), Some(s("2")));
    assert!(!cache.has("a"));
}

// == Reaping ==

#[tokio::test(start_paused = true)]
async fn test_periodic_reaping_removes_expired_entries() {
    init_tracing();
    let (events, observer) = recorder();
    let cache: Cache<String, String> = Cache::builder()
        .max_entries(10)
        .dispose(observer)
        .reap_interval(Duration::from_millis(100))
        .build()
        .unwrap();
    assert!(cache.is_reaping());

    cache.set(s("short"), s("1"), Some(Duration::from_millis(50)));
    cache.set(s("long"), s("2"), Some(Duration::from_secs(10)));

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(cache.len(), 1);
    assert!(cache.has("long"));
    assert_eq!(*events.lock(), vec![(s("short"), s("1"), DisposeReason::Expire)]);

    assert!(cache.stop_reaping());
    assert!(!cache.is_reaping());

    cache.set(s("again"), s("3"), Some(Duration::from_millis(50)));
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(cache.len(), 2, "no reaping after stop");

    assert_eq!(cache.reap(), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_reaping_at_runtime() {
    let cache: Cache<String, String> = Cache::new(10);
    assert!(!cache.is_reaping());

    assert_ok!(cache.start_reaping(Duration::from_millis(20)));
    assert!(cache.is_reaping());

    cache.set(s("k"), s("v"), Some(Duration::from_millis(10)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache.is_empty());

    assert_ok!(cache.start_reaping(Duration::ZERO));
    assert!(!cache.is_reaping());
}

// == Iteration ==

#[tokio::test]
async fn test_iteration_follows_recency_and_skips_stale() {
    let cache: Cache<String, u32> = Cache::new(10);

    cache.set(s("k1"), 1, None);
    cache.set(s("k2"), 2, None);
    cache.set(s("k3"), 3, None);
    cache.get("k1");

    let entries: Vec<_> = cache.entries().collect();
    assert_eq!(entries, vec![(s("k1"), 1), (s("k3"), 3), (s("k2"), 2)]);

    cache.set(s("gone"), 4, Some(Duration::from_millis(1)));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(cache.keys().count(), 3);
    assert_eq!(cache.len(), 4, "iteration must not remove stale entries");
}
