//! Shared Cache Handle
//!
//! Thread-safe, cloneable front end over [`CacheStore`] that adds
//! deduplicated fetch-through and periodic reaping.
//!
//! # Locking
//! One mutex guards the store and the in-flight table. It is never held
//! across an `.await`, but it *is* held while the disposal observer runs and
//! while an [`Entries`] iterator is alive. Calling back into the same cache
//! from either place deadlocks.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheOptions, CacheStats, CacheStore, Cursor, Direction, DisposeReason, Lookup,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_reap_task, Reap};

/// Population function used by [`Cache::fetch`].
///
/// `Ok(None)` means "nothing to cache for this key".
pub type FetchFn<K, V> =
    Arc<dyn Fn(K) -> BoxFuture<'static, anyhow::Result<Option<V>>> + Send + Sync>;

type PendingFetch<V> = Shared<BoxFuture<'static, Result<Option<V>>>>;

struct Inflight<V> {
    id: u64,
    pending: PendingFetch<V>,
}

struct State<K, V> {
    store: CacheStore<K, V>,
    inflight: HashMap<K, Inflight<V>>,
    next_fetch_id: u64,
}

struct Inner<K, V> {
    state: Mutex<State<K, V>>,
    fetch_fn: Option<FetchFn<K, V>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> Drop for Inner<K, V> {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.get_mut().take() {
            handle.abort();
        }
    }
}

impl<K, V> Reap for Inner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn reap(&self) -> usize {
        self.state.lock().store.reap()
    }
}

// == Cache ==
/// Cloneable handle to a shared LRU cache.
///
/// All clones see the same entries. Every operation except `fetch` is
/// synchronous; `fetch` and periodic reaping need a Tokio runtime.
pub struct Cache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates a cache bounded by entry count, without TTL or fetch-through.
    pub fn new(max_entries: usize) -> Self {
        Self::from_parts(CacheOptions::new(max_entries), None)
    }

    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    fn from_parts(options: CacheOptions<K, V>, fetch_fn: Option<FetchFn<K, V>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    store: CacheStore::with_options(options),
                    inflight: HashMap::new(),
                    next_fetch_id: 0,
                }),
                fetch_fn,
                reaper: Mutex::new(None),
            }),
        }
    }

    // == Synchronous Operations ==
    /// Stores a value and marks it most recently used. See [`CacheStore::set`].
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        self.inner.state.lock().store.set(key, value, ttl);
    }

    /// Returns a clone of a live value and marks it most recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.state.lock().store.get(key).cloned()
    }

    /// Returns a value even if stale, without removing or promoting it.
    pub fn get_allow_stale<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.state.lock().store.get_allow_stale(key).cloned()
    }

    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.state.lock().store.peek(key).cloned()
    }

    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.state.lock().store.has(key)
    }

    pub fn delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.state.lock().store.delete(key)
    }

    /// Removes and returns the least recently used entry.
    pub fn pop(&self) -> Option<(K, V)> {
        self.inner.state.lock().store.pop()
    }

    /// Removes every entry and stops periodic reaping.
    ///
    /// In-flight populations keep running and store their result when done.
    pub fn clear(&self) {
        self.inner.state.lock().store.clear();
        self.stop_reaping();
    }

    /// Removes all stale entries now. Returns how many were removed.
    pub fn reap(&self) -> usize {
        self.inner.reap()
    }

    pub fn remaining_ttl<Q>(&self, key: &Q) -> Duration
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.state.lock().store.remaining_ttl(key)
    }

    /// Number of entries, stale ones included until they are removed.
    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_size(&self) -> usize {
        self.inner.state.lock().store.total_size()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.state.lock().store.stats()
    }

    // == Iteration ==
    /// Lazily yields clones of live entries from most to least recently used.
    ///
    /// The returned iterator holds the cache lock until dropped: do not call
    /// other methods of this cache (or await) while it is alive.
    pub fn entries(&self) -> Entries<'_, K, V> {
        Entries::new(self.inner.state.lock(), Direction::MostRecentFirst)
    }

    /// Same as [`Cache::entries`], from least to most recently used.
    pub fn iter_lru(&self) -> Entries<'_, K, V> {
        Entries::new(self.inner.state.lock(), Direction::LeastRecentFirst)
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.entries().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = V> + '_ {
        self.entries().map(|(_, value)| value)
    }

    // == Fetch ==
    /// Returns the cached value, populating it on a miss.
    ///
    /// Concurrent fetches of the same key share one population call and
    /// all observe its outcome. A successful non-empty result is stored
    /// like a `set` with the default TTL. Failures are returned to every
    /// waiting caller and leave the cache untouched.
    ///
    /// Dropping the returned future does not cancel the population.
    ///
    /// # Arguments
    /// * `key` - The key to look up and, on a miss, pass to the fetcher
    ///
    /// # Returns
    /// * `Ok(Some(value))` - Cached or freshly populated value
    /// * `Ok(None)` - No fetcher configured, or the fetcher had no value
    /// * `Err(CacheError::Fetch)` - The fetcher failed
    /// * `Err(CacheError::PopulationAborted)` - The population task panicked
    /// * `Err(CacheError::NoRuntime)` - A population was needed outside Tokio
    ///
    /// # Example
    /// ```ignore
    /// let cache = Cache::builder()
    ///     .max_entries(1000)
    ///     .fetcher(|id: u64| async move { db.load_user(id).await })
    ///     .build()?;
    /// let user = cache.fetch(42).await?;
    /// ```
    pub async fn fetch(&self, key: K) -> Result<Option<V>> {
        self.fetch_inner(key, false).await
    }

    /// Like [`Cache::fetch`], but a stale entry is returned immediately
    /// while a background population refreshes it.
    ///
    /// If the refresh cannot be started (no Tokio runtime) the stale value
    /// is still returned and the failure is logged.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    ///
    /// # Returns
    /// The fresh value, the stale value, or the outcome of a population
    /// when nothing was cached.
    pub async fn fetch_allow_stale(&self, key: K) -> Result<Option<V>> {
        self.fetch_inner(key, true).await
    }

    async fn fetch_inner(&self, key: K, allow_stale: bool) -> Result<Option<V>> {
        let pending = {
            let mut state = self.inner.state.lock();
            let stale = match state.store.lookup(&key) {
                Lookup::Fresh(value) => return Ok(Some(value.clone())),
                Lookup::Stale(value) => Some(value.clone()),
                Lookup::Missing => None,
            };

            if let Some(inflight) = state.inflight.get(&key) {
                debug!(fetch_id = inflight.id, "Joining in-flight population");
                inflight.pending.clone()
            } else {
                match (self.inner.fetch_fn.clone(), stale) {
                    (Some(fetch_fn), Some(stale)) if allow_stale => {
                        // The in-flight table keeps the refresh joinable.
                        if let Err(err) = self.start_population(&mut state, key, fetch_fn) {
                            warn!(error = %err, "Background refresh not started");
                        }
                        return Ok(Some(stale));
                    }
                    (None, Some(stale)) if allow_stale => return Ok(Some(stale)),
                    (None, stale) => {
                        if stale.is_some() {
                            state.store.purge_if_stale(&key);
                        }
                        return Ok(None);
                    }
                    (Some(fetch_fn), _) => self.start_population(&mut state, key, fetch_fn)?,
                }
            }
        };

        pending.await
    }

    /// Spawns the population task and registers it in the in-flight table.
    ///
    /// The task stores its own result, so it completes even if every caller
    /// stops waiting.
    fn start_population(
        &self,
        state: &mut State<K, V>,
        key: K,
        fetch_fn: FetchFn<K, V>,
    ) -> Result<PendingFetch<V>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| CacheError::NoRuntime(err.to_string()))?;

        state.next_fetch_id += 1;
        let id = state.next_fetch_id;
        state.store.stats_mut().record_fetch();
        debug!(fetch_id = id, "Starting population");

        let guard = InflightGuard {
            cache: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
        };
        let task = runtime.spawn(async move {
            let guard = guard;
            let outcome = fetch_fn(guard.key.clone())
                .await
                .map_err(CacheError::fetch);
            guard.complete(&outcome);
            outcome
        });

        let pending = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => Err(CacheError::PopulationAborted(err.to_string())),
            }
        }
        .boxed()
        .shared();

        state.inflight.insert(
            key,
            Inflight {
                id,
                pending: pending.clone(),
            },
        );
        Ok(pending)
    }

    // == Reaping ==
    /// Starts (or restarts) periodic reaping. A zero interval stops it.
    ///
    /// A running reaper is aborted and replaced.
    ///
    /// # Arguments
    /// * `interval` - Time between reap passes
    ///
    /// # Returns
    /// `Err(CacheError::NoRuntime)` when called outside a Tokio runtime
    /// with a non-zero interval.
    ///
    /// # Example
    /// ```ignore
    /// cache.start_reaping(Duration::from_secs(30))?;
    /// // Later:
    /// cache.stop_reaping();
    /// ```
    pub fn start_reaping(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            self.stop_reaping();
            return Ok(());
        }

        tokio::runtime::Handle::try_current()
            .map_err(|err| CacheError::NoRuntime(err.to_string()))?;
        let handle = spawn_reap_task(Arc::downgrade(&self.inner), interval);
        if let Some(previous) = self.inner.reaper.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stops periodic reaping. Returns false if it was not running.
    pub fn stop_reaping(&self) -> bool {
        match self.inner.reaper.lock().take() {
            Some(handle) => {
                handle.abort();
                info!("Reap task stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_reaping(&self) -> bool {
        self.inner
            .reaper
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Cache")
            .field("store", &state.store)
            .field("inflight", &state.inflight.len())
            .field("fetch_fn", &self.inner.fetch_fn.is_some())
            .finish()
    }
}

// == In-flight Guard ==
/// Owns one registration in the in-flight table and removes it on drop,
/// whether the population succeeded, failed, panicked or was cancelled.
struct InflightGuard<K, V>
where
    K: Hash + Eq,
{
    cache: Weak<Inner<K, V>>,
    key: K,
    id: u64,
}

impl<K, V> InflightGuard<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn complete(&self, outcome: &Result<Option<V>>) {
        let Some(inner) = self.cache.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();

        match outcome {
            Ok(Some(value)) => {
                debug!(fetch_id = self.id, "Population complete, storing value");
                state.store.set(self.key.clone(), value.clone(), None);
            }
            Ok(None) => debug!(fetch_id = self.id, "Population produced no value"),
            Err(err) => {
                state.store.stats_mut().record_fetch_failure();
                warn!(fetch_id = self.id, error = %err, "Population failed");
            }
        }
    }
}

impl<K, V> Drop for InflightGuard<K, V>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        let Some(inner) = self.cache.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        let ours = state
            .inflight
            .get(&self.key)
            .map_or(false, |inflight| inflight.id == self.id);
        if ours {
            state.inflight.remove(&self.key);
        }
    }
}

// == Entries ==
/// Lazy walk over a [`Cache`], yielding cloned `(key, value)` pairs and
/// skipping stale entries. Holds the cache lock until dropped.
pub struct Entries<'a, K, V> {
    guard: MutexGuard<'a, State<K, V>>,
    cursor: Cursor,
}

impl<'a, K, V> Entries<'a, K, V>
where
    K: Hash + Eq + Clone,
{
    fn new(guard: MutexGuard<'a, State<K, V>>, direction: Direction) -> Self {
        let cursor = Cursor::start(guard.store.list(), direction);
        Self { guard, cursor }
    }
}

impl<'a, K, V> Iterator for Entries<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let Self { guard, cursor } = self;
        cursor
            .advance(guard.store.list())
            .map(|entry| (entry.key.clone(), entry.value.clone()))
    }
}

// == Cache Builder ==
/// Fluent configuration for a [`Cache`].
pub struct CacheBuilder<K, V> {
    options: CacheOptions<K, V>,
    fetch_fn: Option<FetchFn<K, V>>,
    reap_interval: Duration,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self {
            options: CacheOptions::default(),
            fetch_fn: None,
            reap_interval: Duration::ZERO,
        }
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds limits, default TTL and reap interval from a loaded config.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            options: CacheOptions::from_config(config),
            fetch_fn: None,
            reap_interval: config.reap_interval,
        }
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.options.max_entries = max_entries;
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.options = self.options.max_size(max_size);
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.options = self.options.default_ttl(ttl);
        self
    }

    pub fn size_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&V, &K) -> usize + Send + Sync + 'static,
    {
        self.options = self.options.size_fn(f);
        self
    }

    /// Observer for every removal. Runs under the cache lock.
    pub fn dispose<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &V, DisposeReason) + Send + Sync + 'static,
    {
        self.options = self.options.dispose(f);
        self
    }

    /// Population function for [`Cache::fetch`].
    pub fn fetcher<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<V>>> + Send + 'static,
    {
        let fetch_fn: FetchFn<K, V> = Arc::new(move |key| f(key).boxed());
        self.fetch_fn = Some(fetch_fn);
        self
    }

    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Builds the cache, starting the reap task if an interval is set.
    ///
    /// # Returns
    /// The cache handle, or [`CacheError::NoRuntime`] when reaping is
    /// requested outside of a Tokio runtime.
    ///
    /// # Example
    /// ```ignore
    /// let cache: Cache<String, Vec<u8>> = Cache::builder()
    ///     .max_size(64 * 1024 * 1024)
    ///     .size_fn(|value: &Vec<u8>, _key: &String| value.len())
    ///     .default_ttl(Duration::from_secs(300))
    ///     .reap_interval(Duration::from_secs(60))
    ///     .build()?;
    /// ```
    pub fn build(self) -> Result<Cache<K, V>> {
        let cache = Cache::from_parts(self.options, self.fetch_fn);
        if !self.reap_interval.is_zero() {
            cache.start_reaping(self.reap_interval)?;
        }
        Ok(cache)
    }
}
