//! TTL-bounded caching for remote reads.
//!
//! Reads served within the TTL never touch the wire. A push overwrites the
//! cached value and restarts its clock, so pushed state always beats the
//! TTL; a push landing while a fetch is in flight wins over the stale fetch
//! result. Concurrent stale reads may fetch more than once, the later store
//! wins.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

struct State<T> {
    entry: Option<Cached<T>>,
    /// Bumped on every write that did not come from a fetch, so an
    /// in-flight fetch can tell its result is already outdated.
    generation: u64,
}

/// One remotable value with a freshness clock.
pub struct ValueCache<T> {
    ttl: Duration,
    state: Mutex<State<T>>,
}

impl<T> ValueCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(State {
                entry: None,
                generation: 0,
            }),
        }
    }

    /// Store a pushed value and restart its freshness clock.
    pub fn set_cached(&self, value: T) {
        let mut state = self.state.lock();
        state.entry = Some(Cached {
            value,
            fetched_at: Instant::now(),
        });
        state.generation += 1;
    }

    /// Mutate the cached value in place, restarting its clock. Returns
    /// `false` when nothing is cached; the next read fetches anyway.
    pub fn update(&self, mutate: impl FnOnce(&mut T)) -> bool {
        let mut state = self.state.lock();
        state.generation += 1;
        match state.entry.as_mut() {
            Some(cached) => {
                mutate(&mut cached.value);
                cached.fetched_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Drop the cached value; the next read fetches.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.entry = None;
        state.generation += 1;
    }
}

impl<T: Clone> ValueCache<T> {
    /// Current value regardless of freshness.
    pub fn peek(&self) -> Option<T> {
        self.state.lock().entry.as_ref().map(|c| c.value.clone())
    }

    /// Serve from cache while fresh, otherwise run `fetch` and store its
    /// result. A fetch error is returned as-is and caches nothing.
    pub async fn get_cached<E, F, Fut>(&self, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let before = {
            let state = self.state.lock();
            if let Some(cached) = state.entry.as_ref() {
                if cached.fetched_at.elapsed() <= self.ttl {
                    return Ok(cached.value.clone());
                }
            }
            state.generation
        };

        let value = fetch().await?;

        let mut state = self.state.lock();
        if state.generation == before {
            state.entry = Some(Cached {
                value: value.clone(),
                fetched_at: Instant::now(),
            });
            return Ok(value);
        }
        // Someone pushed while we were fetching. The push is newer.
        match state.entry.as_ref() {
            Some(cached) => Ok(cached.value.clone()),
            None => Ok(value),
        }
    }
}

/// [`ValueCache`] for values that are expensive to clone. Readers share one
/// allocation; updates rebuild it so held snapshots stay untouched.
pub struct ObjectCache<T> {
    inner: ValueCache<Arc<T>>,
}

impl<T> ObjectCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: ValueCache::new(ttl),
        }
    }

    pub fn set_cached(&self, value: T) {
        self.inner.set_cached(Arc::new(value));
    }

    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    pub fn peek(&self) -> Option<Arc<T>> {
        self.inner.peek()
    }

    pub async fn get_cached<E, F, Fut>(&self, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.inner
            .get_cached(|| async { fetch().await.map(Arc::new) })
            .await
    }
}

impl<T: Clone> ObjectCache<T> {
    pub fn update(&self, mutate: impl FnOnce(&mut T)) -> bool {
        self.inner.update(|shared| {
            let mut value = (**shared).clone();
            mutate(&mut value);
            *shared = Arc::new(value);
        })
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counted(counter: &AtomicUsize, value: u32) -> impl Future<Output = Result<u32, Infallible>> {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(value) }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_read_skips_fetch() {
        let cache = ValueCache::new(Duration::from_secs(30));
        let fetches = AtomicUsize::new(0);
        cache.set_cached(7);

        let got = cache.get_cached(|| counted(&fetches, 99)).await.unwrap();

        assert_eq!(got, 7);
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_read_fetches() {
        let cache = ValueCache::new(Duration::from_secs(30));
        let fetches = AtomicUsize::new(0);
        cache.set_cached(7);
        tokio::time::advance(Duration::from_secs(31)).await;

        let got = cache.get_cached(|| counted(&fetches, 99)).await.unwrap();

        assert_eq!(got, 99);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        // the fetch result was stored and is fresh again
        let again = cache.get_cached(|| counted(&fetches, 5)).await.unwrap();
        assert_eq!(again, 99);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_restarts_freshness_clock() {
        let cache = ValueCache::new(Duration::from_secs(30));
        let fetches = AtomicUsize::new(0);
        cache.set_cached(7);
        tokio::time::advance(Duration::from_secs(31)).await;

        cache.set_cached(8);

        let got = cache.get_cached(|| counted(&fetches, 99)).await.unwrap();
        assert_eq!(got, 8);
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_fetch() {
        let cache = ValueCache::new(Duration::from_secs(30));
        let fetches = AtomicUsize::new(0);
        cache.set_cached(7);

        cache.invalidate();

        let got = cache.get_cached(|| counted(&fetches, 99)).await.unwrap();
        assert_eq!(got, 99);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_caches_nothing() {
        let cache: ValueCache<u32> = ValueCache::new(Duration::from_secs(30));
        let fetches = AtomicUsize::new(0);

        let got = cache
            .get_cached(|| {
                fetches.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, &str>("offline") }
            })
            .await;
        assert_eq!(got, Err("offline"));

        let got = cache.get_cached(|| counted(&fetches, 99)).await.unwrap();
        assert_eq!(got, 99);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_during_fetch_wins() {
        let cache = Arc::new(ValueCache::new(Duration::ZERO));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let reader = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move {
                cache
                    .get_cached(|| async move {
                        let _ = release_rx.await;
                        Ok::<u32, Infallible>(5)
                    })
                    .await
                    .unwrap()
            }
        });
        tokio::task::yield_now().await;

        cache.set_cached(9);
        let _ = release_tx.send(());

        assert_eq!(reader.await.unwrap(), 9);
        assert_eq!(cache.peek(), Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_object_cache_update_leaves_held_snapshots_alone() {
        let cache = ObjectCache::new(Duration::from_secs(30));
        cache.set_cached(vec![1, 2]);
        let held = cache.peek().unwrap();

        assert!(cache.update(|v| v.push(3)));

        assert_eq!(*held, vec![1, 2]);
        assert_eq!(*cache.peek().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_object_cache_update_without_entry() {
        let cache: ObjectCache<Vec<u8>> = ObjectCache::new(Duration::from_secs(30));
        assert!(!cache.update(|v| v.push(1)));
        assert_eq!(cache.peek(), None);
    }
}
