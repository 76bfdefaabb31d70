use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fingerprint::{Dep, Fingerprint};
use crate::api::{ApiError, ClientError};
use crate::cache::{CacheStore, Ttl};

type Fetcher<T> =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// What a consumer sees of a cached resource.
#[derive(Debug, Clone)]
pub struct ResourceState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<Arc<anyhow::Error>>,
    pub from_cache: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl<T> Default for ResourceState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            from_cache: false,
            last_updated: None,
        }
    }
}

impl<T> ResourceState<T> {
    /// The HTTP error behind a failed fetch, if that is what failed.
    pub fn api_error(&self) -> Option<&ApiError> {
        let error = self.error.as_deref()?;
        error
            .downcast_ref::<ApiError>()
            .or_else(|| error.downcast_ref::<ClientError>().and_then(ClientError::as_api))
    }
}

struct Inner<T> {
    /// Bumped by every fetch start, disable and drop
    generation: u64,
    state: ResourceState<T>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    tx: watch::Sender<ResourceState<T>>,
}

impl<T: Clone> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new generation and return it.
    fn advance(&self, f: impl FnOnce(&mut ResourceState<T>)) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        f(&mut inner.state);
        self.tx.send_replace(inner.state.clone());
        inner.generation
    }

    /// Apply `f` only if `generation` is still current.
    fn apply(&self, generation: u64, f: impl FnOnce(&mut ResourceState<T>)) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        f(&mut inner.state);
        self.tx.send_replace(inner.state.clone());
        true
    }
}

/// Fetch-vs-reuse decision unit for one `(key, consumer)` pair.
///
/// The consumer calls [`sync`](Self::sync) on every render with its current
/// dependency list and enabled flag. A fetch starts only when the dependency
/// fingerprint changes while enabled (or on the first enabled sync), so
/// repeated syncs with the same values never refetch. Each fetch runs on its
/// own task and is tagged with a generation; a resolution whose generation
/// is no longer current (dependencies moved on, resource disabled, refreshed
/// or dropped) is discarded without touching state.
///
/// Must be used from within a tokio runtime.
pub struct CachedResource<T> {
    key: String,
    fetcher: Fetcher<T>,
    cache: CacheStore,
    ttl: Ttl,
    shared: Arc<Shared<T>>,
    fingerprint: Option<Fingerprint>,
    enabled: bool,
    in_flight: Option<CancellationToken>,
}

impl<T> CachedResource<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<F, Fut>(key: impl Into<String>, cache: CacheStore, ttl: Ttl, fetcher: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (tx, _rx) = watch::channel(ResourceState::default());
        Self {
            key: key.into(),
            fetcher: Arc::new(move |token| fetcher(token).boxed()),
            cache,
            ttl,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    generation: 0,
                    state: ResourceState::default(),
                }),
                tx,
            }),
            fingerprint: None,
            enabled: false,
            in_flight: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> ResourceState<T> {
        self.shared.lock().state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
        self.shared.tx.subscribe()
    }

    /// Wait until no fetch is in progress and return that state.
    pub async fn wait_idle(&self) -> ResourceState<T> {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(|state| !state.loading).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| self.state())
    }

    /// Reconcile with the consumer's current dependencies and enabled flag.
    pub fn sync(&mut self, deps: &[Dep], enabled: bool) {
        if !enabled {
            self.disable();
            return;
        }

        let fingerprint = Fingerprint::of(deps);
        if self.fingerprint.as_ref() == Some(&fingerprint) {
            return;
        }

        // Only the first fetch of an enable cycle may be served from cache.
        let use_cache = self.fingerprint.is_none();
        self.enabled = true;
        self.fingerprint = Some(fingerprint);
        self.start(use_cache);
    }

    /// Fetch live, bypassing the cache, and supersede any in-flight fetch.
    /// Ignored while disabled.
    pub fn refresh(&mut self) {
        if !self.enabled {
            debug!(key = %self.key, "Refresh ignored, resource disabled");
            return;
        }
        self.start(false);
    }

    /// Drop the cached entry and fetch live.
    pub fn invalidate(&mut self) {
        self.cache.remove_cache(&self.key);
        self.refresh();
    }

    fn disable(&mut self) {
        let was_active = self.enabled || self.in_flight.is_some();
        self.enabled = false;
        self.fingerprint = None;
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        if was_active {
            self.shared.advance(|state| state.loading = false);
            debug!(key = %self.key, "Resource disabled");
        }
    }

    fn start(&mut self, use_cache: bool) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }

        if use_cache {
            if let Some((data, stored_at)) = self.cache.read_typed::<T>(&self.key) {
                debug!(key = %self.key, "Serving resource from cache");
                self.shared.advance(|state| {
                    state.data = Some(data);
                    state.loading = false;
                    state.error = None;
                    state.from_cache = true;
                    state.last_updated = Some(stored_at);
                });
                return;
            }
        }

        let generation = self.shared.advance(|state| state.loading = true);
        let token = CancellationToken::new();
        self.in_flight = Some(token.clone());

        let fetcher = Arc::clone(&self.fetcher);
        let shared = Arc::clone(&self.shared);
        let cache = self.cache.clone();
        let key = self.key.clone();
        let ttl = self.ttl;

        debug!(key = %key, generation, "Fetching resource");
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(key = %key, generation, "Fetch cancelled");
                    return;
                }
                outcome = fetcher(token.clone()) => outcome,
            };

            let applied = match outcome {
                Ok(data) => {
                    let now = cache.now();
                    shared.apply(generation, |state| {
                        cache.write_typed(&key, &data, ttl);
                        state.data = Some(data);
                        state.loading = false;
                        state.error = None;
                        state.from_cache = false;
                        state.last_updated = Some(now);
                    })
                }
                Err(e) => shared.apply(generation, |state| {
                    debug!(key = %key, error = %e, "Fetch failed");
                    state.loading = false;
                    state.error = Some(Arc::new(e));
                }),
            };

            if !applied {
                debug!(key = %key, generation, "Discarding superseded fetch result");
            }
        });
    }
}

impl<T> Drop for CachedResource<T> {
    fn drop(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ResponseBody;
    use crate::clock::{Clock, ManualClock};
    use crate::store::KvStore;
    use chrono::{Duration, TimeZone};
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn cache() -> CacheStore {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2030, 5, 1, 9, 0, 0).unwrap());
        CacheStore::new(KvStore::in_memory(), "test.").with_clock(Arc::new(clock))
    }

    fn counting(cache: CacheStore, calls: Arc<AtomicUsize>) -> CachedResource<Vec<u32>> {
        CachedResource::new("orders", cache, Ttl::millis(60_000), move |_token| {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) as u32 + 1;
                Ok(vec![n])
            }
        })
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_unchanged_dependencies_fetch_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut resource = counting(cache(), Arc::clone(&calls));
        let deps = [Dep::from("open"), Dep::from(1)];

        resource.sync(&deps, true);
        resource.sync(&deps, true);
        resource.sync(&[Dep::from("open"), Dep::from(1)], true);
        let state = resource.wait_idle().await;
        resource.sync(&deps, true);
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.data, Some(vec![1]));
        assert!(!state.from_cache);
        assert!(state.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_changed_dependency_fetches_once_more() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut resource = counting(cache(), Arc::clone(&calls));

        resource.sync(&[Dep::from("open"), Dep::from(1)], true);
        resource.wait_idle().await;
        resource.sync(&[Dep::from("open"), Dep::from(2)], true);
        resource.sync(&[Dep::from("open"), Dep::from(2)], true);
        let state = resource.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.data, Some(vec![2]));
    }

    #[tokio::test]
    async fn test_disabled_never_fetches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut resource = counting(cache(), Arc::clone(&calls));
        let deps = [Dep::from(7)];

        resource.sync(&deps, false);
        resource.sync(&deps, false);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!resource.state().loading);
        assert!(resource.state().data.is_none());

        resource.sync(&deps, true);
        resource.sync(&deps, true);
        resource.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn gated(
        gate: Arc<Notify>,
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync {
        move |_token| {
            let gate = Arc::clone(&gate);
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    gate.notified().await;
                    Ok("first".to_string())
                } else {
                    Ok(format!("call-{}", n))
                }
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_disable_discards_in_flight_result() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache();
        let mut resource = CachedResource::new(
            "calendar",
            cache.clone(),
            Ttl::Never,
            gated(Arc::clone(&gate), Arc::clone(&calls)),
        );

        resource.sync(&[Dep::from("week")], true);
        assert!(resource.state().loading);
        settle().await;

        resource.sync(&[Dep::from("week")], false);
        assert!(!resource.state().loading);

        gate.notify_one();
        settle().await;

        let state = resource.state();
        assert!(state.data.is_none());
        assert!(state.error.is_none());
        assert!(!state.loading);
        assert!(cache.read_cache("calendar").is_none());
    }

    #[tokio::test]
    async fn test_reenable_fetches_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut resource = counting(cache(), Arc::clone(&calls));
        let deps = [Dep::from("x")];

        resource.sync(&deps, true);
        resource.wait_idle().await;
        resource.sync(&deps, false);
        resource.sync(&deps, true);
        let state = resource.wait_idle().await;

        // the first fetch populated the cache, so re-enabling is served from it
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(state.from_cache);
        assert_eq!(state.data, Some(vec![1]));
    }

    #[tokio::test]
    async fn test_refresh_supersedes_in_flight_fetch() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut resource = CachedResource::new(
            "pipeline",
            cache(),
            Ttl::Never,
            gated(Arc::clone(&gate), Arc::clone(&calls)),
        );

        resource.sync(&[], true);
        settle().await;
        resource.refresh();
        let state = resource.wait_idle().await;
        assert_eq!(state.data.as_deref(), Some("call-2"));

        gate.notify_one();
        settle().await;
        assert_eq!(resource.state().data.as_deref(), Some("call-2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_bypasses_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache();
        cache.write_typed("orders", &vec![99u32], Ttl::Never);
        let written_at = cache.now();
        let mut resource = counting(cache.clone(), Arc::clone(&calls));

        resource.sync(&[], true);
        let cached = resource.state();
        assert!(cached.from_cache);
        assert!(!cached.loading);
        assert_eq!(cached.data, Some(vec![99]));
        assert_eq!(cached.last_updated, Some(written_at));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        resource.refresh();
        let live = resource.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!live.from_cache);
        assert_eq!(live.data, Some(vec![1]));

        let (stored, _) = cache.read_typed::<Vec<u32>>("orders").expect("written back");
        assert_eq!(stored, vec![1]);
    }

    #[tokio::test]
    async fn test_refresh_ignored_while_disabled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut resource = counting(cache(), Arc::clone(&calls));
        resource.refresh();
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_last_known_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut resource = CachedResource::new("profile", cache(), Ttl::Never, move |_token| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok("Ada".to_string())
                } else {
                    let err = ApiError::from_response(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        ResponseBody::Json(serde_json::json!({"message": "Failure"})),
                    );
                    Err(anyhow::Error::from(ClientError::from(err)))
                }
            }
        });

        resource.sync(&[], true);
        resource.wait_idle().await;
        resource.refresh();
        let state = resource.wait_idle().await;

        assert!(!state.loading);
        assert_eq!(state.data.as_deref(), Some("Ada"));
        let api = state.api_error().expect("api error");
        assert_eq!(api.status.as_u16(), 422);
        assert_eq!(api.message, "Failure");
    }

    #[tokio::test]
    async fn test_success_after_failure_clears_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut resource = CachedResource::new("summary", cache(), Ttl::Never, move |_token| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    anyhow::bail!("backend unavailable")
                }
                Ok(n as u32)
            }
        });

        resource.sync(&[], true);
        let failed = resource.wait_idle().await;
        assert!(failed.error.is_some());
        assert!(failed.data.is_none());
        assert!(failed.api_error().is_none());

        resource.refresh();
        let recovered = resource.wait_idle().await;
        assert!(recovered.error.is_none());
        assert_eq!(recovered.data, Some(1));
    }

    #[tokio::test]
    async fn test_dependency_change_discards_stale_resolution() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut resource = CachedResource::new(
            "orders",
            cache(),
            Ttl::Never,
            gated(Arc::clone(&gate), Arc::clone(&calls)),
        );

        resource.sync(&[Dep::from("a")], true);
        settle().await;
        resource.sync(&[Dep::from("b")], true);
        let state = resource.wait_idle().await;
        assert_eq!(state.data.as_deref(), Some("call-2"));

        gate.notify_one();
        settle().await;
        assert_eq!(resource.state().data.as_deref(), Some("call-2"));
    }

    #[tokio::test]
    async fn test_drop_prevents_late_resolution() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache();
        let mut resource = CachedResource::new(
            "overview",
            cache.clone(),
            Ttl::Never,
            gated(Arc::clone(&gate), Arc::clone(&calls)),
        );

        resource.sync(&[], true);
        let rx = resource.subscribe();
        drop(resource);

        gate.notify_one();
        settle().await;
        assert!(rx.borrow().data.is_none());
        assert!(cache.read_cache("overview").is_none());
    }

    #[tokio::test]
    async fn test_fetcher_receives_live_token() {
        let fetcher = |token: CancellationToken| async move { Ok(token.is_cancelled()) };
        let mut resource = CachedResource::new("token", cache(), Ttl::Never, fetcher);
        resource.sync(&[], true);
        let state = resource.wait_idle().await;
        assert_eq!(state.data, Some(false));
    }

    #[tokio::test]
    async fn test_expired_cache_entry_triggers_fetch() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2030, 5, 1, 9, 0, 0).unwrap());
        let cache =
            CacheStore::new(KvStore::in_memory(), "test.").with_clock(Arc::new(clock.clone()));
        cache.write_typed("orders", &vec![99u32], Ttl::millis(1000));
        clock.advance(Duration::milliseconds(1500));

        let calls = Arc::new(AtomicUsize::new(0));
        let mut resource = counting(cache, Arc::clone(&calls));
        resource.sync(&[], true);
        let state = resource.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.data, Some(vec![1]));
        assert_eq!(state.last_updated, Some(clock.now()));
    }
}
