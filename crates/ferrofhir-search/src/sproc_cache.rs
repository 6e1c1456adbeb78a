//! Custom-query stored-procedure name cache.
//!
//! Hand-tuned procedures named `CustomQuery_<hash>` can replace the
//! generated SQL for a query whose plan-cache hash matches. The catalog
//! is consulted through a process-wide cache refreshed on a time-boxed
//! interval: a single lock guards the refresh with a double-checked
//! "still stale?" test so concurrent callers do not refresh redundantly,
//! and a failed refresh keeps the previous entries in place — stale but
//! available beats empty and broken.

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use ferrofhir_storage::ProcedureCatalog;

/// Prefix of custom-query procedure names in the store catalog.
pub const CUSTOM_QUERY_PREFIX: &str = "CustomQuery_";

/// Format the procedure name for a plan-cache hash.
pub fn custom_query_name(hash: u64) -> String {
    format!("{CUSTOM_QUERY_PREFIX}{hash:016x}")
}

/// Injected time source; tests substitute a controllable clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time source used outside tests.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Refresh state of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Entries are within their TTL.
    Fresh,
    /// A refresh is in flight; readers keep using current entries.
    Refreshing,
    /// The TTL elapsed; the next lookup triggers a refresh.
    Stale,
}

/// Process-wide cache of custom-query procedure names, keyed by hash.
pub struct CustomQueryCache {
    /// hash (hex) -> full procedure name
    entries: DashMap<String, String>,
    last_refresh: RwLock<Option<Instant>>,
    refreshing: AtomicBool,
    refresh_lock: tokio::sync::Mutex<()>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CustomQueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            last_refresh: RwLock::new(None),
            refreshing: AtomicBool::new(false),
            refresh_lock: tokio::sync::Mutex::new(()),
            ttl,
            clock,
        }
    }

    /// The cache's current state.
    pub fn state(&self) -> CacheState {
        if self.refreshing.load(Ordering::Acquire) {
            CacheState::Refreshing
        } else if self.is_stale() {
            CacheState::Stale
        } else {
            CacheState::Fresh
        }
    }

    /// Number of cached procedure names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the procedure name for a plan-cache hash, refreshing first
    /// if the TTL elapsed.
    ///
    /// `None` means no custom procedure exists and the generated-SQL path
    /// applies.
    pub async fn procedure_name(&self, catalog: &dyn ProcedureCatalog, hash: u64) -> Option<String> {
        self.ensure_fresh(catalog).await;
        self.entries
            .get(&format!("{hash:016x}"))
            .map(|entry| entry.value().clone())
    }

    fn is_stale(&self) -> bool {
        self.last_refresh
            .read()
            .ok()
            .and_then(|guard| *guard)
            .is_none_or(|at| self.clock.now().saturating_duration_since(at) >= self.ttl)
    }

    fn stamp_refresh(&self) {
        if let Ok(mut guard) = self.last_refresh.write() {
            *guard = Some(self.clock.now());
        }
    }

    async fn ensure_fresh(&self, catalog: &dyn ProcedureCatalog) {
        if !self.is_stale() {
            return;
        }
        let _guard = self.refresh_lock.lock().await;
        // double-checked: a concurrent caller may have refreshed while we
        // waited on the lock
        if !self.is_stale() {
            return;
        }
        self.refreshing.store(true, Ordering::Release);
        match catalog.list_custom_queries().await {
            Ok(names) => {
                self.entries.clear();
                for name in names {
                    if let Some(hash) = name.strip_prefix(CUSTOM_QUERY_PREFIX) {
                        self.entries.insert(hash.to_string(), name.clone());
                    }
                }
                debug!(count = self.entries.len(), "Refreshed custom-query cache");
            }
            Err(error) => {
                // keep serving the previous entries; retry after the next interval
                warn!(%error, "Custom-query cache refresh failed; keeping previous entries");
            }
        }
        self.stamp_refresh();
        self.refreshing.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for CustomQueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomQueryCache")
            .field("size", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferrofhir_storage::StorageError;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct MockClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl MockClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    struct MockCatalog {
        calls: AtomicUsize,
        names: Mutex<Result<Vec<String>, ()>>,
    }

    impl MockCatalog {
        fn returning(names: Vec<&str>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                names: Mutex::new(Ok(names.into_iter().map(String::from).collect())),
            }
        }

        fn set_failing(&self) {
            *self.names.lock().unwrap() = Err(());
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProcedureCatalog for MockCatalog {
        async fn list_custom_queries(&self) -> Result<Vec<String>, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.names
                .lock()
                .unwrap()
                .clone()
                .map_err(|()| StorageError::connection("catalog offline"))
        }
    }

    const TTL: Duration = Duration::from_secs(600);

    #[test]
    fn test_lookup_refreshes_and_finds_name() {
        let clock = Arc::new(MockClock::new());
        let cache = CustomQueryCache::with_clock(TTL, clock);
        let catalog = MockCatalog::returning(vec!["CustomQuery_00000000000000ab", "OtherProc"]);

        tokio_test::block_on(async {
            let name = cache.procedure_name(&catalog, 0xab).await;
            assert_eq!(name.as_deref(), Some("CustomQuery_00000000000000ab"));
            assert_eq!(catalog.calls(), 1);
            assert_eq!(cache.len(), 1);

            // unknown hash falls back to the generated-SQL path
            assert!(cache.procedure_name(&catalog, 0xcd).await.is_none());
        });
    }

    #[test]
    fn test_fresh_cache_skips_refresh() {
        let clock = Arc::new(MockClock::new());
        let cache = CustomQueryCache::with_clock(TTL, clock.clone());
        let catalog = MockCatalog::returning(vec!["CustomQuery_00000000000000ab"]);

        tokio_test::block_on(async {
            cache.procedure_name(&catalog, 0xab).await;
            cache.procedure_name(&catalog, 0xab).await;
            assert_eq!(catalog.calls(), 1);
            assert_eq!(cache.state(), CacheState::Fresh);

            clock.advance(TTL + Duration::from_secs(1));
            assert_eq!(cache.state(), CacheState::Stale);
            cache.procedure_name(&catalog, 0xab).await;
            assert_eq!(catalog.calls(), 2);
        });
    }

    #[test]
    fn test_failed_refresh_keeps_previous_entries() {
        let clock = Arc::new(MockClock::new());
        let cache = CustomQueryCache::with_clock(TTL, clock.clone());
        let catalog = MockCatalog::returning(vec!["CustomQuery_00000000000000ab"]);

        tokio_test::block_on(async {
            cache.procedure_name(&catalog, 0xab).await;
            assert_eq!(cache.len(), 1);

            clock.advance(TTL + Duration::from_secs(1));
            catalog.set_failing();

            // refresh fails but the stale entry is still served
            let name = cache.procedure_name(&catalog, 0xab).await;
            assert_eq!(name.as_deref(), Some("CustomQuery_00000000000000ab"));
            assert_eq!(catalog.calls(), 2);

            // the failure stamped the interval; no immediate retry storm
            cache.procedure_name(&catalog, 0xab).await;
            assert_eq!(catalog.calls(), 2);

            // retried after the next interval
            clock.advance(TTL + Duration::from_secs(1));
            cache.procedure_name(&catalog, 0xab).await;
            assert_eq!(catalog.calls(), 3);
        });
    }

    #[test]
    fn test_custom_query_name_format() {
        assert_eq!(custom_query_name(0xab), "CustomQuery_00000000000000ab");
    }
}
