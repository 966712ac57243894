//! Source file content cache
//!
//! One entry per path. Concurrent `get`s for the same path share a single
//! underlying fetch; `invalid` makes any in-flight fetch stale so its result is
//! handed to its waiters but never stored.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{debug, info, warn};
use lru::LruCache;

use super::error::FetchError;

/// Default number of source files kept in memory
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// Where file bytes come from
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, path: &Path) -> Result<Vec<u8>, FetchError>;
}

/// Reads files from disk, relative to an optional root directory
#[derive(Clone, Debug, Default)]
pub struct FsSource {
    root: Option<PathBuf>,
}

impl FsSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl ContentSource for FsSource {
    async fn fetch(&self, path: &Path) -> Result<Vec<u8>, FetchError> {
        let full = self.resolve(path);
        tokio::fs::read(&full)
            .await
            .map_err(|e| FetchError::io(path, e))
    }
}

type FetchResult = Result<Arc<[u8]>, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

enum Slot {
    Ready(Arc<[u8]>),
    Loading { fetch_id: u64, fetch: SharedFetch },
}

/// Process-wide content cache keyed by source path
pub struct FileCache {
    source: Arc<dyn ContentSource>,
    entries: Mutex<LruCache<PathBuf, Slot>>,
    capacity: usize,
    next_fetch_id: AtomicU64,
}

impl FileCache {
    #[must_use]
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        Self::with_capacity(source, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `capacity` resolved files
    #[must_use]
    pub fn with_capacity(source: Arc<dyn ContentSource>, capacity: usize) -> Self {
        Self {
            source,
            entries: Mutex::new(LruCache::unbounded()),
            capacity: capacity.max(1),
            next_fetch_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<PathBuf, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get file content, fetching it once if it is not cached
    pub async fn get(&self, path: impl AsRef<Path>) -> FetchResult {
        let path = path.as_ref();
        let (fetch_id, fetch) = {
            let mut entries = self.lock();
            match entries.get(path) {
                Some(Slot::Ready(content)) => return Ok(Arc::clone(content)),
                Some(Slot::Loading { fetch_id, fetch }) => (*fetch_id, fetch.clone()),
                None => {
                    let fetch_id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                    let fetch = self.start_fetch(path);
                    entries.put(
                        path.to_path_buf(),
                        Slot::Loading {
                            fetch_id,
                            fetch: fetch.clone(),
                        },
                    );
                    self.trim(&mut entries);
                    (fetch_id, fetch)
                }
            }
        };

        let result = fetch.await;
        self.settle(path, fetch_id, &result);
        result
    }

    /// Forget the cached content for `path`, including any fetch in flight
    pub fn invalid(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if let Some(slot) = self.lock().pop(path) {
            match slot {
                Slot::Ready(_) => info!("Invalidated cached content for {}", path.display()),
                Slot::Loading { fetch_id, .. } => {
                    info!(
                        "Invalidated in-flight fetch #{fetch_id} for {}",
                        path.display()
                    );
                }
            }
        }
    }

    /// Whether resolved content for `path` is cached
    #[must_use]
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        matches!(self.lock().peek(path.as_ref()), Some(Slot::Ready(_)))
    }

    /// Number of entries, resolved or loading
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn start_fetch(&self, path: &Path) -> SharedFetch {
        debug!("Fetching {}", path.display());
        let source = Arc::clone(&self.source);
        let owned = path.to_path_buf();
        async move { source.fetch(&owned).await.map(Arc::from) }
            .boxed()
            .shared()
    }

    /// Store a finished fetch unless it was invalidated or already stored
    fn settle(&self, path: &Path, fetch_id: u64, result: &FetchResult) {
        let mut entries = self.lock();
        let current = matches!(
            entries.peek(path),
            Some(Slot::Loading { fetch_id: id, .. }) if *id == fetch_id
        );
        if !current {
            return;
        }
        match result {
            Ok(content) => {
                debug!("Cached {} ({} bytes)", path.display(), content.len());
                entries.put(path.to_path_buf(), Slot::Ready(Arc::clone(content)));
            }
            Err(e) => {
                warn!("Fetch failed, not caching: {e}");
                entries.pop(path);
            }
        }
    }

    /// Evict least recently used resolved entries beyond capacity
    fn trim(&self, entries: &mut LruCache<PathBuf, Slot>) {
        while entries.len() > self.capacity {
            let victim = entries
                .iter()
                .rev()
                .find(|(_, slot)| matches!(slot, Slot::Ready(_)))
                .map(|(path, _)| path.clone());
            let Some(victim) = victim else {
                break;
            };
            debug!("Evicting {}", victim.display());
            entries.pop(&victim);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Semaphore;

    use super::*;

    /// Holds every fetch until a permit is released
    struct GatedSource {
        calls: AtomicUsize,
        gate: Semaphore,
        fail_first: bool,
    }

    impl GatedSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(0),
                fail_first: false,
            })
        }

        fn open() -> Arc<Self> {
            let source = Self::new();
            source.gate.add_permits(Semaphore::MAX_PERMITS / 2);
            source
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentSource for GatedSource {
        async fn fetch(&self, path: &Path) -> Result<Vec<u8>, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let permit = self.gate.acquire().await.expect("gate open");
            permit.forget();
            if self.fail_first && n == 1 {
                return Err(FetchError::generic(path, "disk on fire"));
            }
            Ok(format!("{}#{n}", path.display()).into_bytes())
        }
    }

    #[tokio::test]
    async fn concurrent_gets_share_one_fetch() {
        let source = GatedSource::new();
        let cache = FileCache::new(source.clone());

        let (a, b, ()) = tokio::join!(cache.get("deck.pdf"), cache.get("deck.pdf"), async {
            tokio::task::yield_now().await;
            source.gate.add_permits(1);
        });

        assert_eq!(source.calls(), 1);
        assert_eq!(&*a.unwrap(), b"deck.pdf#1");
        assert_eq!(&*b.unwrap(), b"deck.pdf#1");
        assert!(cache.contains("deck.pdf"));
    }

    #[tokio::test]
    async fn cached_content_is_reused() {
        let source = GatedSource::open();
        let cache = FileCache::new(source.clone());

        cache.get("a.pdf").await.unwrap();
        cache.get("a.pdf").await.unwrap();
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_during_fetch_discards_result() {
        let source = GatedSource::new();
        let cache = FileCache::new(source.clone());

        let (first, ()) = tokio::join!(cache.get("a.pdf"), async {
            tokio::task::yield_now().await;
            cache.invalid("a.pdf");
            source.gate.add_permits(1);
        });

        // The waiter still gets the content it asked for
        assert_eq!(&*first.unwrap(), b"a.pdf#1");
        assert!(!cache.contains("a.pdf"));

        source.gate.add_permits(1);
        let second = cache.get("a.pdf").await.unwrap();
        assert_eq!(&*second, b"a.pdf#2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn get_after_invalid_does_not_join_stale_fetch() {
        let source = GatedSource::new();
        let cache = FileCache::new(source.clone());

        let (old, new, ()) = tokio::join!(
            cache.get("a.pdf"),
            async {
                tokio::task::yield_now().await;
                cache.invalid("a.pdf");
                cache.get("a.pdf").await
            },
            async {
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                source.gate.add_permits(2);
            }
        );

        assert_eq!(source.calls(), 2);
        assert_ne!(old.unwrap(), new.unwrap());
        assert!(cache.contains("a.pdf"));
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let source = Arc::new(GatedSource {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(16),
            fail_first: true,
        });
        let cache = FileCache::new(source.clone());

        let err = cache.get("a.pdf").await.unwrap_err();
        assert!(err.to_string().contains("disk on fire"));
        assert!(cache.is_empty());

        assert_eq!(&*cache.get("a.pdf").await.unwrap(), b"a.pdf#2");
    }

    #[tokio::test]
    async fn resolved_entries_are_evicted_oldest_first() {
        let source = GatedSource::open();
        let cache = FileCache::with_capacity(source.clone(), 2);

        cache.get("a.pdf").await.unwrap();
        cache.get("b.pdf").await.unwrap();
        cache.get("a.pdf").await.unwrap();
        cache.get("c.pdf").await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a.pdf"));
        assert!(!cache.contains("b.pdf"));
        assert!(cache.contains("c.pdf"));
    }

    #[tokio::test]
    async fn fs_source_reads_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.pdf"), b"%PDF-1.7").unwrap();
        let cache = FileCache::new(Arc::new(FsSource::with_root(dir.path())));

        assert_eq!(&*cache.get("notes.pdf").await.unwrap(), b"%PDF-1.7");
        let err = cache.get("missing.pdf").await.unwrap_err();
        assert!(err.source.is_some());
    }
}
