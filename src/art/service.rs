//! Process-wide thumbnail service
//!
//! Owns the store, the negative cache, the load queue and the loader
//! threads. It is created once at start-up and handed to every grid view,
//! so a view that is torn down and rebuilt finds a warm cache and the same
//! set of known failures.
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::bitmap::Bitmap;
use super::decoder::ImageDecoder;
use super::key::CacheKey;
use super::loader::{self, LoaderContext, LoaderCounters};
use super::negative::NegativeCache;
use super::queue::{LoadQueue, LoadRequest, Priority, RequestOutcome, DEFAULT_QUEUE_DEPTH};
use super::resolver::{ArtSource, SourceResolver};
use super::sink::CompletionSink;
use super::store::{CacheStore, Freshness, DEFAULT_BUDGET_BYTES};

/// Tunables fixed at start-up, except the budget which can change later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub budget_bytes: usize,
    pub worker_threads: usize,
    pub queue_depth: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            worker_threads: 2,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// What a grid cell should draw right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellState {
    /// Thumbnail decoded at a compatible size
    Ready(Bitmap),
    /// Thumbnail from a different size; keep showing it until replaced
    Stale(Bitmap),
    /// A request is queued or decoding
    Loading,
    /// Known to have no artwork, draw the placeholder
    NoArtwork,
    /// Never requested (or evicted)
    Missing,
}

impl CellState {
    pub fn bitmap(&self) -> Option<&Bitmap> {
        match self {
            CellState::Ready(bitmap) | CellState::Stale(bitmap) => Some(bitmap),
            _ => None,
        }
    }

    /// True once nothing more will happen for this cell at this size
    pub fn is_settled(&self) -> bool {
        matches!(self, CellState::Ready(_) | CellState::NoArtwork)
    }
}

/// Point-in-time numbers for the status bar and logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub budget: usize,
    pub no_artwork: usize,
    pub queued: usize,
    pub pending: usize,
    pub decoded: u64,
    pub failed: u64,
    pub dropped: u64,
}

pub struct ThumbnailService {
    context: Arc<LoaderContext>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThumbnailService {
    /// Build the caches and start the loader threads
    pub fn start(
        settings: ServiceSettings,
        resolver: Arc<dyn SourceResolver>,
        decoder: Arc<dyn ImageDecoder>,
        sink: Arc<dyn CompletionSink>,
    ) -> io::Result<Arc<Self>> {
        let context = Arc::new(LoaderContext {
            store: Arc::new(CacheStore::new(settings.budget_bytes)),
            negative: Arc::new(NegativeCache::new()),
            queue: Arc::new(LoadQueue::new(settings.queue_depth)),
            resolver,
            decoder,
            sink,
            counters: LoaderCounters::default(),
        });
        let workers = loader::spawn_workers(Arc::clone(&context), settings.worker_threads)?;

        log::info!(
            "Thumbnail service started: {} loader thread(s), {} MiB budget, queue depth {}",
            workers.len(),
            settings.budget_bytes / (1024 * 1024),
            settings.queue_depth
        );

        Ok(Arc::new(Self {
            context,
            workers: Mutex::new(workers),
        }))
    }

    /// Ask for `key` to be loaded at `target_size`.
    ///
    /// A no-op when the key is already queued or loading, cached at a
    /// compatible size, or known to have no artwork.
    pub fn request(
        &self,
        key: CacheKey,
        source: ArtSource,
        target_size: u32,
        priority: Priority,
    ) -> RequestOutcome {
        let request = LoadRequest {
            key,
            source,
            target_size,
            priority,
        };
        let store = &self.context.store;
        let negative = &self.context.negative;

        self.context.queue.request(request, |r| {
            if negative.contains(&r.key) {
                Some(RequestOutcome::Blacklisted)
            } else if store.get(&r.key, r.target_size).is_some() {
                Some(RequestOutcome::Cached)
            } else {
                None
            }
        })
    }

    /// Fresh bitmap for `key` at `size`, if cached
    pub fn get(&self, key: &CacheKey, size: u32) -> Option<Bitmap> {
        self.context.store.get(key, size)
    }

    /// What a cell showing `key` at `size` should draw
    pub fn lookup(&self, key: &CacheKey, size: u32) -> CellState {
        if let Some((bitmap, freshness)) = self.context.store.get_for_display(key, size) {
            return match freshness {
                Freshness::Fresh => CellState::Ready(bitmap),
                Freshness::Stale => CellState::Stale(bitmap),
            };
        }
        if self.context.negative.contains(key) {
            CellState::NoArtwork
        } else if self.context.queue.is_pending(key) {
            CellState::Loading
        } else {
            CellState::Missing
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.context.store
    }

    pub fn negative(&self) -> &NegativeCache {
        &self.context.negative
    }

    pub fn queue(&self) -> &LoadQueue {
        &self.context.queue
    }

    /// Forget known failures so their keys are attempted again
    pub fn clear_negative(&self) {
        self.context.negative.clear();
    }

    /// Drop every thumbnail, every known failure and all waiting requests.
    /// Decodes already running still complete and repopulate the store.
    pub fn clear_all(&self) {
        self.context.queue.clear_queued();
        self.context.store.clear();
        self.context.negative.clear();
        log::info!("Thumbnail cache cleared");
    }

    /// Change the memory budget; lowering it evicts immediately
    pub fn set_budget(&self, bytes: usize) {
        let evicted = self.context.store.set_budget(bytes);
        log::info!("Thumbnail budget set to {} bytes, evicted {}", bytes, evicted.len());
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.context.counters;
        CacheStats {
            entries: self.context.store.len(),
            bytes: self.context.store.total_bytes(),
            budget: self.context.store.budget(),
            no_artwork: self.context.negative.len(),
            queued: self.context.queue.len(),
            pending: self.context.queue.pending_len(),
            decoded: counters.decoded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            dropped: self.context.queue.dropped(),
        }
    }

    /// Stop the loader threads and wait for them. Safe to call twice.
    pub fn shutdown(&self) {
        self.context.queue.close();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            if worker.join().is_err() {
                log::error!("Thumbnail loader thread panicked during shutdown");
            }
        }
        log::info!("Thumbnail service stopped");
    }
}

impl Drop for ThumbnailService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::art::decoder::tests::png_bytes;
    use crate::art::decoder::ImageCrateDecoder;
    use crate::art::error::ThumbnailResult;
    use crate::art::sink::{CompletionHub, LoadStatus, ThumbnailEvent};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    /// Resolves every source to the same bytes
    struct FixedResolver(Vec<u8>);

    impl SourceResolver for FixedResolver {
        fn resolve(&self, _source: &ArtSource) -> ThumbnailResult<Option<Vec<u8>>> {
            Ok(Some(self.0.clone()))
        }
    }

    /// Counts decode calls and holds each one until the test releases it
    struct GatedDecoder {
        calls: AtomicUsize,
        gate: parking_lot::Mutex<Receiver<()>>,
        inner: ImageCrateDecoder,
    }

    impl GatedDecoder {
        fn new() -> (Arc<Self>, Sender<()>) {
            let (tx, rx) = mpsc::channel();
            let decoder = Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: parking_lot::Mutex::new(rx),
                inner: ImageCrateDecoder::default(),
            });
            (decoder, tx)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ImageDecoder for GatedDecoder {
        fn decode(&self, bytes: &[u8], target_size: u32) -> ThumbnailResult<Bitmap> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.lock().recv_timeout(WAIT);
            self.inner.decode(bytes, target_size)
        }
    }

    struct Harness {
        service: Arc<ThumbnailService>,
        decoder: Arc<GatedDecoder>,
        release: Sender<()>,
        events: Receiver<ThumbnailEvent>,
    }

    impl Harness {
        fn new(art: Vec<u8>) -> Self {
            let (decoder, release) = GatedDecoder::new();
            let hub = Arc::new(CompletionHub::new());
            let events = hub.subscribe();
            let settings = ServiceSettings {
                worker_threads: 1,
                ..ServiceSettings::default()
            };
            let resolver = Arc::new(FixedResolver(art));
            let service =
                ThumbnailService::start(settings, resolver, decoder.clone(), hub).unwrap();
            Self {
                service,
                decoder,
                release,
                events,
            }
        }

        fn request(&self, key: &str, size: u32) -> RequestOutcome {
            self.service.request(
                CacheKey::from(key),
                ArtSource::Folder(PathBuf::from(key)),
                size,
                Priority::Visible,
            )
        }

        fn release_and_wait(&self) -> ThumbnailEvent {
            self.release.send(()).unwrap();
            self.events.recv_timeout(WAIT).unwrap()
        }
    }

    #[test]
    fn test_duplicate_requests_decode_once() {
        let harness = Harness::new(png_bytes(64, 64));
        assert_eq!(harness.request("k", 32), RequestOutcome::Queued);
        assert_eq!(harness.request("k", 32), RequestOutcome::AlreadyPending);
        assert_eq!(harness.service.lookup(&CacheKey::from("k"), 32), CellState::Loading);

        let event = harness.release_and_wait();
        assert_eq!(event.status, LoadStatus::Ready);
        assert_eq!(harness.decoder.calls(), 1);

        // Now cached, a further request is a no-op
        assert_eq!(harness.request("k", 32), RequestOutcome::Cached);
        assert!(matches!(harness.service.lookup(&CacheKey::from("k"), 32), CellState::Ready(_)));
    }

    #[test]
    fn test_unparseable_art_is_blacklisted() {
        let harness = Harness::new(b"not an image at all".to_vec());
        let key = CacheKey::from("X");
        harness.request("X", 64);

        let event = harness.release_and_wait();
        assert_eq!(event.status, LoadStatus::NoArtwork);
        assert!(harness.service.get(&key, 64).is_none());
        assert!(harness.service.negative().contains(&key));
        assert_eq!(harness.service.lookup(&key, 64), CellState::NoArtwork);

        assert_eq!(harness.request("X", 64), RequestOutcome::Blacklisted);
        assert_eq!(harness.decoder.calls(), 1);
    }

    #[test]
    fn test_clear_negative_allows_retry() {
        let harness = Harness::new(b"garbage".to_vec());
        harness.request("X", 64);
        harness.release_and_wait();

        harness.service.clear_negative();
        assert_eq!(harness.request("X", 64), RequestOutcome::Queued);
        harness.release_and_wait();
        assert_eq!(harness.decoder.calls(), 2);
    }

    #[test]
    fn test_size_change_regenerates() {
        let harness = Harness::new(png_bytes(600, 600));
        let key = CacheKey::from("Y");
        harness.request("Y", 120);
        harness.release_and_wait();
        assert_eq!(harness.service.get(&key, 120).unwrap().width(), 120);

        // The 120px bitmap is not final at 400px, but stays visible meanwhile
        assert!(harness.service.get(&key, 400).is_none());
        assert!(matches!(harness.service.lookup(&key, 400), CellState::Stale(_)));
        assert_eq!(harness.request("Y", 400), RequestOutcome::Queued);
        assert!(matches!(harness.service.lookup(&key, 400), CellState::Stale(_)));

        harness.release_and_wait();
        let bitmap = harness.service.get(&key, 400).unwrap();
        assert_eq!(bitmap.width(), 400);
        assert_eq!(harness.service.store().len(), 1);
    }

    #[test]
    fn test_shutdown_stops_accepting_work() {
        let harness = Harness::new(png_bytes(8, 8));
        harness.service.shutdown();
        harness.service.shutdown();
        assert_eq!(harness.request("late", 32), RequestOutcome::Dropped);
    }

    #[test]
    fn test_clear_all_resets_everything() {
        let harness = Harness::new(png_bytes(64, 64));
        harness.request("a", 32);
        harness.release_and_wait();
        harness.service.negative().add(CacheKey::from("b"));

        harness.service.clear_all();
        let stats = harness.service.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.bytes, 0);
        assert_eq!(stats.no_artwork, 0);
        assert_eq!(stats.decoded, 1);
    }

    #[test]
    fn test_lowering_budget_evicts() {
        let harness = Harness::new(png_bytes(64, 64));
        for key in ["a", "b"] {
            harness.request(key, 32);
            harness.release_and_wait();
        }
        assert_eq!(harness.service.stats().bytes, 2 * 32 * 32 * 4);

        harness.service.set_budget(32 * 32 * 4);
        let stats = harness.service.stats();
        assert_eq!(stats.entries, 1);
        assert!(harness.service.get(&CacheKey::from("b"), 32).is_some());
    }
}
