//! Background thumbnail loader
//!
//! A small pool of worker threads drains the load queue, resolves and
//! decodes artwork, and publishes the result to either the thumbnail store
//! or the negative cache before notifying subscribers.
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::bitmap::Bitmap;
use super::decoder::ImageDecoder;
use super::error::{ThumbnailError, ThumbnailResult};
use super::negative::NegativeCache;
use super::queue::{LoadQueue, LoadRequest};
use super::resolver::SourceResolver;
use super::sink::{CompletionSink, LoadStatus, ThumbnailEvent};
use super::store::{CacheEntry, CacheStore};

/// Running totals, readable from any thread
#[derive(Debug, Default)]
pub struct LoaderCounters {
    pub decoded: AtomicU64,
    pub no_artwork: AtomicU64,
    pub failed: AtomicU64,
}

/// Everything a worker needs, shared between all workers
pub struct LoaderContext {
    pub store: Arc<CacheStore>,
    pub negative: Arc<NegativeCache>,
    pub queue: Arc<LoadQueue>,
    pub resolver: Arc<dyn SourceResolver>,
    pub decoder: Arc<dyn ImageDecoder>,
    pub sink: Arc<dyn CompletionSink>,
    pub counters: LoaderCounters,
}

/// Start `count` worker threads (at least one)
pub fn spawn_workers(context: Arc<LoaderContext>, count: usize) -> io::Result<Vec<JoinHandle<()>>> {
    (0..count.max(1))
        .map(|id| {
            let context = Arc::clone(&context);
            thread::Builder::new()
                .name(format!("thumbnail-loader-{}", id))
                .spawn(move || worker_loop(id, &context))
        })
        .collect()
}

fn worker_loop(id: usize, context: &LoaderContext) {
    log::debug!("Thumbnail loader {} started", id);
    while let Some(request) = context.queue.pop_blocking() {
        let event = process_request(context, &request);
        // Result is published; the key may be requested again from here on
        context.queue.complete(&request.key);
        context.sink.notify(event);
    }
    log::debug!("Thumbnail loader {} stopped", id);
}

/// Load one request and publish the outcome. Never panics.
pub fn process_request(context: &LoaderContext, request: &LoadRequest) -> ThumbnailEvent {
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| load(context, request)))
        .unwrap_or_else(|payload| Err(ThumbnailError::Panicked(panic_message(payload.as_ref()))));

    let status = match result {
        Ok(Some(bitmap)) => {
            log::debug!(
                "Decoded {} at {}px ({}x{}) in {:?}",
                request.key,
                request.target_size,
                bitmap.width(),
                bitmap.height(),
                started.elapsed()
            );
            context
                .store
                .put(request.key.clone(), CacheEntry::new(bitmap, request.target_size));
            context.counters.decoded.fetch_add(1, Ordering::Relaxed);
            LoadStatus::Ready
        }
        Ok(None) => {
            log::debug!("No artwork for {}", request.key);
            context.counters.no_artwork.fetch_add(1, Ordering::Relaxed);
            blacklist(context, request);
            LoadStatus::NoArtwork
        }
        Err(err) => {
            context.counters.failed.fetch_add(1, Ordering::Relaxed);
            if blacklist(context, request) {
                log::warn!("Artwork for {} unusable: {}", request.key, err);
            }
            LoadStatus::NoArtwork
        }
    };

    ThumbnailEvent {
        key: request.key.clone(),
        status,
    }
}

fn load(context: &LoaderContext, request: &LoadRequest) -> ThumbnailResult<Option<Bitmap>> {
    let Some(bytes) = context.resolver.resolve(&request.source)? else {
        return Ok(None);
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    context.decoder.decode(&bytes, request.target_size).map(Some)
}

/// Move the key to the negative cache. A stale bitmap from an earlier size
/// is dropped so the key lives in exactly one place.
fn blacklist(context: &LoaderContext, request: &LoadRequest) -> bool {
    context.store.remove(&request.key);
    context.negative.add(request.key.clone())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
