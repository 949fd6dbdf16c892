/// Cover art thumbnails
///
/// This module handles:
/// - Locating artwork for an album (sidecar files, embedded pictures)
/// - Decoding it off the UI thread on a small worker pool
/// - Keeping decoded thumbnails in a memory-bounded store
/// - Remembering albums that have no usable artwork
/// - Notifying views when thumbnails become ready

pub mod bitmap;
pub mod decoder;
pub mod error;
pub mod key;
pub mod loader;
pub mod negative;
pub mod queue;
pub mod resolver;
pub mod service;
pub mod sink;
pub mod store;

pub use bitmap::Bitmap;
pub use decoder::{ImageCrateDecoder, ImageDecoder};
pub use error::{ThumbnailError, ThumbnailResult};
pub use key::CacheKey;
pub use negative::NegativeCache;
pub use queue::{LoadQueue, LoadRequest, Priority, RequestOutcome};
pub use resolver::{ArtSource, FolderArtResolver, SourceResolver};
pub use service::{CacheStats, CellState, ServiceSettings, ThumbnailService};
pub use sink::{CompletionHub, CompletionSink, LoadStatus, ThumbnailEvent};
pub use store::{CacheEntry, CacheStore, Freshness};
