use thiserror::Error;

/// Everything that can go wrong while producing a thumbnail.
///
/// None of these are fatal: the loader records the key in the negative
/// cache and moves on to the next request.
#[derive(Debug, Error)]
pub enum ThumbnailError {
    /// The source could not be read from disk
    #[error("failed to read artwork source: {0}")]
    Io(#[from] std::io::Error),

    /// The artwork bytes were corrupt or in an unsupported format
    #[error("failed to decode artwork: {0}")]
    Decode(#[from] image::ImageError),

    /// The decoder produced an image with no pixels
    #[error("decoded artwork is empty ({width}x{height})")]
    Empty { width: u32, height: u32 },

    /// A resolver or decoder panicked; the worker caught it and kept running
    #[error("artwork worker panicked: {0}")]
    Panicked(String),
}

pub type ThumbnailResult<T> = Result<T, ThumbnailError>;
