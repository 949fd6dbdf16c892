//! Cover art decoding
//!
//! Turns raw artwork bytes (JPEG, PNG, ...) into an aspect-correct RGBA
//! bitmap that fits inside a square of the requested size.
use image::imageops::FilterType;

use super::bitmap::Bitmap;
use super::error::{ThumbnailError, ThumbnailResult};

/// Decodes artwork bytes into a thumbnail.
///
/// Implementations are shared between all loader threads and must be safe
/// to call concurrently with independent inputs.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], target_size: u32) -> ThumbnailResult<Bitmap>;
}

// Triangle is noticeably faster than Lanczos3 and the difference is
// invisible at grid sizes
const FILTER: FilterType = FilterType::Triangle;

/// Decoder backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8], target_size: u32) -> ThumbnailResult<Bitmap> {
        let img = image::load_from_memory(bytes)?;
        if img.width() == 0 || img.height() == 0 {
            return Err(ThumbnailError::Empty {
                width: img.width(),
                height: img.height(),
            });
        }

        let target = target_size.max(1);
        // Never upscale small covers, the grid stretches them anyway
        let thumbnail = if img.width() > target || img.height() > target {
            img.resize(target, target, FILTER)
        } else {
            img
        };

        let rgba = thumbnail.to_rgba8();
        let (width, height) = rgba.dimensions();
        Bitmap::from_rgba(width, height, rgba.into_raw())
            .ok_or(ThumbnailError::Empty { width, height })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    /// Encode a solid-colour image, used as fixture artwork across the crate
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_keeps_aspect_ratio() {
        let decoder = ImageCrateDecoder::default();
        let bitmap = decoder.decode(&png_bytes(400, 200), 100).unwrap();
        assert_eq!(bitmap.width(), 100);
        assert_eq!(bitmap.height(), 50);
        assert_eq!(bitmap.byte_size(), 100 * 50 * 4);
    }

    #[test]
    fn test_decode_does_not_upscale() {
        let decoder = ImageCrateDecoder::default();
        let bitmap = decoder.decode(&png_bytes(32, 32), 256).unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (32, 32));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let decoder = ImageCrateDecoder::default();
        let result = decoder.decode(b"definitely not an image", 128);
        assert!(matches!(result, Err(ThumbnailError::Decode(_))));
    }
}
