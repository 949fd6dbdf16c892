use std::sync::Arc;

/// A decoded, size-fitted RGBA thumbnail.
///
/// Pixels live behind an `Arc` so handing a bitmap to the display thread is
/// a pointer copy. There is no way to get mutable access to the pixels once
/// a `Bitmap` exists.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
}

impl Bitmap {
    /// Wrap raw RGBA pixels. Returns `None` if the buffer does not match
    /// `width * height * 4`.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if pixels.len() != expected {
            log::warn!(
                "RGBA size mismatch: expected {} bytes ({}x{}x4), got {}",
                expected,
                width,
                height,
                pixels.len()
            );
            return None;
        }

        Some(Self {
            pixels: pixels.into(),
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Bytes held by the pixel buffer, used for budget accounting
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// True if both bitmaps share the same pixel allocation
    pub fn ptr_eq(&self, other: &Bitmap) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) && self.width == other.width && self.height == other.height
    }
}

impl Eq for Bitmap {}
