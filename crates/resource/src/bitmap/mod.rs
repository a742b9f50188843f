mod direct;
mod spritesheet;

pub use direct::*;
pub use spritesheet::*;

use std::{fmt, sync::Arc};

use image::{RgbaImage, imageops};

use crate::{Pollable, ResourceError, Result};

/// Decoded RGBA pixels.
#[derive(Clone)]
pub struct Bitmap {
    pixels: RgbaImage,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({}x{})", self.width(), self.height())
    }
}

impl Bitmap {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    /// Decodes image bytes (any format supported by the `image` crate).
    pub fn decode(url: &str, bytes: &[u8]) -> Result<Self> {
        let pixels = image::load_from_memory(bytes)
            .map_err(|source| ResourceError::Image {
                url: url.to_string(),
                source,
            })?
            .to_rgba8();
        Ok(Self { pixels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Raw RGBA8 bytes, row major.
    pub fn pixels(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Copies a sub-rectangle into its own bitmap. The rectangle is clamped to the
    /// bitmap bounds.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Bitmap {
        Bitmap {
            pixels: imageops::crop_imm(&self.pixels, x, y, width, height).to_image(),
        }
    }
}

/// A lazily loading image.
///
/// The handle is returned synchronously by [`ImageLoader::load_image`] and re-read by
/// the frame loop: `loading()` stays `true` until the fetch settles, after which
/// either `bitmap()` is available or `is_failed()` reports the error. Clones share
/// the same cell.
#[derive(Clone, Debug)]
pub struct BitmapHandle {
    cell: Pollable<Arc<Bitmap>>,
}

impl BitmapHandle {
    pub fn loading(&self) -> bool {
        !self.cell.is_settled()
    }

    pub fn is_failed(&self) -> bool {
        self.cell.is_failed()
    }

    pub fn bitmap(&self) -> Option<&Arc<Bitmap>> {
        self.cell.get_result()
    }

    pub fn width(&self) -> Option<u32> {
        self.bitmap().map(|bitmap| bitmap.width())
    }

    pub fn height(&self) -> Option<u32> {
        self.bitmap().map(|bitmap| bitmap.height())
    }

    pub fn error(&self) -> Option<&Arc<ResourceError>> {
        self.cell.error()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.cell.ptr_eq(&other.cell)
    }

    /// The underlying pollable, for callers that want to wait on it.
    pub fn pollable(&self) -> &Pollable<Arc<Bitmap>> {
        &self.cell
    }
}

impl From<Pollable<Arc<Bitmap>>> for BitmapHandle {
    fn from(cell: Pollable<Arc<Bitmap>>) -> Self {
        Self { cell }
    }
}

/// Resolves image ids to lazily loading bitmaps.
pub trait ImageLoader: Send + Sync {
    /// Never blocks: returns the cached handle, or a loading one after starting the
    /// fetch.
    fn load_image(&self, id: &str) -> BitmapHandle;
}
