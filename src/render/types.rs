//! Pixel buffers and renderer faults

use std::path::PathBuf;

/// Raw RGB output of a single rasterization, 3 bytes per pixel, rows packed.
///
/// Owned exclusively by the worker that produced it until the completion is
/// handed to the control loop.
#[derive(Clone, PartialEq, Eq)]
pub struct Pixmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Pixmap {
    pub const CHANNELS: usize = 3;

    /// Wrap packed RGB data, checking the buffer matches the dimensions
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, RenderFault> {
        let expected = width as usize * height as usize * Self::CHANNELS;
        if pixels.len() != expected {
            return Err(RenderFault::generic(format!(
                "pixmap buffer size mismatch: {} bytes for {width}x{height}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Solid white pixmap
    #[must_use]
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0xFF; width as usize * height as usize * Self::CHANNELS],
        }
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Pixmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pixmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Cached bitmap of a ready page, owned by the page catalog.
#[derive(Clone, PartialEq)]
pub struct PageBitmap {
    pub page: usize,
    /// Scale the bitmap was rasterized at
    pub scale: f32,
    pub pixmap: Pixmap,
}

impl PageBitmap {
    #[must_use]
    pub fn from_pixmap(page: usize, scale: f32, pixmap: Pixmap) -> Self {
        Self {
            page,
            scale,
            pixmap,
        }
    }

    #[must_use]
    pub fn width_px(&self) -> u32 {
        self.pixmap.width
    }

    #[must_use]
    pub fn height_px(&self) -> u32 {
        self.pixmap.height
    }
}

impl std::fmt::Debug for PageBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBitmap")
            .field("page", &self.page)
            .field("scale", &self.scale)
            .field("width_px", &self.pixmap.width)
            .field("height_px", &self.pixmap.height)
            .finish_non_exhaustive()
    }
}

/// Errors from the document renderer
#[derive(Debug, thiserror::Error)]
pub enum RenderFault {
    /// The document cannot be displayed at all
    #[error("cannot open {}: {detail}", path.display())]
    Open { path: PathBuf, detail: String },

    /// A single page failed to decode or rasterize
    #[error("page {page}: {detail}")]
    Decode { page: usize, detail: String },

    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("{detail}")]
    Generic { detail: String },
}

impl RenderFault {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }

    pub fn decode(page: usize, msg: impl Into<String>) -> Self {
        Self::Decode {
            page,
            detail: msg.into(),
        }
    }

    /// Whether the fault ends the session rather than a single page
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}
