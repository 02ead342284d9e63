//! Fixed-size table of per-page cache state

use std::sync::Arc;

use log::{debug, warn};

use crate::render::PageBitmap;

/// Lifecycle state of a page's cached bitmap
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PageState {
    /// No bitmap and no worker producing one
    Empty,
    /// A worker owns producing the bitmap
    Rendering,
    /// A valid bitmap is cached
    Ready,
    /// Rendering failed too many times; not retried until the next invalidation
    Failed,
}

#[derive(Clone, Debug)]
enum Slot {
    Empty,
    Rendering,
    Ready(Arc<PageBitmap>),
    Failed,
}

/// One document page
#[derive(Clone, Debug)]
pub struct Page {
    index: usize,
    native_size: Option<(f32, f32)>,
    scaled_size: Option<(f32, f32)>,
    slot: Slot,
    failures: u32,
}

impl Page {
    fn new(index: usize) -> Self {
        Self {
            index,
            native_size: None,
            scaled_size: None,
            slot: Slot::Empty,
            failures: 0,
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn state(&self) -> PageState {
        match self.slot {
            Slot::Empty => PageState::Empty,
            Slot::Rendering => PageState::Rendering,
            Slot::Ready(_) => PageState::Ready,
            Slot::Failed => PageState::Failed,
        }
    }

    #[must_use]
    pub fn bitmap(&self) -> Option<&Arc<PageBitmap>> {
        match &self.slot {
            Slot::Ready(bitmap) => Some(bitmap),
            _ => None,
        }
    }

    #[must_use]
    pub fn native_size(&self) -> Option<(f32, f32)> {
        self.native_size
    }

    #[must_use]
    pub fn scaled_size(&self) -> Option<(f32, f32)> {
        self.scaled_size
    }

    /// Consecutive failed renders since the last success or invalidation
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Errors from invalid catalog transitions
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("page {page} out of range (document has {count} pages)")]
    OutOfRange { page: usize, count: usize },

    #[error("page {0} is being rendered and cannot be evicted")]
    EvictInFlight(usize),

    #[error("page {page} cannot start rendering from state {state:?}")]
    NotSchedulable { page: usize, state: PageState },
}

/// Owns every page entry and its bitmap. Sized once when the document is
/// opened; only the control loop mutates it.
#[derive(Debug)]
pub struct PageCatalog {
    pages: Vec<Page>,
    scale: f32,
}

impl PageCatalog {
    #[must_use]
    pub fn new(count: usize, scale: f32) -> Self {
        Self {
            pages: (0..count).map(Page::new).collect(),
            scale,
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn get(&self, page: usize) -> Option<&Page> {
        self.pages.get(page)
    }

    #[must_use]
    pub fn state(&self, page: usize) -> Option<PageState> {
        self.pages.get(page).map(Page::state)
    }

    #[must_use]
    pub fn bitmap(&self, page: usize) -> Option<&Arc<PageBitmap>> {
        self.pages.get(page).and_then(Page::bitmap)
    }

    #[must_use]
    pub fn native_size(&self, page: usize) -> Option<(f32, f32)> {
        self.pages.get(page).and_then(Page::native_size)
    }

    #[must_use]
    pub fn scaled_size(&self, page: usize) -> Option<(f32, f32)> {
        self.pages.get(page).and_then(Page::scaled_size)
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter()
    }

    /// Number of pages currently in `state`
    #[must_use]
    pub fn count_in(&self, state: PageState) -> usize {
        self.pages.iter().filter(|p| p.state() == state).count()
    }

    /// Total bytes held by cached bitmaps
    #[must_use]
    pub fn ready_bytes(&self) -> usize {
        self.pages
            .iter()
            .filter_map(Page::bitmap)
            .map(|bitmap| bitmap.pixmap.byte_len())
            .sum()
    }

    fn page_mut(&mut self, page: usize) -> Result<&mut Page, CatalogError> {
        let count = self.pages.len();
        self.pages
            .get_mut(page)
            .ok_or(CatalogError::OutOfRange { page, count })
    }

    /// `Empty -> Rendering`
    pub fn set_rendering(&mut self, page: usize) -> Result<(), CatalogError> {
        let entry = self.page_mut(page)?;
        match entry.slot {
            Slot::Empty => {
                entry.slot = Slot::Rendering;
                Ok(())
            }
            _ => Err(CatalogError::NotSchedulable {
                page,
                state: entry.state(),
            }),
        }
    }

    /// `Rendering -> Ready`.
    ///
    /// Anything else is a stale completion: it is logged and ignored, and
    /// `false` is returned. Records the native size on the first render.
    pub fn set_ready(
        &mut self,
        page: usize,
        bitmap: Arc<PageBitmap>,
        native_size: (f32, f32),
    ) -> bool {
        let scale = self.scale;
        let Ok(entry) = self.page_mut(page) else {
            warn!("Ignoring bitmap for out-of-range page {page}");
            return false;
        };
        if !matches!(entry.slot, Slot::Rendering) {
            warn!(
                "Ignoring bitmap for page {page} in state {:?}",
                entry.state()
            );
            return false;
        }

        let native = *entry.native_size.get_or_insert(native_size);
        entry.scaled_size = Some((native.0 * scale, native.1 * scale));
        entry.slot = Slot::Ready(bitmap);
        entry.failures = 0;
        true
    }

    /// `Ready -> Empty`, releasing the bitmap. A no-op on pages without a
    /// bitmap; an error on pages being rendered.
    pub fn evict(&mut self, page: usize) -> Result<Option<Arc<PageBitmap>>, CatalogError> {
        let entry = self.page_mut(page)?;
        match std::mem::replace(&mut entry.slot, Slot::Empty) {
            Slot::Ready(bitmap) => {
                debug!("Evicted page {page}");
                Ok(Some(bitmap))
            }
            Slot::Rendering => {
                entry.slot = Slot::Rendering;
                Err(CatalogError::EvictInFlight(page))
            }
            other => {
                entry.slot = other;
                Ok(None)
            }
        }
    }

    /// `Rendering -> Empty` for a page whose in-flight job was superseded.
    /// The worker keeps running; its result will be discarded on arrival.
    pub fn reset_stale(&mut self, page: usize) -> bool {
        match self.page_mut(page) {
            Ok(entry) if matches!(entry.slot, Slot::Rendering) => {
                entry.slot = Slot::Empty;
                true
            }
            _ => false,
        }
    }

    /// `Rendering -> Empty`, or `Rendering -> Failed` once `max_attempts`
    /// consecutive renders have failed. Returns the resulting state, or
    /// `None` when the page was not being rendered.
    pub fn record_failure(&mut self, page: usize, max_attempts: u32) -> Option<PageState> {
        let entry = self.page_mut(page).ok()?;
        if !matches!(entry.slot, Slot::Rendering) {
            warn!(
                "Ignoring failure for page {page} in state {:?}",
                entry.state()
            );
            return None;
        }

        entry.failures = entry.failures.saturating_add(1);
        entry.slot = if entry.failures >= max_attempts.max(1) {
            Slot::Failed
        } else {
            Slot::Empty
        };
        Some(entry.state())
    }

    /// `Failed -> Empty` for every page and forget all failure counts
    pub fn clear_failures(&mut self) {
        for entry in &mut self.pages {
            if matches!(entry.slot, Slot::Failed) {
                entry.slot = Slot::Empty;
            }
            entry.failures = 0;
        }
    }

    /// Change the render scale and recompute every known scaled size
    pub fn rescale(&mut self, scale: f32) {
        self.scale = scale;
        for entry in &mut self.pages {
            entry.scaled_size = entry.native_size.map(|(w, h)| (w * scale, h * scale));
        }
    }
}
