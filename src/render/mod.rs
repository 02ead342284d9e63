//! Document renderer interface and the lock that serializes it

mod guard;
#[cfg(feature = "pdf")]
mod pdf;
mod types;

pub use guard::{GuardStats, RenderBackendGuard};
#[cfg(feature = "pdf")]
pub use pdf::{MupdfDocument, MupdfHandle, MupdfLayout};
pub use types::{PageBitmap, Pixmap, RenderFault};

/// Shared base handle of an opened document.
///
/// The base lives behind [`RenderBackendGuard`] and is only touched while the
/// guard is held. Workers never render through it directly; each one clones a
/// private [`PageRenderer`] from it at startup.
pub trait DocumentRenderer: Send + 'static {
    type Handle: PageRenderer;

    /// Number of pages in the document
    fn page_count(&self) -> usize;

    /// Nominal page size in document units, used to lay out the document
    /// before any page has been rendered.
    fn page_size_hint(&self) -> (f32, f32);

    /// Create a worker-private handle. Callers must hold the backend guard.
    fn clone_handle(&self) -> Result<Self::Handle, RenderFault>;
}

/// Worker-private renderer handle.
///
/// Rendering is split in two phases. [`layout`](Self::layout) touches
/// non-reentrant backend state and must run under the backend guard;
/// [`rasterize`](Self::rasterize) only reads the produced layout and runs
/// unlocked, in parallel with other workers. Dropping a layout is backend
/// teardown and also happens under the guard.
pub trait PageRenderer {
    type Layout;

    fn layout(&self, page: usize) -> Result<Self::Layout, RenderFault>;

    /// Page size in document units
    fn native_size(&self, layout: &Self::Layout) -> (f32, f32);

    fn rasterize(&self, layout: &Self::Layout, scale: f32) -> Result<Pixmap, RenderFault>;
}
