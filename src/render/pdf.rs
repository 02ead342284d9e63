//! MuPDF-backed document renderer

use std::path::{Path, PathBuf};

use log::debug;
use mupdf::{Colorspace, DisplayList, Document, Matrix};

use super::{DocumentRenderer, PageRenderer, Pixmap, RenderFault};

/// Base handle for a PDF (or any MuPDF-supported format) on disk.
///
/// MuPDF documents are bound to the thread that opened them, so the base only
/// keeps what is needed to reopen the file; every clone opens a private
/// `Document` on the calling worker thread.
#[derive(Debug)]
pub struct MupdfDocument {
    path: PathBuf,
    page_count: usize,
    first_page_size: (f32, f32),
}

impl MupdfDocument {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RenderFault> {
        let path = path.as_ref().to_path_buf();
        let doc = open_document(&path)?;
        let page_count = doc.page_count().map_err(|e| RenderFault::Open {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        let page_count = usize::try_from(page_count).unwrap_or(0);
        if page_count == 0 {
            return Err(RenderFault::Open {
                path,
                detail: "document has no pages".into(),
            });
        }

        let bounds = doc
            .load_page(0)
            .and_then(|page| page.bounds())
            .map_err(|e| RenderFault::Open {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        let first_page_size = (bounds.x1 - bounds.x0, bounds.y1 - bounds.y0);

        debug!(
            "Opened {} with {page_count} pages, first page {:.1}x{:.1}",
            path.display(),
            first_page_size.0,
            first_page_size.1
        );
        Ok(Self {
            path,
            page_count,
            first_page_size,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_document(path: &Path) -> Result<Document, RenderFault> {
    Document::open(path.to_string_lossy().as_ref()).map_err(|e| RenderFault::Open {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

impl DocumentRenderer for MupdfDocument {
    type Handle = MupdfHandle;

    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_size_hint(&self) -> (f32, f32) {
        self.first_page_size
    }

    fn clone_handle(&self) -> Result<MupdfHandle, RenderFault> {
        Ok(MupdfHandle {
            doc: open_document(&self.path)?,
        })
    }
}

/// Worker-private document
pub struct MupdfHandle {
    doc: Document,
}

/// Recorded drawing commands of one page plus its bounds
pub struct MupdfLayout {
    list: DisplayList,
    size: (f32, f32),
}

impl PageRenderer for MupdfHandle {
    type Layout = MupdfLayout;

    fn layout(&self, page: usize) -> Result<MupdfLayout, RenderFault> {
        let index = i32::try_from(page)
            .map_err(|_| RenderFault::decode(page, "page index out of range"))?;
        let page = self.doc.load_page(index)?;
        let bounds = page.bounds()?;
        let list = page.to_display_list(true)?;

        Ok(MupdfLayout {
            list,
            size: (bounds.x1 - bounds.x0, bounds.y1 - bounds.y0),
        })
    }

    fn native_size(&self, layout: &MupdfLayout) -> (f32, f32) {
        layout.size
    }

    fn rasterize(&self, layout: &MupdfLayout, scale: f32) -> Result<Pixmap, RenderFault> {
        let rgb = Colorspace::device_rgb();
        let pixmap = layout
            .list
            .to_pixmap(&Matrix::new_scale(scale, scale), &rgb, false)?;
        pixmap_to_rgb(&pixmap)
    }
}

fn pixmap_to_rgb(pixmap: &mupdf::Pixmap) -> Result<Pixmap, RenderFault> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(RenderFault::generic(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(RenderFault::generic("Pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * Pixmap::CHANNELS);
    for y in 0..height {
        let row = &samples[y * stride..y * stride + row_bytes];
        if n == Pixmap::CHANNELS {
            out.extend_from_slice(row);
        } else {
            for px in row.chunks_exact(n) {
                out.extend_from_slice(&px[..Pixmap::CHANNELS]);
            }
        }
    }

    Pixmap::from_rgb(pixmap.width(), pixmap.height(), out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_file_is_fatal() {
        let err = MupdfDocument::open("/nonexistent/least-test.pdf").unwrap_err();
        assert!(err.is_fatal());
    }
}
