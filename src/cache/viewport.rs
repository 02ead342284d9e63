//! Focus page and cache window derived from the scroll position
//!
//! Pages are laid out top to bottom, `page_pitch` apart. The scroll offset
//! is the screen position of the top of page 0: zero at the top of the
//! document, increasingly negative further down.

use std::ops::Range;

/// Scroll position and page geometry in viewport units.
///
/// Owned and mutated by the input layer; read-only to the cache.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    pub scroll_offset: f32,
    /// (width, height)
    pub viewport_size: (f32, f32),
    /// Height of one page at the current render scale
    pub page_height: f32,
    /// Gap between consecutive pages
    pub page_margin: f32,
}

impl ViewportState {
    #[must_use]
    pub fn new(viewport_size: (f32, f32), page_height: f32, page_margin: f32) -> Self {
        Self {
            scroll_offset: 0.0,
            viewport_size,
            page_height,
            page_margin,
        }
    }

    #[must_use]
    pub fn with_scroll(mut self, scroll_offset: f32) -> Self {
        self.scroll_offset = scroll_offset;
        self
    }

    /// Vertical distance between the tops of consecutive pages
    #[must_use]
    pub fn page_pitch(&self) -> f32 {
        self.page_height + self.page_margin
    }

    #[must_use]
    pub fn viewport_height(&self) -> f32 {
        self.viewport_size.1
    }

    /// Screen y of the top edge of `page`
    #[must_use]
    pub fn page_top(&self, page: usize) -> f32 {
        self.scroll_offset + page as f32 * self.page_pitch()
    }

    /// Height of the whole document strip, without trailing margin
    #[must_use]
    pub fn document_height(&self, page_count: usize) -> f32 {
        if page_count == 0 {
            return 0.0;
        }
        page_count as f32 * self.page_pitch() - self.page_margin
    }

    /// Most negative scroll offset that still keeps the last page in view
    #[must_use]
    pub fn min_scroll(&self, page_count: usize) -> f32 {
        -(self.document_height(page_count) - self.viewport_height()).max(0.0)
    }

    /// Offset that puts the top of `page` at the top of the viewport
    #[must_use]
    pub fn scroll_for_page(&self, page: usize) -> f32 {
        -(page as f32 * self.page_pitch())
    }

    /// Pages intersecting the viewport
    #[must_use]
    pub fn visible_range(&self, page_count: usize) -> Range<usize> {
        let pitch = self.page_pitch();
        if page_count == 0 || !pitch.is_finite() || pitch <= 0.0 {
            return 0..0;
        }
        let first = ((-self.scroll_offset - self.page_height) / pitch).floor() + 1.0;
        let stop = ((self.viewport_height() - self.scroll_offset) / pitch).ceil();
        let first = clamp_index(first, page_count);
        let stop = clamp_index(stop, page_count + 1).min(page_count);
        first..stop.max(first)
    }

    /// Apply a new page height (after a scale change), keeping the same
    /// relative position within the document.
    pub fn rescale_pages(&mut self, page_height: f32) {
        let old_pitch = self.page_pitch();
        self.page_height = page_height;
        if old_pitch > 0.0 && old_pitch.is_finite() {
            self.scroll_offset *= self.page_pitch() / old_pitch;
        }
    }
}

/// Render scale that makes a page `native_width` wide fill the viewport
#[must_use]
pub fn fit_width_scale(viewport_width: f32, native_width: f32) -> f32 {
    if native_width > 0.0 && viewport_width > 0.0 {
        viewport_width / native_width
    } else {
        1.0
    }
}

fn clamp_index(value: f32, count: usize) -> usize {
    if value.is_nan() || value <= 0.0 {
        0
    } else {
        (value as usize).min(count.saturating_sub(1))
    }
}

/// Contiguous page range `[start, stop)` kept rendered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CacheWindow {
    pub start: usize,
    pub stop: usize,
}

impl CacheWindow {
    #[must_use]
    pub fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    #[must_use]
    pub fn contains(&self, page: usize) -> bool {
        (self.start..self.stop).contains(&page)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stop - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.start..self.stop
    }

    /// How far `page` lies outside the window; zero inside it
    #[must_use]
    pub fn distance(&self, page: usize) -> usize {
        if page < self.start {
            self.start - page
        } else if page >= self.stop {
            page + 1 - self.stop
        } else {
            0
        }
    }
}

/// The page judged to occupy the most viewport area.
///
/// The page containing the viewport midpoint, nudged by half a margin so a
/// gap between pages resolves to the page below it.
#[must_use]
pub fn focus_page(viewport: &ViewportState, page_count: usize) -> usize {
    if page_count == 0 || viewport.scroll_offset >= 0.0 {
        return 0;
    }
    let pitch = viewport.page_pitch();
    if !pitch.is_finite() || pitch <= 0.0 {
        return 0;
    }

    let midpoint =
        -viewport.scroll_offset + viewport.viewport_height() / 2.0 + viewport.page_margin / 2.0;
    clamp_index((midpoint / pitch).floor(), page_count)
}

/// Window of `min(budget, page_count)` pages centred on `focus`, pinned to
/// the document edges rather than shrinking there.
#[must_use]
pub fn cache_window(focus: usize, page_count: usize, budget: usize) -> CacheWindow {
    let width = budget.min(page_count);
    let half = budget.saturating_sub(1) / 2;
    let start = focus.saturating_sub(half).min(page_count - width);
    CacheWindow::new(start, start + width)
}

/// Focus page and desired cache window for one scheduler tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewportModel {
    pub focus_page: usize,
    pub window: CacheWindow,
}

impl ViewportModel {
    #[must_use]
    pub fn compute(viewport: &ViewportState, page_count: usize, budget: usize) -> Self {
        let focus_page = focus_page(viewport, page_count);
        Self {
            focus_page,
            window: cache_window(focus_page, page_count, budget),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn viewport() -> ViewportState {
        // 100 high pages, 20 margin, 300 high viewport
        ViewportState::new((80.0, 300.0), 100.0, 20.0)
    }

    #[test]
    fn top_of_document_focuses_first_page() {
        assert_eq!(focus_page(&viewport(), 10), 0);
        assert_eq!(focus_page(&viewport().with_scroll(15.0), 10), 0);
    }

    #[test]
    fn focus_follows_viewport_midpoint() {
        // midpoint = 130 + 150 + 10 = 290 -> page 2
        assert_eq!(focus_page(&viewport().with_scroll(-130.0), 10), 2);
        // midpoint = 10 + 150 + 10 = 170 -> page 1, although page 0 is
        // still partially visible at the top
        assert_eq!(focus_page(&viewport().with_scroll(-10.0), 10), 1);
    }

    #[test]
    fn focus_clamps_to_last_page() {
        assert_eq!(focus_page(&viewport().with_scroll(-1.0e6), 10), 9);
        assert_eq!(focus_page(&viewport().with_scroll(-50.0), 0), 0);
    }

    #[test]
    fn window_scenarios() {
        assert_eq!(cache_window(0, 50, 5), CacheWindow::new(0, 5));
        assert_eq!(cache_window(49, 50, 5), CacheWindow::new(45, 50));
        assert_eq!(cache_window(25, 50, 5), CacheWindow::new(23, 28));
    }

    #[test]
    fn window_covers_short_documents() {
        assert_eq!(cache_window(1, 3, 5), CacheWindow::new(0, 3));
        assert_eq!(cache_window(0, 0, 5), CacheWindow::new(0, 0));
        assert!(cache_window(0, 0, 5).is_empty());
    }

    #[test]
    fn window_distance() {
        let window = CacheWindow::new(10, 15);
        assert_eq!(window.distance(9), 1);
        assert_eq!(window.distance(12), 0);
        assert_eq!(window.distance(15), 1);
        assert_eq!(window.distance(20), 6);
    }

    #[test]
    fn visible_range_tracks_scroll() {
        let vp = viewport();
        assert_eq!(vp.visible_range(10), 0..3);
        // page 0 ends at -10, page 1 starts at 10
        assert_eq!(vp.with_scroll(-110.0).visible_range(10), 1..4);
        assert_eq!(vp.with_scroll(-1080.0).visible_range(10), 9..10);
        assert_eq!(vp.visible_range(0), 0..0);
    }

    #[test]
    fn geometry() {
        let vp = viewport().with_scroll(-50.0);
        assert_eq!(vp.page_pitch(), 120.0);
        assert_eq!(vp.page_top(2), 190.0);
        assert_eq!(vp.document_height(3), 340.0);
        assert_eq!(vp.min_scroll(3), -40.0);
        assert_eq!(vp.min_scroll(1), 0.0);
        assert_eq!(vp.scroll_for_page(4), -480.0);
    }

    #[test]
    fn rescale_keeps_relative_position() {
        let mut vp = viewport().with_scroll(-240.0);
        vp.rescale_pages(220.0);
        assert_eq!(vp.scroll_offset, -480.0);
        assert_eq!(vp.page_top(2), 0.0);
    }

    #[test]
    fn fit_width() {
        assert_eq!(fit_width_scale(800.0, 400.0), 2.0);
        assert_eq!(fit_width_scale(800.0, 0.0), 1.0);
    }

    proptest! {
        #[test]
        fn window_has_budget_width_and_contains_focus(
            page_count in 5usize..500,
            focus_seed in any::<usize>(),
            half in 0usize..2,
        ) {
            let budget = 2 * half + 3;
            prop_assume!(page_count >= budget);
            let focus = focus_seed % page_count;
            let window = cache_window(focus, page_count, budget);
            prop_assert_eq!(window.len(), budget);
            prop_assert!(window.contains(focus));
            prop_assert!(window.stop <= page_count);
        }

        #[test]
        fn focus_is_always_a_valid_page(
            page_count in 1usize..200,
            scroll in -1.0e5f32..1.0e3,
        ) {
            let vp = viewport().with_scroll(scroll);
            prop_assert!(focus_page(&vp, page_count) < page_count);
            let model = ViewportModel::compute(&vp, page_count, 5);
            prop_assert!(model.window.contains(model.focus_page));
        }
    }
}
