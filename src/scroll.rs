//! Scroll and autoscroll state driving [`ViewportState::scroll_offset`]
//!
//! Offsets follow the viewport convention: zero at the top of the document,
//! more negative further down. Every change is clamped so the last page
//! never scrolls past the bottom of the viewport.

use crate::cache::ViewportState;

/// Distance of one line scroll in viewport units
pub const DEFAULT_SCROLL_STEP: f32 = 42.0;
/// Initial autoscroll distance per tick
pub const DEFAULT_AUTOSCROLL_SPEED: f32 = 1.0;

/// User intents understood by the scroll controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollAction {
    /// One line down; speeds up autoscroll while it is running
    LineDown,
    /// One line up; slows down autoscroll while it is running
    LineUp,
    PageDown,
    PageUp,
    Top,
    Bottom,
    ToggleAutoscroll,
}

#[derive(Debug, Clone)]
pub struct ScrollController {
    line_step: f32,
    autoscroll: bool,
    speed: f32,
}

impl Default for ScrollController {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLL_STEP, DEFAULT_AUTOSCROLL_SPEED)
    }
}

impl ScrollController {
    /// Autoscroll speed change per line action
    pub const SPEED_STEP: f32 = 1.0;

    #[must_use]
    pub fn new(line_step: f32, speed: f32) -> Self {
        Self {
            line_step: sanitize(line_step, DEFAULT_SCROLL_STEP),
            autoscroll: false,
            speed: sanitize(speed, DEFAULT_AUTOSCROLL_SPEED),
        }
    }

    #[must_use]
    pub fn is_autoscrolling(&self) -> bool {
        self.autoscroll
    }

    /// Autoscroll distance per tick; negative values scroll upwards
    #[must_use]
    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Apply one action. Returns true when the viewport needs a redraw.
    pub fn apply(
        &mut self,
        action: ScrollAction,
        viewport: &mut ViewportState,
        page_count: usize,
    ) -> bool {
        let before = viewport.scroll_offset;
        match action {
            ScrollAction::LineDown if self.autoscroll => {
                self.speed += Self::SPEED_STEP;
                return true;
            }
            ScrollAction::LineUp if self.autoscroll => {
                self.speed -= Self::SPEED_STEP;
                return true;
            }
            ScrollAction::ToggleAutoscroll => {
                self.autoscroll = !self.autoscroll;
                return true;
            }
            ScrollAction::LineDown => viewport.scroll_offset -= self.line_step,
            ScrollAction::LineUp => viewport.scroll_offset += self.line_step,
            ScrollAction::PageDown => viewport.scroll_offset -= viewport.page_pitch(),
            ScrollAction::PageUp => viewport.scroll_offset += viewport.page_pitch(),
            ScrollAction::Top => viewport.scroll_offset = 0.0,
            ScrollAction::Bottom => viewport.scroll_offset = viewport.min_scroll(page_count),
        }
        clamp_scroll(viewport, page_count);
        viewport.scroll_offset != before
    }

    /// Advance autoscroll by one frame. Returns true when the offset moved.
    pub fn tick(&mut self, viewport: &mut ViewportState, page_count: usize) -> bool {
        if !self.autoscroll || self.speed == 0.0 {
            return false;
        }
        let before = viewport.scroll_offset;
        viewport.scroll_offset -= self.speed;
        clamp_scroll(viewport, page_count);
        viewport.scroll_offset != before
    }

    /// True once autoscroll can make no further progress downwards
    #[must_use]
    pub fn at_bottom(viewport: &ViewportState, page_count: usize) -> bool {
        viewport.scroll_offset <= viewport.min_scroll(page_count)
    }
}

/// Keep the offset within `[min_scroll, 0]`
pub fn clamp_scroll(viewport: &mut ViewportState, page_count: usize) {
    let offset = viewport.scroll_offset;
    viewport.scroll_offset = if offset.is_finite() {
        offset.clamp(viewport.min_scroll(page_count), 0.0)
    } else {
        0.0
    };
}

fn sanitize(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pitch 120, 10 pages: document 1180 high, min scroll -880
    fn viewport() -> ViewportState {
        ViewportState::new((80.0, 300.0), 100.0, 20.0)
    }

    #[test]
    fn line_and_page_steps() {
        let mut scroll = ScrollController::default();
        let mut vp = viewport();

        assert!(scroll.apply(ScrollAction::LineDown, &mut vp, 10));
        assert_eq!(vp.scroll_offset, -42.0);
        assert!(scroll.apply(ScrollAction::PageDown, &mut vp, 10));
        assert_eq!(vp.scroll_offset, -162.0);
        assert!(scroll.apply(ScrollAction::PageUp, &mut vp, 10));
        assert!(scroll.apply(ScrollAction::LineUp, &mut vp, 10));
        assert_eq!(vp.scroll_offset, 0.0);
    }

    #[test]
    fn offsets_are_clamped_to_document() {
        let mut scroll = ScrollController::default();
        let mut vp = viewport();

        assert!(!scroll.apply(ScrollAction::LineUp, &mut vp, 10));
        assert_eq!(vp.scroll_offset, 0.0);

        assert!(scroll.apply(ScrollAction::Bottom, &mut vp, 10));
        assert_eq!(vp.scroll_offset, -880.0);
        assert!(!scroll.apply(ScrollAction::PageDown, &mut vp, 10));
        assert!(ScrollController::at_bottom(&vp, 10));

        assert!(scroll.apply(ScrollAction::Top, &mut vp, 10));
        assert_eq!(vp.scroll_offset, 0.0);
    }

    #[test]
    fn short_document_does_not_scroll() {
        let mut scroll = ScrollController::default();
        let mut vp = viewport();
        assert!(!scroll.apply(ScrollAction::PageDown, &mut vp, 2));
        assert_eq!(vp.scroll_offset, 0.0);
    }

    #[test]
    fn line_actions_adjust_autoscroll_speed() {
        let mut scroll = ScrollController::default();
        let mut vp = viewport();

        assert!(!scroll.tick(&mut vp, 10));
        scroll.apply(ScrollAction::ToggleAutoscroll, &mut vp, 10);
        assert!(scroll.is_autoscrolling());

        scroll.apply(ScrollAction::LineDown, &mut vp, 10);
        scroll.apply(ScrollAction::LineDown, &mut vp, 10);
        assert_eq!(scroll.speed(), 3.0);
        assert_eq!(vp.scroll_offset, 0.0);

        assert!(scroll.tick(&mut vp, 10));
        assert_eq!(vp.scroll_offset, -3.0);

        scroll.apply(ScrollAction::LineUp, &mut vp, 10);
        scroll.apply(ScrollAction::LineUp, &mut vp, 10);
        scroll.apply(ScrollAction::LineUp, &mut vp, 10);
        assert!(!scroll.tick(&mut vp, 10));
    }

    #[test]
    fn autoscroll_stops_at_bottom() {
        let mut scroll = ScrollController::new(42.0, 500.0);
        let mut vp = viewport();
        scroll.apply(ScrollAction::ToggleAutoscroll, &mut vp, 10);

        assert!(scroll.tick(&mut vp, 10));
        assert!(scroll.tick(&mut vp, 10));
        assert_eq!(vp.scroll_offset, -880.0);
        assert!(!scroll.tick(&mut vp, 10));
    }

    #[test]
    fn non_finite_offsets_reset_to_top() {
        let mut vp = viewport().with_scroll(f32::NAN);
        clamp_scroll(&mut vp, 10);
        assert_eq!(vp.scroll_offset, 0.0);
    }
}
