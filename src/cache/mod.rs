//! Render cache: page table, viewport model and the scheduler tying them
//! to the worker pool

mod catalog;
mod scheduler;
mod viewport;

pub use catalog::{CatalogError, Page, PageCatalog, PageState};
pub use scheduler::{
    CacheConfig, CacheScheduler, CacheTick, CompletionOutcome, PageView, SchedulerError,
    SchedulerStats,
};
pub use viewport::{
    CacheWindow, ViewportModel, ViewportState, cache_window, fit_width_scale, focus_page,
};

/// Default number of render workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of pages kept rendered around the focus page
pub const DEFAULT_CACHE_PAGES: usize = 5;

/// Default number of consecutive failures before a page is given up on
pub const DEFAULT_MAX_RENDER_ATTEMPTS: u32 = 3;

/// Default eviction throttle factor
pub const DEFAULT_EVICTIONS_PER_IDLE_WORKER: usize = 1;

/// Default gap between pages, in viewport units
pub const DEFAULT_PAGE_MARGIN: f32 = 20.0;
