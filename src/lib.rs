pub mod cache;
pub mod export;
pub mod panic_handler;
pub mod render;
pub mod scroll;
pub mod settings;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::{
    CacheConfig, CacheScheduler, CacheTick, CacheWindow, CompletionOutcome, PageCatalog,
    PageState, PageView, SchedulerError, SchedulerStats, ViewportModel, ViewportState,
};
pub use render::{DocumentRenderer, PageBitmap, PageRenderer, Pixmap, RenderBackendGuard, RenderFault};
pub use scroll::{ScrollAction, ScrollController};
pub use settings::Settings;
pub use worker::{RenderJob, WorkerEvent, WorkerId, WorkerPool};
