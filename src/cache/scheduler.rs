//! Cache window maintenance: eviction, dispatch and completion handling

use std::sync::Arc;

use flume::Receiver;
use log::{debug, error, info, warn};

use super::catalog::{PageCatalog, PageState};
use super::viewport::{CacheWindow, ViewportModel, ViewportState, cache_window};
use super::{
    DEFAULT_CACHE_PAGES, DEFAULT_EVICTIONS_PER_IDLE_WORKER, DEFAULT_MAX_RENDER_ATTEMPTS,
    DEFAULT_WORKERS,
};
use crate::render::{DocumentRenderer, GuardStats, PageBitmap, RenderBackendGuard, RenderFault};
use crate::worker::{Completion, PoolError, RenderJob, WorkerEvent, WorkerId, WorkerPool};

/// Tunables of the render cache
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    /// Number of render workers, fixed for the scheduler's lifetime
    pub workers: usize,
    /// Pages kept ready around the focus page
    pub cache_pages: usize,
    /// Consecutive failures before a page is given up on
    pub max_render_attempts: u32,
    /// Eviction throttle: pages evicted per tick for every idle worker
    pub evictions_per_idle_worker: usize,
    /// Initial render scale
    pub scale: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            cache_pages: DEFAULT_CACHE_PAGES,
            max_render_attempts: DEFAULT_MAX_RENDER_ATTEMPTS,
            evictions_per_idle_worker: DEFAULT_EVICTIONS_PER_IDLE_WORKER,
            scale: 1.0,
        }
    }
}

impl CacheConfig {
    /// Cache budget, rounded up to an odd number so the window can be
    /// centred on the focus page
    #[must_use]
    pub fn budget(&self) -> usize {
        let pages = self.cache_pages.max(1);
        if pages % 2 == 0 { pages + 1 } else { pages }
    }
}

/// Errors that prevent a scheduler from starting
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Renderer(#[from] RenderFault),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// What the display should draw for a page
#[derive(Clone, Debug, PartialEq)]
pub enum PageView {
    Ready(Arc<PageBitmap>),
    /// A worker is producing the bitmap
    Pending,
    Missing,
    /// Rendering failed repeatedly; draw a placeholder
    Failed,
}

/// Result of handling one worker event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The page became ready
    Applied(usize),
    /// The job belonged to an older generation; nothing changed
    Discarded(usize),
    /// The render failed and the page is back to `Empty`, or `Failed` when
    /// `permanent`
    Failed { page: usize, permanent: bool },
    WorkerLost(WorkerId),
    /// Completion for a page no longer rendering; nothing changed
    Ignored(usize),
}

/// Decisions taken in one [`CacheScheduler::update_cache`] call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheTick {
    pub evicted: usize,
    pub scheduled: usize,
}

/// Running totals for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub jobs_issued: u64,
    pub applied: u64,
    pub discarded_stale: u64,
    pub failed: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub workers_lost: u64,
}

/// Keeps a bounded window of rasterized pages around the focus page.
///
/// Single-threaded: every catalog, pool and generation change happens in the
/// caller's control loop. Workers only talk back through
/// [`completions`](Self::completions).
pub struct CacheScheduler<B: DocumentRenderer> {
    guard: Arc<RenderBackendGuard<B>>,
    pool: WorkerPool,
    catalog: PageCatalog,
    config: CacheConfig,
    scale: f32,
    generation: u64,
    focus_page: usize,
    window: CacheWindow,
    stats: SchedulerStats,
}

impl<B: DocumentRenderer> CacheScheduler<B> {
    /// Take ownership of an opened document and start the worker pool
    pub fn open(base: B, config: CacheConfig) -> Result<Self, SchedulerError> {
        let page_count = base.page_count();
        let guard = Arc::new(RenderBackendGuard::new(base));
        let pool = WorkerPool::spawn(config.workers, &guard)?;
        let scale = config.scale;

        info!(
            "Render cache: {page_count} pages, {} workers, budget {}",
            pool.size(),
            config.budget()
        );

        Ok(Self {
            guard,
            pool,
            catalog: PageCatalog::new(page_count, scale),
            window: cache_window(0, page_count, config.budget()),
            config,
            scale,
            generation: 1,
            focus_page: 0,
            stats: SchedulerStats::default(),
        })
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.catalog.count()
    }

    #[must_use]
    pub fn catalog(&self) -> &PageCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    #[must_use]
    pub fn focus_page(&self) -> usize {
        self.focus_page
    }

    #[must_use]
    pub fn window(&self) -> CacheWindow {
        self.window
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    #[must_use]
    pub fn guard_stats(&self) -> GuardStats {
        self.guard.stats()
    }

    /// Worker notifications; feed each one to
    /// [`on_render_complete`](Self::on_render_complete)
    #[must_use]
    pub fn completions(&self) -> &Receiver<WorkerEvent> {
        self.pool.events()
    }

    #[must_use]
    pub fn page_view(&self, page: usize) -> PageView {
        match self.catalog.get(page) {
            None => PageView::Missing,
            Some(entry) => match entry.state() {
                PageState::Ready => entry
                    .bitmap()
                    .map_or(PageView::Missing, |bitmap| PageView::Ready(Arc::clone(bitmap))),
                PageState::Rendering => PageView::Pending,
                PageState::Empty => PageView::Missing,
                PageState::Failed => PageView::Failed,
            },
        }
    }

    /// One scheduler tick: recompute the window, evict what fell out of it
    /// and hand missing pages to idle workers.
    pub fn update_cache(&mut self, viewport: &ViewportState) -> CacheTick {
        let model = ViewportModel::compute(viewport, self.catalog.count(), self.config.budget());
        if model.window != self.window {
            debug!(
                "Focus page {}, cache window {}..{}",
                model.focus_page, model.window.start, model.window.stop
            );
        }
        self.focus_page = model.focus_page;
        self.window = model.window;

        let evicted = self.evict_outside_window();
        let scheduled = self.schedule_window();
        CacheTick { evicted, scheduled }
    }

    /// Evict ready pages outside the window, furthest first, no faster than
    /// idle workers could refill the window.
    fn evict_outside_window(&mut self) -> usize {
        let budget = self
            .pool
            .idle_count()
            .saturating_mul(self.config.evictions_per_idle_worker);
        let window = self.window;
        let mut below = 0;
        let mut above = self.catalog.count();
        let mut evicted = 0;

        while evicted < budget && (below < window.start || above > window.stop) {
            let page = if below < window.start
                && window.distance(below) >= window.distance(above.saturating_sub(1))
            {
                below += 1;
                below - 1
            } else {
                above -= 1;
                above
            };
            if window.contains(page) || self.catalog.state(page) != Some(PageState::Ready) {
                continue;
            }

            match self.catalog.evict(page) {
                Ok(_) => {
                    evicted += 1;
                    self.stats.evictions += 1;
                }
                Err(e) => error!("Eviction of page {page} refused: {e}"),
            }
        }
        evicted
    }

    /// Assign empty pages of the window to idle workers, in page order
    fn schedule_window(&mut self) -> usize {
        let mut scheduled = 0;

        for page in self.window.range() {
            if self.catalog.state(page) != Some(PageState::Empty) {
                continue;
            }
            let job = RenderJob {
                page_index: page,
                target_scale: self.scale,
                generation: self.generation,
            };

            loop {
                let Some(worker) = self.pool.next_idle() else {
                    return scheduled;
                };
                match self.pool.assign(worker, job) {
                    Ok(()) => break,
                    Err(e @ PoolError::Disconnected(_)) => {
                        warn!("Could not dispatch page {page}: {e}");
                    }
                    Err(e) => {
                        error!("Could not dispatch page {page}: {e}");
                        return scheduled;
                    }
                }
            }

            if let Err(e) = self.catalog.set_rendering(page) {
                error!("Dispatched page {page} but could not mark it rendering: {e}");
            }
            scheduled += 1;
            self.stats.jobs_issued += 1;
        }
        scheduled
    }

    /// Apply one worker notification. Stale results are dropped without
    /// touching the catalog; the worker always returns to the idle list.
    pub fn on_render_complete(&mut self, event: WorkerEvent) -> CompletionOutcome {
        match event {
            WorkerEvent::Completed(completion) => self.apply_completion(completion),
            WorkerEvent::Lost {
                worker,
                job,
                reason,
            } => self.retire_worker(worker, job, &reason),
        }
    }

    fn apply_completion(&mut self, completion: Completion) -> CompletionOutcome {
        let Completion {
            worker,
            job,
            result,
        } = completion;
        let page = job.page_index;
        self.pool.release(worker);

        if job.generation != self.generation {
            debug!(
                "Discarding page {page} from generation {} (current {})",
                job.generation, self.generation
            );
            self.stats.discarded_stale += 1;
            return CompletionOutcome::Discarded(page);
        }

        match result {
            Ok(rendered) => {
                let bitmap = Arc::new(PageBitmap::from_pixmap(
                    page,
                    job.target_scale,
                    rendered.pixmap,
                ));
                if self.catalog.set_ready(page, bitmap, rendered.native_size) {
                    self.stats.applied += 1;
                    CompletionOutcome::Applied(page)
                } else {
                    CompletionOutcome::Ignored(page)
                }
            }
            Err(fault) => self.fail_page(page, &fault.to_string()),
        }
    }

    fn fail_page(&mut self, page: usize, reason: &str) -> CompletionOutcome {
        self.stats.failed += 1;
        match self
            .catalog
            .record_failure(page, self.config.max_render_attempts)
        {
            Some(PageState::Failed) => {
                warn!("Page {page} failed to render, giving up: {reason}");
                CompletionOutcome::Failed {
                    page,
                    permanent: true,
                }
            }
            Some(PageState::Empty) => {
                warn!("Page {page} failed to render, will retry: {reason}");
                CompletionOutcome::Failed {
                    page,
                    permanent: false,
                }
            }
            _ => CompletionOutcome::Ignored(page),
        }
    }

    fn retire_worker(
        &mut self,
        worker: WorkerId,
        job: Option<RenderJob>,
        reason: &str,
    ) -> CompletionOutcome {
        let in_flight = self.pool.mark_lost(worker);
        self.stats.workers_lost += 1;
        let remaining = self.pool.size() - self.pool.lost_count();
        error!("Render worker {worker} lost ({reason}); {remaining} workers left");
        if remaining == 0 {
            error!("No render workers left, pages can no longer be rendered");
        }

        match (job, in_flight) {
            // The worker died rendering this page
            (Some(job), _) if job.generation == self.generation => {
                self.fail_page(job.page_index, reason);
            }
            // Dispatched to a worker that never started
            (None, Some(job)) if job.generation == self.generation => {
                if self.catalog.reset_stale(job.page_index) {
                    warn!(
                        "Page {} was queued on lost worker {worker}, will reschedule",
                        job.page_index
                    );
                }
            }
            _ => {}
        }
        CompletionOutcome::WorkerLost(worker)
    }

    /// Apply every notification already waiting, without blocking.
    /// Returns how many pages became ready.
    pub fn poll_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.pool.events().try_recv() {
            if matches!(self.on_render_complete(event), CompletionOutcome::Applied(_)) {
                applied += 1;
            }
        }
        applied
    }

    /// Switch to `new_scale`, dropping every cached bitmap. A no-op when the
    /// scale is unchanged.
    pub fn invalidate(&mut self, new_scale: f32) {
        if (new_scale - self.scale).abs() <= f32::EPSILON {
            return;
        }
        self.scale = new_scale;
        self.refresh();
    }

    /// Drop every cached bitmap and supersede in-flight jobs at the current
    /// scale. In-flight workers keep running; their results are discarded
    /// when they arrive.
    pub fn refresh(&mut self) {
        self.generation += 1;
        self.stats.invalidations += 1;

        let mut evicted = 0;
        let mut superseded = 0;
        for page in 0..self.catalog.count() {
            match self.catalog.state(page) {
                Some(PageState::Ready) => {
                    if self.catalog.evict(page).is_ok() {
                        evicted += 1;
                    }
                }
                Some(PageState::Rendering) => {
                    if self.catalog.reset_stale(page) {
                        superseded += 1;
                    }
                }
                _ => {}
            }
        }
        self.catalog.clear_failures();
        self.catalog.rescale(self.scale);
        self.stats.evictions += evicted as u64;

        info!(
            "Invalidated cache at scale {:.3}: generation {}, {evicted} evicted, {superseded} in flight superseded",
            self.scale, self.generation
        );
    }

    /// Stop every worker after its current job and wait for them
    pub fn shutdown(&mut self) {
        self.pool.shutdown();
        let guard = self.guard.stats();
        info!(
            "Render cache stopped: {:?}; backend lock taken {} times, held {:?}",
            self.stats, guard.acquisitions, guard.held
        );
    }
}
