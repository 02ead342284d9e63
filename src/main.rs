use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use flume::RecvTimeoutError;
use log::{debug, error, info, warn};
use simplelog::{Config, WriteLogger};

use least::cache::{CacheScheduler, CompletionOutcome, PageView, ViewportState, fit_width_scale};
use least::export;
use least::panic_handler::initialize_panic_handler;
use least::render::{DocumentRenderer, MupdfDocument};
use least::scroll::{ScrollAction, ScrollController};
use least::settings::{self, Settings};

/// One display frame at 60 Hz
const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(name = "least")]
#[command(about = "Scroll through a PDF with a bounded cache of pre-rendered pages")]
#[command(version)]
struct Cli {
    /// PDF file to open
    file: PathBuf,

    /// Settings file (defaults to the user config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of render workers
    #[arg(long, short = 'j')]
    workers: Option<usize>,

    /// Pages kept rendered around the focused page
    #[arg(long)]
    cache_pages: Option<usize>,

    /// Viewport width; pages are scaled to fit it
    #[arg(long, default_value_t = 800.0)]
    width: f32,

    /// Viewport height
    #[arg(long, default_value_t = 600.0)]
    height: f32,

    /// Autoscroll distance per frame
    #[arg(long)]
    speed: Option<f32>,

    /// Render every page into DIR as page-NNNN.png and exit
    #[arg(long, value_name = "DIR")]
    dump: Option<PathBuf>,

    #[arg(long, default_value = "least.log")]
    log_file: PathBuf,

    /// off, error, warn, info, debug or trace
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply_to(&self, settings: &mut Settings) {
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(cache_pages) = self.cache_pages {
            settings.cache_pages = cache_pages;
        }
        if let Some(speed) = self.speed {
            settings.autoscroll_speed = speed;
        }
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_panic_handler();

    let mut settings = settings::load_settings(cli.config.as_deref());
    cli.apply_to(&mut settings);

    WriteLogger::init(
        settings.level_filter(),
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("Failed to create log file {:?}", cli.log_file))?,
    )?;
    info!("Starting least on {:?}", cli.file);

    let document = MupdfDocument::open(&cli.file)
        .with_context(|| format!("Failed to open {:?}", cli.file))?;
    let (native_width, native_height) = document.page_size_hint();
    let scale = fit_width_scale(cli.width, native_width);
    let viewport = ViewportState::new(
        (cli.width, cli.height),
        native_height * scale,
        settings.page_margin,
    );
    info!(
        "{} pages of {native_width}x{native_height}, render scale {scale:.3}",
        document.page_count()
    );

    let mut scheduler = CacheScheduler::open(document, settings.cache_config(scale))
        .context("Failed to start render workers")?;

    let result = match &cli.dump {
        Some(dir) => dump_document(&mut scheduler, viewport, dir),
        None => autoscroll(&mut scheduler, viewport, &settings),
    };

    scheduler.shutdown();
    if let Err(e) = &result {
        error!("Application error: {e:?}");
    }
    info!("Shutting down least");
    result
}

/// Scroll from top to bottom at the configured speed, keeping the cache
/// window warm, and report how often the focused page was not ready.
fn autoscroll<B: DocumentRenderer>(
    scheduler: &mut CacheScheduler<B>,
    mut viewport: ViewportState,
    settings: &Settings,
) -> Result<()> {
    if settings.autoscroll_speed <= 0.0 {
        bail!("Autoscroll speed must be positive");
    }
    let page_count = scheduler.page_count();
    let mut scroll = ScrollController::new(settings.scroll_step, settings.autoscroll_speed);
    scroll.apply(ScrollAction::ToggleAutoscroll, &mut viewport, page_count);

    let started = Instant::now();
    let mut frames = 0u64;
    let mut stalled = 0u64;
    let mut next_frame = Instant::now() + FRAME;

    loop {
        scheduler.update_cache(&viewport);

        let wait = next_frame.saturating_duration_since(Instant::now());
        match scheduler.completions().recv_timeout(wait) {
            Ok(event) => {
                scheduler.on_render_complete(event);
                scheduler.poll_completions();
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("All render workers have exited"),
        }

        next_frame += FRAME;
        frames += 1;
        if !matches!(scheduler.page_view(scheduler.focus_page()), PageView::Ready(_)) {
            stalled += 1;
        }
        if frames % 600 == 0 {
            debug!(
                "Frame {frames}: scroll {:.0}, focus page {}, {} ready",
                viewport.scroll_offset,
                scheduler.focus_page(),
                scheduler.catalog().count_in(least::PageState::Ready)
            );
        }

        let moved = scroll.tick(&mut viewport, page_count);
        if !moved && ScrollController::at_bottom(&viewport, page_count) {
            break;
        }
        if scheduler.pool().lost_count() == scheduler.pool().size() {
            bail!("All render workers have exited");
        }
    }

    let stats = scheduler.stats();
    info!(
        "Scrolled {page_count} pages in {:?}: {frames} frames, {stalled} without the focused page",
        started.elapsed()
    );
    println!(
        "{frames} frames, {stalled} stalled, {} renders, {} discarded, {} failed",
        stats.applied, stats.discarded_stale, stats.failed
    );
    Ok(())
}

/// Walk the focus through every page and write each one as it becomes ready
fn dump_document<B: DocumentRenderer>(
    scheduler: &mut CacheScheduler<B>,
    viewport: ViewportState,
    dir: &Path,
) -> Result<()> {
    let page_count = scheduler.page_count();
    let mut done = vec![false; page_count];
    let mut cursor = 0;
    let mut written = 0usize;
    let mut failed = 0usize;

    while cursor < page_count {
        // Centre the cursor page so it is the focus page at any page size
        let centred = viewport.scroll_for_page(cursor)
            + (viewport.viewport_height() - viewport.page_height) / 2.0;
        let at_cursor = viewport.with_scroll(centred);
        scheduler.update_cache(&at_cursor);

        if scheduler.pool().lost_count() == scheduler.pool().size() {
            bail!("All render workers have exited");
        }
        let event = match scheduler.completions().recv_timeout(Duration::from_secs(30)) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                warn!("No render finished within 30s, still waiting for page {cursor}");
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => bail!("All render workers have exited"),
        };

        match scheduler.on_render_complete(event) {
            CompletionOutcome::Applied(page) if !done[page] => {
                if let PageView::Ready(bitmap) = scheduler.page_view(page) {
                    let path = export::dump_page(&bitmap, dir)
                        .with_context(|| format!("Failed to dump page {page}"))?;
                    debug!("Dumped page {page} to {path:?}");
                    done[page] = true;
                    written += 1;
                }
            }
            CompletionOutcome::Failed {
                page,
                permanent: true,
            } => {
                warn!("Skipping page {page}, it could not be rendered");
                done[page] = true;
                failed += 1;
            }
            _ => {}
        }

        while cursor < page_count && done[cursor] {
            cursor += 1;
        }
    }

    info!("Dumped {written} pages to {dir:?}, {failed} failed");
    println!("{written} pages written to {}, {failed} failed", dir.display());
    Ok(())
}
