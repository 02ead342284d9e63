//! Scriptable in-memory renderer and helpers for driving the scheduler in tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};

use crate::render::{DocumentRenderer, PageRenderer, Pixmap, RenderFault};
use crate::worker::WorkerEvent;

/// How long helpers wait for a worker before declaring the test hung
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Script {
    /// Remaining scripted failures per page; `u32::MAX` fails forever
    failing: HashMap<usize, u32>,
    panicking: HashSet<usize>,
    gates: HashMap<usize, Receiver<()>>,
    failing_clones: usize,
    clone_gate: Option<Receiver<()>>,
    handle_drop_gate: Option<Receiver<()>>,
}

struct Shared {
    page_count: usize,
    native_size: (f32, f32),
    script: Mutex<Script>,
    clones: AtomicUsize,
    layouts: AtomicUsize,
    layouts_dropped: AtomicUsize,
    layouts_active: AtomicUsize,
    max_layouts_active: AtomicUsize,
    rasters_active: AtomicUsize,
    max_rasters_active: AtomicUsize,
}

impl Shared {
    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Document of `page_count` identical pages.
///
/// Clones share the same script and counters, so a test keeps one clone to
/// steer and inspect the copy that was handed to the scheduler.
#[derive(Clone)]
pub struct SyntheticDocument {
    shared: Arc<Shared>,
}

impl SyntheticDocument {
    #[must_use]
    pub fn new(page_count: usize) -> Self {
        Self::with_native_size(page_count, (100.0, 140.0))
    }

    #[must_use]
    pub fn with_native_size(page_count: usize, native_size: (f32, f32)) -> Self {
        Self {
            shared: Arc::new(Shared {
                page_count,
                native_size,
                script: Mutex::new(Script::default()),
                clones: AtomicUsize::new(0),
                layouts: AtomicUsize::new(0),
                layouts_dropped: AtomicUsize::new(0),
                layouts_active: AtomicUsize::new(0),
                max_layouts_active: AtomicUsize::new(0),
                rasters_active: AtomicUsize::new(0),
                max_rasters_active: AtomicUsize::new(0),
            }),
        }
    }

    /// Every render of `page` fails with a decode error
    pub fn fail_page(&self, page: usize) {
        self.shared.script().failing.insert(page, u32::MAX);
    }

    /// The next `times` renders of `page` fail
    pub fn fail_page_times(&self, page: usize, times: u32) {
        self.shared.script().failing.insert(page, times);
    }

    /// Rasterizing `page` panics
    pub fn panic_on_page(&self, page: usize) {
        self.shared.script().panicking.insert(page);
    }

    /// The next `count` handle clones fail
    pub fn fail_next_clones(&self, count: usize) {
        self.shared.script().failing_clones = count;
    }

    /// Hold the next rasterization of `page` until the returned gate is
    /// opened or dropped.
    #[must_use]
    pub fn gate(&self, page: usize) -> Gate {
        let (tx, rx) = flume::bounded(1);
        self.shared.script().gates.insert(page, rx);
        Gate { release: Some(tx) }
    }

    /// Hold the next handle clone, scripted failure included, until the
    /// gate is released
    #[must_use]
    pub fn hold_next_clone(&self) -> Gate {
        let (tx, rx) = flume::bounded(1);
        self.shared.script().clone_gate = Some(rx);
        Gate { release: Some(tx) }
    }

    /// Hold the next handle teardown until the gate is released
    #[must_use]
    pub fn hold_next_handle_drop(&self) -> Gate {
        let (tx, rx) = flume::bounded(1);
        self.shared.script().handle_drop_gate = Some(rx);
        Gate { release: Some(tx) }
    }

    #[must_use]
    pub fn clone_count(&self) -> usize {
        self.shared.clones.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn layout_count(&self) -> usize {
        self.shared.layouts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn layouts_dropped(&self) -> usize {
        self.shared.layouts_dropped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn max_concurrent_layouts(&self) -> usize {
        self.shared.max_layouts_active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn max_concurrent_rasters(&self) -> usize {
        self.shared.max_rasters_active.load(Ordering::SeqCst)
    }
}

/// Holds one gated rasterization
pub struct Gate {
    release: Option<Sender<()>>,
}

impl Gate {
    pub fn open(mut self) {
        if let Some(tx) = self.release.take() {
            let _ = tx.send(());
        }
    }
}

impl DocumentRenderer for SyntheticDocument {
    type Handle = SyntheticHandle;

    fn page_count(&self) -> usize {
        self.shared.page_count
    }

    fn page_size_hint(&self) -> (f32, f32) {
        self.shared.native_size
    }

    fn clone_handle(&self) -> Result<SyntheticHandle, RenderFault> {
        let gate = self.shared.script().clone_gate.take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        {
            let mut script = self.shared.script();
            if script.failing_clones > 0 {
                script.failing_clones -= 1;
                return Err(RenderFault::generic("scripted clone failure"));
            }
        }
        self.shared.clones.fetch_add(1, Ordering::SeqCst);
        Ok(SyntheticHandle {
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct SyntheticHandle {
    shared: Arc<Shared>,
}

impl Drop for SyntheticHandle {
    fn drop(&mut self) {
        let gate = self.shared.script().handle_drop_gate.take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
    }
}

/// Layout of a synthetic page
pub struct SyntheticLayout {
    page: usize,
    shared: Arc<Shared>,
}

impl Drop for SyntheticLayout {
    fn drop(&mut self) {
        self.shared.layouts_dropped.fetch_add(1, Ordering::SeqCst);
    }
}

struct ActiveCounter<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ActiveCounter<'a> {
    fn enter(active: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveCounter<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PageRenderer for SyntheticHandle {
    type Layout = SyntheticLayout;

    fn layout(&self, page: usize) -> Result<SyntheticLayout, RenderFault> {
        let shared = &self.shared;
        let _active = ActiveCounter::enter(&shared.layouts_active, &shared.max_layouts_active);
        shared.layouts.fetch_add(1, Ordering::SeqCst);

        if page >= shared.page_count {
            return Err(RenderFault::decode(page, "no such page"));
        }
        let mut script = shared.script();
        if let Some(remaining) = script.failing.get_mut(&page) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(RenderFault::decode(page, "scripted decode failure"));
            }
        }
        Ok(SyntheticLayout {
            page,
            shared: Arc::clone(shared),
        })
    }

    fn native_size(&self, _layout: &SyntheticLayout) -> (f32, f32) {
        self.shared.native_size
    }

    fn rasterize(&self, layout: &SyntheticLayout, scale: f32) -> Result<Pixmap, RenderFault> {
        let shared = &self.shared;
        let _active = ActiveCounter::enter(&shared.rasters_active, &shared.max_rasters_active);

        let (gate, panics) = {
            let mut script = shared.script();
            (
                script.gates.remove(&layout.page),
                script.panicking.contains(&layout.page),
            )
        };
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        if panics {
            panic!("scripted panic on page {}", layout.page);
        }

        let width = ((shared.native_size.0 * scale).round() as u32).max(1);
        let height = ((shared.native_size.1 * scale).round() as u32).max(1);
        let shade = (layout.page % 256) as u8;
        Pixmap::from_rgb(
            width,
            height,
            vec![shade; width as usize * height as usize * Pixmap::CHANNELS],
        )
    }
}

/// Poll `condition` until it holds, panicking after [`EVENT_TIMEOUT`]
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Block until the next worker event, panicking if none arrives in time
#[must_use]
pub fn next_event(events: &Receiver<WorkerEvent>) -> WorkerEvent {
    events
        .recv_timeout(EVENT_TIMEOUT)
        .expect("timed out waiting for a render worker")
}
