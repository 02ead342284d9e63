use std::sync::Arc;
use std::thread;
use std::time::Duration;

use least::cache::{CacheConfig, CacheScheduler, CompletionOutcome, PageState, ViewportState};
use least::panic_handler::initialize_panic_handler;
use least::render::RenderBackendGuard;
use least::test_utils::{SyntheticDocument, next_event, wait_until};
use least::worker::{RenderJob, WorkerEvent, WorkerId, WorkerPool};
use serial_test::serial;

fn job(page_index: usize) -> RenderJob {
    RenderJob {
        page_index,
        target_scale: 2.0,
        generation: 1,
    }
}

#[test]
#[serial]
fn test_rasterization_runs_in_parallel_outside_the_guard() {
    let doc = SyntheticDocument::new(8);
    let gates: Vec<_> = (0..3).map(|page| doc.gate(page)).collect();
    let guard = Arc::new(RenderBackendGuard::new(doc.clone()));
    let mut pool = WorkerPool::spawn(3, &guard).unwrap();

    for page in 0..3 {
        pool.assign(WorkerId(page), job(page)).unwrap();
    }
    // All three are parked inside rasterize; layout for each has finished
    wait_until("three concurrent rasterizations", || {
        doc.max_concurrent_rasters() == 3
    });
    assert_eq!(doc.layout_count(), 3);

    // The guard is free while they rasterize
    assert_eq!(guard.with_exclusive(|base| base.clone_count()), 3);

    for gate in gates {
        gate.open();
    }
    for _ in 0..3 {
        let WorkerEvent::Completed(completion) = next_event(pool.events()) else {
            panic!("worker lost");
        };
        let rendered = completion.result.unwrap();
        assert_eq!((rendered.pixmap.width, rendered.pixmap.height), (200, 280));
        pool.release(completion.worker);
    }

    assert_eq!(doc.max_concurrent_layouts(), 1);
    let stats = guard.stats();
    // One clone per worker plus a layout and a teardown per job
    assert!(stats.acquisitions >= 9, "{stats:?}");
    pool.shutdown();
}

#[test]
#[serial]
fn test_panicking_page_with_hook_installed() {
    initialize_panic_handler();

    let doc = SyntheticDocument::new(10);
    doc.panic_on_page(2);
    let config = CacheConfig {
        workers: 2,
        cache_pages: 5,
        ..CacheConfig::default()
    };
    let mut scheduler = CacheScheduler::open(doc.clone(), config).unwrap();
    let viewport = ViewportState::new((100.0, 140.0), 140.0, 20.0);

    let mut lost = 0;
    while scheduler.catalog().count_in(PageState::Ready) < 4
        || scheduler.catalog().state(2) != Some(PageState::Failed)
    {
        scheduler.update_cache(&viewport);
        let event = next_event(scheduler.completions());
        if let CompletionOutcome::WorkerLost(_) = scheduler.on_render_complete(event) {
            lost += 1;
            // Keep the surviving worker alive; the page now fails cleanly
            doc.fail_page(2);
        }
    }

    assert_eq!(lost, 1);
    assert_eq!(scheduler.pool().lost_count(), 1);
    assert_eq!(scheduler.stats().workers_lost, 1);
    assert_eq!(scheduler.catalog().state(2), Some(PageState::Failed));
    scheduler.shutdown();

    let _ = std::panic::take_hook();
}

#[test]
#[serial]
fn test_shutdown_waits_for_running_job() {
    let doc = SyntheticDocument::new(4);
    let gate = doc.gate(0);
    let guard = Arc::new(RenderBackendGuard::new(doc.clone()));
    let mut pool = WorkerPool::spawn(1, &guard).unwrap();
    pool.assign(WorkerId(0), job(0)).unwrap();
    wait_until("the job to start rasterizing", || doc.max_concurrent_rasters() == 1);

    let opener = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        gate.open();
    });
    pool.shutdown();
    opener.join().unwrap();

    // The finished job was still reported before the worker exited
    assert!(matches!(
        pool.events().try_recv(),
        Ok(WorkerEvent::Completed(_))
    ));
    assert!(pool.events().try_recv().is_err());
}
