//! Fixed pool of render threads, one job per worker at a time

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use log::{debug, error, warn};

use super::message::{Completion, RenderJob, RenderedPage, WorkerCommand, WorkerEvent, WorkerId};
use crate::panic_handler::panic_message;
use crate::render::{DocumentRenderer, PageRenderer, RenderBackendGuard, RenderFault};

/// Availability of a worker slot, as seen from the control loop
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WorkerStatus {
    Idle,
    Busy(RenderJob),
    /// The worker exited unexpectedly; the slot is never reused
    Lost,
}

/// Errors from pool bookkeeping
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker {0} is not idle")]
    NotIdle(WorkerId),

    #[error("no worker {0} in pool")]
    UnknownWorker(WorkerId),

    #[error("worker {0} has exited")]
    Disconnected(WorkerId),

    #[error("failed to spawn render thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct WorkerSlot {
    status: WorkerStatus,
    commands: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

/// Owns the render threads and their Idle/Busy bookkeeping.
///
/// Only the control loop touches the pool. Workers report back exclusively
/// through the event channel returned by [`events`](Self::events).
pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
    idle: VecDeque<WorkerId>,
    events: Receiver<WorkerEvent>,
}

impl WorkerPool {
    /// Start `n` workers. Each clones its private renderer handle from the
    /// guarded base before waiting for its first job.
    pub fn spawn<B: DocumentRenderer>(
        n: usize,
        guard: &Arc<RenderBackendGuard<B>>,
    ) -> Result<Self, PoolError> {
        let (event_tx, event_rx) = flume::unbounded();
        let mut slots = Vec::with_capacity(n.max(1));

        for index in 0..n.max(1) {
            let id = WorkerId(index);
            // Capacity 1: a worker never has more than one job queued or running
            let (command_tx, command_rx) = flume::bounded(1);
            let guard = Arc::clone(guard);
            let events = event_tx.clone();

            let thread = thread::Builder::new()
                .name(format!("least-render-{index}"))
                .spawn(move || worker_main(id, &guard, &command_rx, &events))?;

            slots.push(WorkerSlot {
                status: WorkerStatus::Idle,
                commands: command_tx,
                thread: Some(thread),
            });
        }

        debug!("Spawned {} render workers", slots.len());
        let idle = (0..slots.len()).map(WorkerId).collect();
        Ok(Self {
            slots,
            idle,
            events: event_rx,
        })
    }

    /// Completion channel, drained only by the control loop
    #[must_use]
    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn status(&self, worker: WorkerId) -> Option<WorkerStatus> {
        self.slots.get(worker.0).map(|slot| slot.status)
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.status, WorkerStatus::Busy(_)))
            .count()
    }

    #[must_use]
    pub fn lost_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.status == WorkerStatus::Lost)
            .count()
    }

    /// Next worker on the idle free list, without taking it
    #[must_use]
    pub fn next_idle(&self) -> Option<WorkerId> {
        self.idle.front().copied()
    }

    /// Hand `job` to an idle worker and mark it busy.
    ///
    /// If the worker thread has already exited the slot is marked lost and
    /// `Disconnected` is returned; the caller may retry on another worker.
    pub fn assign(&mut self, worker: WorkerId, job: RenderJob) -> Result<(), PoolError> {
        let slot = self
            .slots
            .get_mut(worker.0)
            .ok_or(PoolError::UnknownWorker(worker))?;
        if slot.status != WorkerStatus::Idle {
            return Err(PoolError::NotIdle(worker));
        }

        if slot.commands.try_send(WorkerCommand::Render(job)).is_err() {
            slot.status = WorkerStatus::Lost;
            self.idle.retain(|&id| id != worker);
            return Err(PoolError::Disconnected(worker));
        }

        slot.status = WorkerStatus::Busy(job);
        self.idle.retain(|&id| id != worker);
        debug!(
            "Worker {worker} <- page {} (scale {:.3}, generation {})",
            job.page_index, job.target_scale, job.generation
        );
        Ok(())
    }

    /// Return a busy worker to the idle list once its completion was consumed
    pub fn release(&mut self, worker: WorkerId) {
        let Some(slot) = self.slots.get_mut(worker.0) else {
            warn!("Completion from unknown worker {worker}");
            return;
        };
        match slot.status {
            WorkerStatus::Busy(_) => {
                slot.status = WorkerStatus::Idle;
                self.idle.push_back(worker);
            }
            status => warn!("Release of worker {worker} in state {status:?} ignored"),
        }
    }

    /// Permanently retire a worker that reported itself lost.
    ///
    /// Returns the job the slot was busy with, if any. A worker can be handed
    /// a job before it reports a failed handle clone, so the slot is the
    /// authority on what was in flight. The thread is not joined here: it may
    /// still be waiting on the guard to tear down its handle. [`shutdown`]
    /// joins it.
    ///
    /// [`shutdown`]: Self::shutdown
    pub fn mark_lost(&mut self, worker: WorkerId) -> Option<RenderJob> {
        let slot = self.slots.get_mut(worker.0)?;
        let in_flight = match slot.status {
            WorkerStatus::Busy(job) => Some(job),
            _ => None,
        };
        slot.status = WorkerStatus::Lost;
        self.idle.retain(|&id| id != worker);
        in_flight
    }

    /// Ask every worker to stop after its current job and wait for all of
    /// them, lost ones included.
    ///
    /// Dropping the pool without calling this detaches the threads instead;
    /// each exits once its command channel closes.
    pub fn shutdown(&mut self) {
        for slot in &self.slots {
            // Lost workers exit on their own and never read commands again
            if slot.thread.is_some() && slot.status != WorkerStatus::Lost {
                let _ = slot.commands.send(WorkerCommand::Shutdown);
            }
        }
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(thread) = slot.thread.take() {
                if thread.join().is_err() {
                    error!("Render worker #{index} panicked during shutdown");
                }
            }
        }
        self.idle.clear();
    }
}

fn worker_main<B: DocumentRenderer>(
    id: WorkerId,
    guard: &RenderBackendGuard<B>,
    commands: &Receiver<WorkerCommand>,
    events: &Sender<WorkerEvent>,
) {
    let handle = match guard.with_exclusive(|base| base.clone_handle()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Render worker {id} could not open its renderer handle: {e}");
            let _ = events.send(WorkerEvent::Lost {
                worker: id,
                job: None,
                reason: e.to_string(),
            });
            return;
        }
    };
    debug!("Render worker {id} ready");

    while let Ok(command) = commands.recv() {
        let job = match command {
            WorkerCommand::Render(job) => job,
            WorkerCommand::Shutdown => break,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| render_job(guard, &handle, &job))) {
            Ok(result) => {
                let completion = Completion {
                    worker: id,
                    job,
                    result,
                };
                if events.send(WorkerEvent::Completed(completion)).is_err() {
                    break;
                }
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(
                    "Render worker {id} panicked on page {}: {reason}",
                    job.page_index
                );
                let _ = events.send(WorkerEvent::Lost {
                    worker: id,
                    job: Some(job),
                    reason,
                });
                break;
            }
        }
    }

    guard.with_exclusive(|_| drop(handle));
    debug!("Render worker {id} stopped");
}

/// Layout under the guard, rasterize unlocked, tear the layout down under
/// the guard again.
fn render_job<B: DocumentRenderer>(
    guard: &RenderBackendGuard<B>,
    handle: &B::Handle,
    job: &RenderJob,
) -> Result<RenderedPage, RenderFault> {
    let layout = guard.with_exclusive(|_| handle.layout(job.page_index))?;
    let native_size = handle.native_size(&layout);
    // A panicking rasterizer still gets its layout torn down under the guard
    let pixmap = panic::catch_unwind(AssertUnwindSafe(|| {
        handle.rasterize(&layout, job.target_scale)
    }));
    guard.with_exclusive(|_| drop(layout));
    let pixmap = pixmap.unwrap_or_else(|payload| panic::resume_unwind(payload));

    Ok(RenderedPage {
        native_size,
        pixmap: pixmap?,
    })
}
