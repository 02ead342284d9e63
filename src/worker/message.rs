//! Messages exchanged between the control loop and render workers

use crate::render::{Pixmap, RenderFault};

/// Index of a worker slot in the pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A scheduled unit of work
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderJob {
    pub page_index: usize,
    /// Render resolution at dispatch time
    pub target_scale: f32,
    /// Generation the job was issued under
    pub generation: u64,
}

/// Successful output of a render job
#[derive(Debug)]
pub struct RenderedPage {
    /// Page size in document units, as reported by the layout phase
    pub native_size: (f32, f32),
    pub pixmap: Pixmap,
}

/// A finished job, successful or not
#[derive(Debug)]
pub struct Completion {
    pub worker: WorkerId,
    pub job: RenderJob,
    pub result: Result<RenderedPage, RenderFault>,
}

/// Notification posted by a worker to the control loop
#[derive(Debug)]
pub enum WorkerEvent {
    Completed(Completion),

    /// The worker exited and its slot is gone for good: either its renderer
    /// handle could not be created, or a job panicked.
    Lost {
        worker: WorkerId,
        job: Option<RenderJob>,
        reason: String,
    },
}

impl WorkerEvent {
    #[must_use]
    pub fn worker(&self) -> WorkerId {
        match self {
            Self::Completed(completion) => completion.worker,
            Self::Lost { worker, .. } => *worker,
        }
    }

    #[must_use]
    pub fn job(&self) -> Option<&RenderJob> {
        match self {
            Self::Completed(completion) => Some(&completion.job),
            Self::Lost { job, .. } => job.as_ref(),
        }
    }
}

/// Instruction sent from the pool to one worker
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Render(RenderJob),
    Shutdown,
}
