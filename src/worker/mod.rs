//! Background render workers

mod message;
mod pool;

pub use message::{Completion, RenderJob, RenderedPage, WorkerEvent, WorkerId};
pub use pool::{PoolError, WorkerPool, WorkerStatus};
