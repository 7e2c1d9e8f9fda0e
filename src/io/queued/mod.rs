use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub mod batch;

/// One arrived (or failed) file of a queued job.
#[derive(Debug)]
pub struct LoaderCompletion {
    pub part: u32,
    /// `None` when the read failed.
    pub data: Option<Vec<u8>>,
}

pub type LoaderCallback = Arc<dyn Fn(LoaderCompletion) + Send + Sync>;

pub struct LoaderJob {
    pub path: String,
    pub priority: i32,
    /// Which file of a multi-file request this job reads.
    pub part: u32,
    pub callback: LoaderCallback,
}

impl Debug for LoaderJob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderJob")
            .field("path", &self.path)
            .field("priority", &self.priority)
            .field("part", &self.part)
            .finish()
    }
}

/// Bulk I/O scheduler gathering files ahead of their use.
pub trait QueuedLoader: Send + Sync {
    fn is_batching(&self) -> bool;

    /// Returns `false` when the job was not accepted.
    fn add_job(&self, job: LoaderJob) -> bool;
}
