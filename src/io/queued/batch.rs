use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use itertools::Itertools;
use log::{debug, trace};

use crate::io::common::loader::FileSystem;
use crate::io::queued::{LoaderCompletion, LoaderJob, QueuedLoader};
use crate::util::lock;

struct BatchState {
    batching: AtomicBool,
    queued: Mutex<Vec<LoaderJob>>,
    outstanding: Mutex<usize>,
    idle: Condvar,
}

impl BatchState {
    fn job_done(&self) {
        let mut outstanding = lock(&self.outstanding);
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }
}

/// Collects jobs between `begin_batch` and `end_batch`, then reads them on a pool of worker
/// threads, highest priority first.
pub struct BatchLoader {
    state: Arc<BatchState>,
    sender: Mutex<Option<Sender<LoaderJob>>>,
    workers: Vec<JoinHandle<()>>,
}

impl BatchLoader {
    pub fn new(file_system: Arc<dyn FileSystem>, worker_count: usize) -> std::io::Result<Self> {
        let state = Arc::new(BatchState {
            batching: AtomicBool::new(false),
            queued: Mutex::new(Vec::new()),
            outstanding: Mutex::new(0),
            idle: Condvar::new(),
        });

        let (sender, receiver) = channel::<LoaderJob>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count.max(1))
            .map(|idx| {
                let receiver = receiver.clone();
                let file_system = file_system.clone();
                let state = state.clone();
                std::thread::Builder::new()
                    .name(format!("BatchLoader-{}", idx))
                    .spawn(move || BatchLoader::run_worker(receiver, file_system, state))
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            state,
            sender: Mutex::new(Some(sender)),
            workers,
        })
    }

    fn run_worker(receiver: Arc<Mutex<Receiver<LoaderJob>>>, file_system: Arc<dyn FileSystem>, state: Arc<BatchState>) {
        loop {
            let job = {
                let receiver = lock(&receiver);
                receiver.recv()
            };

            let Ok(job) = job else {
                break;
            };

            let data = file_system.read_file(&job.path).ok();
            trace!("BatchLoader: {} arrived (ok: {})", job.path, data.is_some());
            (job.callback)(LoaderCompletion { part: job.part, data });
            state.job_done();
        }
    }

    pub fn begin_batch(&self) {
        self.state.batching.store(true, Ordering::Release);
    }

    /// Dispatches every job queued since `begin_batch`, returning how many there were.
    pub fn end_batch(&self) -> usize {
        self.state.batching.store(false, Ordering::Release);
        let jobs = std::mem::take(&mut *lock(&self.state.queued));
        let count = jobs.len();
        debug!("BatchLoader: dispatching {} jobs", count);

        let sender = lock(&self.sender);
        for job in jobs.into_iter().sorted_by_key(|job| -job.priority) {
            let Some(sender) = sender.as_ref() else {
                self.state.job_done();
                continue;
            };

            if let Err(failed) = sender.send(job) {
                let job = failed.0;
                (job.callback)(LoaderCompletion { part: job.part, data: None });
                self.state.job_done();
            }
        }
        count
    }

    /// Blocks until every dispatched job has reported back.
    pub fn wait_idle(&self) {
        let mut outstanding = lock(&self.state.outstanding);
        while *outstanding > 0 {
            outstanding = self
                .state
                .idle
                .wait(outstanding)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

impl QueuedLoader for BatchLoader {
    fn is_batching(&self) -> bool {
        self.state.batching.load(Ordering::Acquire)
    }

    fn add_job(&self, job: LoaderJob) -> bool {
        if !self.is_batching() {
            return false;
        }

        *lock(&self.state.outstanding) += 1;
        lock(&self.state.queued).push(job);
        true
    }
}

impl Drop for BatchLoader {
    fn drop(&mut self) {
        lock(&self.sender).take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::MemoryFileSystem;

    #[test]
    fn jobs_outside_a_batch_are_refused() -> Result<(), anyhow::Error> {
        let loader = BatchLoader::new(Arc::new(MemoryFileSystem::new()), 1)?;
        let accepted = loader.add_job(LoaderJob {
            path: "a.mdl".into(),
            priority: 0,
            part: 0,
            callback: Arc::new(|_| {}),
        });
        assert!(!accepted);
        Ok(())
    }

    #[test]
    fn batch_reports_every_part() -> Result<(), anyhow::Error> {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("a.mdl", vec![1]);
        fs.insert("a.vvd", vec![2, 2]);

        let loader = BatchLoader::new(fs, 2)?;
        let arrived = Arc::new(Mutex::new(Vec::new()));

        loader.begin_batch();
        for (part, path) in ["a.mdl", "a.vvd", "a.phy"].into_iter().enumerate() {
            let arrived = arrived.clone();
            assert!(loader.add_job(LoaderJob {
                path: path.into(),
                priority: part as i32,
                part: part as u32,
                callback: Arc::new(move |completion| {
                    lock(&arrived).push((completion.part, completion.data.map(|data| data.len())));
                }),
            }));
        }

        assert_eq!(loader.end_batch(), 3);
        loader.wait_idle();

        let arrived = lock(&arrived).iter().copied().sorted().collect_vec();
        assert_eq!(arrived, vec![(0, Some(1)), (1, Some(2)), (2, None)]);
        Ok(())
    }
}
