//! Bounded worker pool shared by the webhook and upload engines.
//!
//! A fixed number of workers drain a shared queue of jobs. Each worker keeps
//! its own result list; the caller waits for every worker before merging the
//! lists back into job order.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::debug;

/// Outputs of [`WorkerPool::run_until`].
#[derive(Debug)]
pub struct Drained<T> {
    /// Outputs of the dispatched jobs, in job order.
    pub outputs: Vec<T>,
    /// Position in `outputs` of the first output, in completion order, that
    /// satisfied the halt predicate.
    pub first_halt: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// A pool of at least one worker.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs every job and returns the outputs in job order.
    pub async fn run<J, T, F, Fut>(&self, jobs: Vec<J>, work: F) -> Result<Vec<T>, JoinError>
    where
        J: Send + 'static,
        T: Send + 'static,
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Ok(self.run_until(jobs, work, |_| false).await?.outputs)
    }

    /// Like [`WorkerPool::run`], but once an output satisfies `halt` no further
    /// jobs are dispatched. Jobs already in flight finish and their outputs are
    /// still returned; undispatched jobs produce no output.
    pub async fn run_until<J, T, F, Fut, H>(
        &self,
        jobs: Vec<J>,
        work: F,
        halt: H,
    ) -> Result<Drained<T>, JoinError>
    where
        J: Send + 'static,
        T: Send + 'static,
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        H: Fn(&T) -> bool + Send + Sync + 'static,
    {
        if jobs.is_empty() {
            return Ok(Drained {
                outputs: Vec::new(),
                first_halt: None,
            });
        }

        let worker_count = self.workers.min(jobs.len());
        let queue = Arc::new(Mutex::new(jobs.into_iter().enumerate()));
        let halted = Arc::new(AtomicBool::new(false));
        let first_halt = Arc::new(AtomicUsize::new(usize::MAX));
        let work = Arc::new(work);
        let halt = Arc::new(halt);

        let mut set = JoinSet::new();
        for worker_id in 0..worker_count {
            let queue = Arc::clone(&queue);
            let halted = Arc::clone(&halted);
            let first_halt = Arc::clone(&first_halt);
            let work = Arc::clone(&work);
            let halt = Arc::clone(&halt);
            set.spawn(async move {
                let mut slot: Vec<(usize, T)> = Vec::new();
                loop {
                    if halted.load(Ordering::SeqCst) {
                        break;
                    }
                    let next = queue.lock().await.next();
                    let Some((index, job)) = next else {
                        break;
                    };
                    let output = work(job).await;
                    if halt(&output) {
                        let _ = first_halt.compare_exchange(
                            usize::MAX,
                            index,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        );
                        halted.store(true, Ordering::SeqCst);
                    }
                    slot.push((index, output));
                }
                debug!(worker_id, processed = slot.len(), "Worker drained queue");
                slot
            });
        }

        let mut merged = Vec::new();
        while let Some(joined) = set.join_next().await {
            merged.extend(joined?);
        }
        merged.sort_by_key(|(index, _)| *index);
        let first_index = first_halt.load(Ordering::SeqCst);
        let first_halt = merged.iter().position(|(index, _)| *index == first_index);
        Ok(Drained {
            outputs: merged.into_iter().map(|(_, output)| output).collect(),
            first_halt,
        })
    }
}
