//! The worker pool: N threads consuming a bounded, policy-pluggable job
//! queue under a single mutex with paired full/empty condition variables.
//!
//! The mutex guards the scheduler and the shutdown flag; everything a wait
//! predicate consults lives under it. Blocking is the pool's job; the
//! scheduler itself never suspends.

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::config::DEFAULT_DOCROOT;
use crate::http;
use crate::job::Job;
use crate::metrics;
use crate::scheduler::Scheduler;

/// Error from submitting a job to the pool.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The pool is shutting down. The refused job was dropped, which closed
    /// its socket.
    #[error("pool is shutting down")]
    ShuttingDown,
}

/// Error from swapping the scheduling policy on a live pool.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// The replacement cannot hold the jobs currently queued; nothing was
    /// moved or swapped.
    #[error("replacement scheduler holds {capacity} jobs but {queued} are queued")]
    CapacityTooSmall { queued: usize, capacity: usize },
}

struct PoolState {
    scheduler: Scheduler,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    not_empty: Condvar,
    not_full: Condvar,
    docroot: PathBuf,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool lock poisoned")
    }
}

/// A fixed set of workers around one bounded scheduler. A FIFO scheduler is
/// installed at creation; [`WorkerPool::set_scheduler`] hot-swaps the policy
/// on the live pool.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `nworkers` workers around a FIFO queue of `capacity` slots.
    ///
    /// Worker spawn is best-effort: a failed spawn is logged and the
    /// survivors keep running. A missing docroot falls back to the default.
    pub fn new(nworkers: usize, capacity: usize, docroot: Option<PathBuf>) -> WorkerPool {
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                scheduler: Scheduler::fifo(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            docroot: docroot.unwrap_or_else(|| PathBuf::from(DEFAULT_DOCROOT)),
        });

        let mut workers = Vec::with_capacity(nworkers);
        for id in 0..nworkers {
            let shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker_main(&shared, id));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!("worker-{id} failed to start: {e}"),
            }
        }

        WorkerPool {
            shared,
            workers: Mutex::new(workers),
        }
    }

    pub fn docroot(&self) -> &Path {
        &self.shared.docroot
    }

    /// Replace the scheduling policy, draining every queued job from the old
    /// scheduler into the new one under the lock. Workers pick up the new
    /// policy on their next lock acquisition.
    pub fn set_scheduler(&self, mut next: Scheduler) -> Result<(), SwapError> {
        let mut state = self.shared.lock();
        if next.capacity() < state.scheduler.len() {
            return Err(SwapError::CapacityTooSmall {
                queued: state.scheduler.len(),
                capacity: next.capacity(),
            });
        }
        while let Some(job) = state.scheduler.pop() {
            if next.push(job).is_err() {
                unreachable!("swap target capacity was checked above");
            }
        }
        state.scheduler = next;
        Ok(())
    }

    /// Submit a bare connection with no estimate.
    pub fn submit(&self, stream: TcpStream) -> Result<(), SubmitError> {
        self.submit_job(Job::new(stream, 0))
    }

    /// Admit a job, blocking while the queue is full. Refused with
    /// [`SubmitError::ShuttingDown`] once shutdown has begun.
    pub fn submit_job(&self, job: Job) -> Result<(), SubmitError> {
        let est = job.est_cost;
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(SubmitError::ShuttingDown);
        }
        let mut job = job;
        loop {
            match state.scheduler.push(job) {
                Ok(()) => break,
                Err(refused) => {
                    job = refused;
                    state = self
                        .shared
                        .not_full
                        .wait(state)
                        .expect("pool lock poisoned");
                    if state.shutdown {
                        return Err(SubmitError::ShuttingDown);
                    }
                }
            }
        }
        metrics::inc_submit(est);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Begin shutdown and block until every worker has drained the queue and
    /// exited. Jobs admitted before this call are all served.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
        }
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock().expect("pool lock poisoned"));
        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// Worker loop: pop under the lock, serve outside it, free a queue slot,
/// repeat. On an empty queue: exit if shutting down, otherwise wait. The
/// wait predicate is rechecked on every wakeup.
fn worker_main(shared: &Shared, id: usize) {
    let mut state = shared.lock();
    loop {
        if let Some(job) = state.scheduler.pop() {
            metrics::inc_pop(job.est_cost);
            drop(state);
            serve(shared, id, job);
            state = shared.lock();
            shared.not_full.notify_one();
            continue;
        }
        if state.shutdown {
            return;
        }
        state = shared.not_empty.wait(state).expect("pool lock poisoned");
    }
}

fn serve(shared: &Shared, id: usize, job: Job) {
    let mut stream = job.stream;
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());
    debug!("worker-{id}: open peer={peer} est={}", job.est_cost);
    match http::handle_connection(&mut stream, &shared.docroot) {
        Ok(()) => debug!("worker-{id}: close peer={peer}"),
        Err(e) => debug!("worker-{id}: error peer={peer}: {e}"),
    }
    // `stream` drops here: the socket's single close.
}
