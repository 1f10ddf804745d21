//! Asynchronous Task Dispatch
//!
//! [`AsyncTaskManager`] hands closures to a worker-thread pool and tracks
//! every in-flight task in a registry so teardown can block until all of
//! them drain. The pool itself is an external collaborator behind
//! [`WorkerTaskPool`]; [`ThreadWorkerPool`] is the bundled default, a fixed
//! set of threads fed from a job channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::errors::{LockstepError, Result};
use crate::event::{WaitListEvent, WaitableEvent};
use crate::mutex::MutexProtected;
use crate::ref_count::{Ref, RefCount, RefCounted};

/// External worker-pool contract: run the closure on some worker thread and
/// hand back a token that can be blocked on or polled.
pub trait WorkerTaskPool: Send + Sync {
    fn post_worker_task(&self, task: Box<dyn FnOnce() + Send>) -> Result<Box<dyn WaitableEvent>>;
}

type Job = (Box<dyn FnOnce() + Send>, Ref<WaitListEvent>);

/// Default [`WorkerTaskPool`]: a fixed set of worker threads fed from an
/// unbounded job channel. Dropping the pool closes the channel; workers
/// drain whatever was already queued, then exit and are joined.
pub struct ThreadWorkerPool {
    tx: flume::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadWorkerPool {
    /// Spawns `threads` workers (at least one).
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let (tx, rx) = flume::unbounded::<Job>();
        let workers = (0..threads.max(1))
            .map(|index| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("lockstep-worker-{index}"))
                    .spawn(move || {
                        while let Ok((job, done)) = rx.recv() {
                            job();
                            done.signal();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self { tx, workers }
    }
}

impl WorkerTaskPool for ThreadWorkerPool {
    fn post_worker_task(&self, task: Box<dyn FnOnce() + Send>) -> Result<Box<dyn WaitableEvent>> {
        let done = WaitListEvent::create();
        self.tx
            .send((task, done.clone()))
            .map_err(|_| LockstepError::TaskPostFailed("worker pool is shut down".to_string()))?;
        Ok(Box::new(PoolToken { done }))
    }
}

impl Drop for ThreadWorkerPool {
    fn drop(&mut self) {
        // Swap in an unrelated sender so the workers' channel closes, then
        // join them once the queue has drained.
        let (detached, _) = flume::unbounded();
        drop(std::mem::replace(&mut self.tx, detached));
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Completion token returned by [`ThreadWorkerPool`].
struct PoolToken {
    done: Ref<WaitListEvent>,
}

impl WaitableEvent for PoolToken {
    fn wait(&self) {
        // Duration::MAX overflows the clock and is treated as unbounded.
        let _ = self.done.wait(Duration::MAX);
    }

    fn is_complete(&self) -> bool {
        self.done.is_signaled()
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Registry record for one in-flight task.
///
/// Present in the pending map from the moment the task is posted until its
/// worker-thread execution finishes. The `done` event is the record's own
/// completion signal, fired by the worker entry point, so a drain never
/// depends on anything the pool hands back.
struct AsyncTask {
    refs: RefCount,
    id: u64,
    done: Ref<WaitListEvent>,
}

impl RefCounted for AsyncTask {
    fn ref_count(&self) -> &RefCount {
        &self.refs
    }
}

type TaskMap = FxHashMap<u64, Ref<AsyncTask>>;

/// Dispatches closures to a worker pool and tracks them until completion.
///
/// The manager does not retry or observe task failures; a closure is
/// responsible for its own error handling. Its one obligation is that no
/// task can be silently dropped: every posted task either completes on a
/// worker or is blocked on by [`AsyncTaskManager::wait_all_pending_tasks`].
pub struct AsyncTaskManager {
    pool: Arc<dyn WorkerTaskPool>,
    tasks: Arc<MutexProtected<TaskMap>>,
}

impl AsyncTaskManager {
    #[must_use]
    pub fn new(pool: Arc<dyn WorkerTaskPool>) -> Self {
        Self {
            pool,
            tasks: Arc::new(MutexProtected::new(TaskMap::default())),
        }
    }

    /// Registers a task record and hands the closure to the pool.
    ///
    /// The worker entry point runs the closure, deregisters the record,
    /// then fires the record's completion event. The registry lock is never
    /// held across the pool handoff: the pool is allowed to block until a
    /// worker frees up, and that worker needs the lock to deregister.
    pub fn post_task(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let record = Ref::new(AsyncTask {
            refs: RefCount::new(1, 0),
            id,
            done: WaitListEvent::create(),
        });

        let registry = self.tasks.clone();
        let worker_record = record.clone();
        let closure: Box<dyn FnOnce() + Send> = Box::new(move || {
            task();
            registry.with(|tasks| {
                tasks.remove(&worker_record.id);
            });
            worker_record.done.signal();
        });

        // Publish the record before the handoff so no posted task can escape
        // a drain, then post with no lock held.
        self.tasks.with(|tasks| {
            tasks.insert(id, record.clone());
        });
        if let Err(err) = self.pool.post_worker_task(closure) {
            self.tasks.with(|tasks| {
                tasks.remove(&id);
            });
            // A drain may already hold a snapshot with this record in it.
            record.done.signal();
            return Err(err);
        }
        trace!("posted worker task {id}");
        Ok(())
    }

    /// Blocks until every task pending at the time of the call has finished.
    ///
    /// The pending map is swapped out atomically, so tasks posted during
    /// the drain belong to the next drain, not this one.
    pub fn wait_all_pending_tasks(&self) {
        let snapshot = self.tasks.with(std::mem::take);
        if snapshot.is_empty() {
            return;
        }
        debug!("draining {} pending tasks", snapshot.len());
        for (_, record) in snapshot {
            let _ = record.done.wait(Duration::MAX);
        }
    }

    /// Whether any posted task has not yet finished.
    #[must_use]
    pub fn has_pending_tasks(&self) -> bool {
        self.tasks.with(|tasks| !tasks.is_empty())
    }
}
