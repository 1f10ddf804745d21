//! Asynchronous completion, waitable events, and reference-lifetime core
//! for GPU-style APIs.
//!
//! Operations that finish on a worker thread, a queue, or an external
//! signal are exposed as cancellable, waitable, at-most-once-completed
//! futures, backed by intrusive atomic reference counting
//! ([`ref_count`]), mutex-protection wrappers ([`mutex`]), one-shot
//! waitable events ([`event`]), and a worker-task registry ([`task`]).

pub mod errors;
pub mod event;
pub mod mutex;
pub mod ref_count;
pub mod task;

pub use errors::{LockstepError, Result};
pub use event::{
    CallbackMode, CompletionKind, CompletionSource, CompletionStatus, EventManager, FutureHandle,
    QueueCompletion, SystemEventPipeSender, SystemEventReceiver, SystemWaitEntry, TrackedEvent,
    WaitEntry, WaitListEvent, WaitRequest, WaitStatus, WaitableEvent, wait_any_system_events,
};
pub use mutex::{
    Guard, MutexProtected, RecursiveGuard, RecursiveMutexProtected, SharedGuard,
    SharedMutexProtected,
};
pub use ref_count::{Ref, RefCount, RefCounted};
pub use task::{AsyncTaskManager, ThreadWorkerPool, WorkerTaskPool};
