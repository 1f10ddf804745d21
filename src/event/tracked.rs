//! Tracked Completion State
//!
//! A [`TrackedEvent`] owns everything one asynchronous operation needs to
//! complete: what to watch (a wait-list event or a queue serial), the
//! exactly-once guard, a deferred error slot, and the user callback. The
//! callback runs once, on whichever path observes completion first — a
//! poll, a wait, or the shutdown sweep.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::debug;
use parking_lot::Mutex;

use super::manager::FutureHandle;
use super::wait_list::WaitListEvent;
use crate::ref_count::{Ref, RefCount, RefCounted};

/// When a tracked operation's callback is allowed to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum CallbackMode {
    /// Only from inside a `wait_any` that named this future.
    WaitAnyOnly = 0,
    /// Also from `process_poll_events`.
    AllowProcessEvents = 1,
    /// From any thread that observes completion.
    AllowSpontaneous = 2,
}

impl CallbackMode {
    fn from_payload(payload: u64) -> Self {
        match payload {
            0 => Self::WaitAnyOnly,
            1 => Self::AllowProcessEvents,
            2 => Self::AllowSpontaneous,
            _ => unreachable!("callback mode payloads are constructed in-crate"),
        }
    }
}

/// The one outcome every tracked operation's callback receives.
///
/// Failure and success are two payloads of the same completion protocol,
/// not different control flow; cancellation is a third, distinct outcome
/// meaning the owning manager was torn down before the operation's natural
/// result was observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Error(String),
    Cancelled,
}

/// Why `complete` is being invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionKind {
    /// The operation's primitive signaled or its serial passed.
    Ready,
    /// The owning manager was shut down with the operation still pending.
    Shutdown,
}

/// External queue-completion collaborator: a monotonically increasing
/// completion serial plus a way to wait for a specific serial.
pub trait QueueCompletion: Send + Sync {
    /// Highest serial known to have completed.
    fn completed_serial(&self) -> u64;

    /// A one-shot event that is (or will be) signaled once `serial`
    /// completes.
    fn completion_event(&self, serial: u64) -> Ref<WaitListEvent>;
}

/// What a tracked operation waits on.
pub enum CompletionSource {
    /// An explicitly signaled wait-list event.
    Event(Ref<WaitListEvent>),
    /// Completion of `serial` on a queue.
    QueueSerial {
        queue: Arc<dyn QueueCompletion>,
        serial: u64,
    },
}

impl CompletionSource {
    /// Non-blocking readiness check.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match self {
            Self::Event(event) => event.is_signaled(),
            Self::QueueSerial { queue, serial } => queue.completed_serial() >= *serial,
        }
    }

    /// The wait-list event a blocking wait should block on.
    #[must_use]
    pub fn wait_event(&self) -> Ref<WaitListEvent> {
        match self {
            Self::Event(event) => event.clone(),
            Self::QueueSerial { queue, serial } => queue.completion_event(*serial),
        }
    }
}

type CompletionCallback = Box<dyn FnOnce(CompletionStatus) + Send>;

/// Completion state and callback for one tracked asynchronous operation.
///
/// The callback mode is carried in the refcount's payload tag; the
/// completed flag makes [`TrackedEvent::complete`] structurally
/// exactly-once.
pub struct TrackedEvent {
    refs: RefCount,
    handle: AtomicU64,
    source: CompletionSource,
    completed: AtomicBool,
    error: Mutex<Option<String>>,
    callback: Mutex<Option<CompletionCallback>>,
}

impl RefCounted for TrackedEvent {
    fn ref_count(&self) -> &RefCount {
        &self.refs
    }
}

impl TrackedEvent {
    /// Creates the completion state for a new operation. The callback will
    /// run exactly once, with exactly one [`CompletionStatus`].
    pub fn create(
        mode: CallbackMode,
        source: CompletionSource,
        callback: impl FnOnce(CompletionStatus) + Send + 'static,
    ) -> Ref<Self> {
        Ref::new(Self {
            refs: RefCount::new(1, mode as u64),
            handle: AtomicU64::new(FutureHandle::NULL.raw()),
            source,
            completed: AtomicBool::new(false),
            error: Mutex::new(None),
            callback: Mutex::new(Some(Box::new(callback))),
        })
    }

    #[must_use]
    pub fn callback_mode(&self) -> CallbackMode {
        CallbackMode::from_payload(self.refs.payload())
    }

    /// The handle assigned at track time; null until then.
    #[must_use]
    pub fn future_handle(&self) -> FutureHandle {
        FutureHandle::new(self.handle.load(Ordering::Relaxed))
    }

    pub(crate) fn set_future_handle(&self, handle: FutureHandle) {
        self.handle.store(handle.raw(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn source(&self) -> &CompletionSource {
        &self.source
    }

    /// Whether the underlying primitive has signaled (or the serial has
    /// passed). Independent of whether the callback has run yet.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.source.is_ready()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Records an error discovered during the asynchronous work. The first
    /// error wins; it surfaces from the completion callback as
    /// [`CompletionStatus::Error`] instead of being returned from the call
    /// that posted the operation.
    pub fn set_error(&self, message: impl Into<String>) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(message.into());
        }
    }

    /// Runs the completion callback if it has not already run.
    ///
    /// The atomic test-and-set makes a second invocation a no-op from any
    /// thread, so the callback observes exactly one of success, error, or
    /// cancellation.
    pub fn complete(&self, kind: CompletionKind) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        let callback = self.callback.lock().take();
        let status = match kind {
            CompletionKind::Shutdown => CompletionStatus::Cancelled,
            CompletionKind::Ready => match self.error.lock().take() {
                Some(message) => CompletionStatus::Error(message),
                None => CompletionStatus::Success,
            },
        };
        debug!(
            "completing future {:?} as {:?}",
            self.future_handle(),
            status
        );
        if let Some(callback) = callback {
            callback(status);
        }
    }
}
