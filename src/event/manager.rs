//! Future Registry
//!
//! [`EventManager`] is the top of the completion machinery: it assigns each
//! asynchronous operation an opaque numeric [`FutureHandle`], holds a
//! strong reference to its [`TrackedEvent`] until completion, and offers
//! the three ways completion is observed — polling
//! ([`EventManager::process_poll_events`]), blocking
//! ([`EventManager::wait_any`]), and the shutdown sweep
//! ([`EventManager::shut_down`]), which cancels every straggler exactly
//! once while breaking the table-holds-event reference cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::tracked::{CallbackMode, CompletionKind, CompletionSource, TrackedEvent};
use super::wait_list::{WaitEntry, WaitListEvent};
use crate::errors::LockstepError;
use crate::mutex::MutexProtected;
use crate::ref_count::Ref;

/// Opaque identifier for a yet-to-complete asynchronous operation.
///
/// Handles are unique and monotonically increasing for the life of the
/// manager that produced them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FutureHandle(u64);

impl FutureHandle {
    /// The never-allocated handle.
    pub const NULL: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Default for FutureHandle {
    fn default() -> Self {
        Self::NULL
    }
}

/// One slot of an [`EventManager::wait_any`] call.
#[derive(Clone, Copy, Debug)]
pub struct WaitRequest {
    pub handle: FutureHandle,
    pub completed: bool,
}

impl WaitRequest {
    #[must_use]
    pub fn new(handle: FutureHandle) -> Self {
        Self {
            handle,
            completed: false,
        }
    }
}

/// Outcome of an [`EventManager::wait_any`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    /// At least one requested future completed.
    Success,
    /// The timeout elapsed with nothing ready.
    TimedOut,
    /// A requested handle was never allocated by this manager.
    Error,
}

type HandleTable = FxHashMap<FutureHandle, Ref<TrackedEvent>>;

/// The future registry.
///
/// The handle table exists until [`EventManager::shut_down`] runs, after
/// which it is permanently absent: later tracks complete synchronously as
/// cancelled, later waits report the swept futures as completed.
pub struct EventManager {
    next_handle: AtomicU64,
    events: MutexProtected<Option<HandleTable>>,
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            events: MutexProtected::new(Some(HandleTable::default())),
        }
    }

    /// Assigns the next handle and stores a strong reference to the event.
    ///
    /// After shutdown the event is not stored; it completes synchronously
    /// as cancelled, still exactly once.
    pub fn track_event(&self, event: Ref<TrackedEvent>) -> FutureHandle {
        let handle = FutureHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        event.set_future_handle(handle);
        let rejected = self.events.with(|table| match table.as_mut() {
            Some(table) => {
                table.insert(handle, event.clone());
                false
            }
            None => true,
        });
        if rejected {
            debug!("tracking {handle:?} after shutdown; completing as cancelled");
            event.complete(CompletionKind::Shutdown);
        } else {
            debug!("tracking {handle:?} ({:?})", event.callback_mode());
        }
        handle
    }

    /// Marks the event's underlying primitive signaled so a later poll or
    /// wait observes it. Does not run the callback — unless the manager is
    /// already shut down, in which case completion fires immediately with
    /// the cancelled status.
    pub fn set_future_ready(&self, event: &TrackedEvent) {
        if let CompletionSource::Event(signal) = event.source() {
            signal.signal();
        }
        let shut_down = self.events.with(|table| table.is_none());
        if shut_down {
            event.complete(CompletionKind::Shutdown);
        }
    }

    /// Completes every ready tracked event whose mode permits completion
    /// outside a wait ([`CallbackMode::WaitAnyOnly`] futures are skipped;
    /// they complete only from the wait that named them), then reports
    /// whether any event with [`CallbackMode::AllowProcessEvents`] is still
    /// outstanding (i.e. whether the caller should keep polling).
    ///
    /// Callbacks run outside the table lock, so they may themselves track
    /// new events; the watermark confines one pass to the handles that
    /// existed when it started, and the final check naturally counts
    /// anything added re-entrantly.
    pub fn process_poll_events(&self) -> bool {
        let watermark = self.next_handle.load(Ordering::Relaxed);
        let mut ready: SmallVec<[Ref<TrackedEvent>; 4]> = SmallVec::new();
        self.events.with(|table| {
            if let Some(table) = table.as_mut() {
                let handles: SmallVec<[FutureHandle; 8]> = table
                    .iter()
                    .filter(|(handle, event)| {
                        handle.raw() < watermark
                            && event.callback_mode() != CallbackMode::WaitAnyOnly
                            && event.is_ready()
                    })
                    .map(|(handle, _)| *handle)
                    .collect();
                for handle in handles {
                    if let Some(event) = table.remove(&handle) {
                        ready.push(event);
                    }
                }
            }
        });
        for event in &ready {
            event.complete(CompletionKind::Ready);
        }

        self.events.with(|table| {
            table.as_ref().is_some_and(|table| {
                table
                    .values()
                    .any(|event| event.callback_mode() == CallbackMode::AllowProcessEvents)
            })
        })
    }

    /// Blocks until at least one requested future completes or the timeout
    /// elapses, setting each request's `completed` flag.
    ///
    /// A zero timeout polls; a timeout too large for the clock is
    /// unbounded. Futures that already completed report `completed`
    /// immediately. Handles never allocated by this manager yield
    /// [`WaitStatus::Error`] without waiting.
    pub fn wait_any(&self, requests: &mut [WaitRequest], timeout: Duration) -> WaitStatus {
        if requests.is_empty() {
            return WaitStatus::TimedOut;
        }
        let next = self.next_handle.load(Ordering::Relaxed);
        for request in requests.iter() {
            if request.handle.is_null() || request.handle.raw() >= next {
                warn!("wait rejected: {}", LockstepError::InvalidHandle(request.handle));
                return WaitStatus::Error;
            }
        }

        // Partition requests into still-tracked futures and ones already
        // completed (absent from a live table). An absent table means the
        // shutdown sweep completed everything.
        let mut pending: SmallVec<[(usize, Ref<TrackedEvent>); 4]> = SmallVec::new();
        let mut already_completed: SmallVec<[usize; 4]> = SmallVec::new();
        let shut_down = self.events.with(|table| match table.as_ref() {
            Some(table) => {
                for (index, request) in requests.iter().enumerate() {
                    match table.get(&request.handle) {
                        Some(event) => pending.push((index, event.clone())),
                        None => already_completed.push(index),
                    }
                }
                false
            }
            None => true,
        });
        if shut_down {
            for request in requests.iter_mut() {
                request.completed = true;
            }
            return WaitStatus::Success;
        }

        // Resolve each pending future to the wait-list event it blocks on
        // and delegate to the one any-of-N primitive. If something already
        // completed there is no reason to block at all.
        let mut entries: SmallVec<[WaitEntry; 4]> = pending
            .iter()
            .map(|(_, event)| WaitEntry::new(event.source().wait_event()))
            .collect();
        let effective_timeout = if already_completed.is_empty() {
            timeout
        } else {
            Duration::ZERO
        };
        WaitListEvent::wait_any(&mut entries, effective_timeout);

        let mut any = !already_completed.is_empty();
        for index in already_completed {
            requests[index].completed = true;
        }
        for ((index, event), entry) in pending.iter().zip(entries.iter()) {
            if !entry.ready {
                continue;
            }
            any = true;
            requests[*index].completed = true;
            let handle = requests[*index].handle;
            // Whichever thread removes the event from the table owns its
            // completion; the exactly-once guard backs this up.
            let removed = self
                .events
                .with(|table| table.as_mut().and_then(|t| t.remove(&handle)));
            if removed.is_some() {
                event.complete(CompletionKind::Ready);
            }
        }

        if any { WaitStatus::Success } else { WaitStatus::TimedOut }
    }

    /// Number of futures currently tracked. Diagnostic.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.events.with(|table| table.as_ref().map_or(0, HandleTable::len))
    }

    /// Extracts the entire handle table in one atomic swap, then completes
    /// every extracted event as cancelled outside the lock. Each swept
    /// future's underlying signal is also fired so threads blocked in
    /// [`EventManager::wait_any`] wake promptly instead of sleeping out
    /// their timeout.
    ///
    /// This is the single point where the manager → event → queue → owner
    /// reference cycle is broken. Idempotent; also run from `Drop` so no
    /// tracked callback can be silently dropped.
    pub fn shut_down(&self) {
        let Some(extracted) = self.events.with(Option::take) else {
            return;
        };
        debug!("shutting down event manager; cancelling {} futures", extracted.len());
        for (_, event) in extracted {
            event.complete(CompletionKind::Shutdown);
            // Queue-serial waiters block on an event owned by the queue;
            // only explicit-event sources can be woken from here.
            if let CompletionSource::Event(signal) = event.source() {
                signal.signal();
            }
        }
    }
}

impl Drop for EventManager {
    fn drop(&mut self) {
        self.shut_down();
    }
}
