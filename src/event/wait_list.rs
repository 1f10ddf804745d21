//! Many-Waiter One-Shot Events
//!
//! [`WaitListEvent`] is the refcounted signal the rest of the crate waits
//! on: producer threads call [`WaitListEvent::signal`] exactly-once-wins,
//! consumer threads block synchronously ([`WaitListEvent::wait`] /
//! [`WaitListEvent::wait_any`]) or obtain a receiver for an external wait
//! ([`WaitListEvent::wait_async`]).
//!
//! `wait_any` locks the distinct events of the requested set in address
//! order. That single global order is what makes overlapping waits from
//! different threads deadlock-free; the signaled check happens under each
//! event's lock so a racing `signal` can never slip between check and
//! registration.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;

use super::system::{SystemEventPipeSender, SystemEventReceiver};
use crate::ref_count::{Ref, RefCount, RefCounted};

/// Shared waiter record registered on every event of one `wait_any` call.
///
/// The done flag is owned by the waiter's own lock; an event notifying it
/// locks the waiter, not the other way around, so event locks and waiter
/// locks are never held crosswise.
struct SyncWaiter {
    done: Mutex<bool>,
    condvar: Condvar,
}

impl SyncWaiter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    fn notify(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.condvar.notify_all();
    }
}

/// Waiter lists of one event, guarded by the event's lock.
#[derive(Default)]
struct WaitList {
    sync: SmallVec<[Arc<SyncWaiter>; 2]>,
    pipes: SmallVec<[SystemEventPipeSender; 1]>,
}

/// A refcounted, many-waiter, one-shot signal.
///
/// State machine: Unsignaled → Signaled, with no reverse transition.
/// Signaling again is a no-op.
pub struct WaitListEvent {
    refs: RefCount,
    signaled: AtomicBool,
    waiters: Mutex<WaitList>,
}

/// One slot of a [`WaitListEvent::wait_any`] call.
pub struct WaitEntry {
    pub event: Ref<WaitListEvent>,
    pub ready: bool,
}

impl WaitEntry {
    #[must_use]
    pub fn new(event: Ref<WaitListEvent>) -> Self {
        Self {
            event,
            ready: false,
        }
    }
}

impl RefCounted for WaitListEvent {
    fn ref_count(&self) -> &RefCount {
        &self.refs
    }
}

impl WaitListEvent {
    /// Creates a fresh unsignaled event.
    #[must_use]
    pub fn create() -> Ref<Self> {
        Ref::new(Self {
            refs: RefCount::new(1, 0),
            signaled: AtomicBool::new(false),
            waiters: Mutex::new(WaitList::default()),
        })
    }

    /// Whether the one-shot transition has happened. Monotonic: once true,
    /// true forever.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Marks the event signaled and wakes every waiter. Idempotent.
    pub fn signal(&self) {
        let woken = {
            let mut waiters = self.waiters.lock();
            if self.signaled.swap(true, Ordering::Release) {
                return;
            }
            mem::take(&mut *waiters)
        };
        trace!(
            "wait-list event signaled ({} sync, {} async waiters)",
            woken.sync.len(),
            woken.pipes.len()
        );
        // Outside this event's lock: each sync waiter is woken under its
        // own lock, each async waiter through its pipe sender.
        for waiter in woken.sync {
            waiter.notify();
        }
        for pipe in woken.pipes {
            pipe.signal();
        }
    }

    /// Blocking wait on this single event; delegates to [`Self::wait_any`]
    /// with N = 1 so both share one correctness story.
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut entries = [WaitEntry::new(Ref::retain(self))];
        Self::wait_any(&mut entries, timeout)
    }

    /// Returns a receiver that fires when this event is signaled.
    ///
    /// A pipe pair is created either way: if the event is already signaled
    /// the receiver comes back pre-signaled, otherwise the sender is
    /// parked on the waiter list for [`Self::signal`] to fire.
    #[must_use]
    pub fn wait_async(&self) -> SystemEventReceiver {
        let mut waiters = self.waiters.lock();
        if self.is_signaled() {
            return SystemEventReceiver::signaled();
        }
        let (sender, receiver) = SystemEventReceiver::new_pair();
        waiters.pipes.push(sender);
        receiver
    }

    /// Blocks until at least one event in the set is signaled or the
    /// timeout elapses, writing each slot's `ready` flag. Returns whether
    /// any flag ended up set.
    ///
    /// A zero timeout polls under the locks and returns immediately; a
    /// timeout too large for the clock is treated as infinite. Passing the
    /// same event in several slots is allowed: every such slot reports the
    /// same value and only one waiter is registered for the event.
    pub fn wait_any(entries: &mut [WaitEntry], timeout: Duration) -> bool {
        if entries.is_empty() {
            return false;
        }

        // Distinct events, ordered by address: the global lock order.
        let mut order: SmallVec<[usize; 8]> = (0..entries.len()).collect();
        order.sort_unstable_by_key(|&i| entries[i].event.as_ptr() as usize);
        order.dedup_by_key(|&mut i| entries[i].event.as_ptr() as usize);

        let waiter = {
            let mut guards: SmallVec<[MutexGuard<'_, WaitList>; 4]> = SmallVec::new();
            let mut any_signaled = false;
            for &i in &order {
                let guard = entries[i].event.waiters.lock();
                // Checked under the lock: a signal racing with this wait
                // either lands before the check (seen here) or after
                // registration (wakes the waiter). Nothing is missed.
                any_signaled |= entries[i].event.is_signaled();
                guards.push(guard);
            }

            if any_signaled || timeout.is_zero() {
                // Release in reverse order; not required for correctness,
                // kept symmetric with acquisition.
                while guards.pop().is_some() {}
                drop(guards);
                let mut any = false;
                for entry in entries.iter_mut() {
                    entry.ready = entry.event.is_signaled();
                    any |= entry.ready;
                }
                return any;
            }

            // Register one shared waiter on every distinct event while all
            // event locks are still held.
            let waiter = SyncWaiter::new();
            for guard in &mut guards {
                guard.sync.push(waiter.clone());
            }
            while guards.pop().is_some() {}
            waiter
        };

        // Block on the waiter's own condition variable; wakes may be
        // spurious, so loop on the done flag.
        let deadline = Instant::now().checked_add(timeout);
        {
            let mut done = waiter.done.lock();
            while !*done {
                match deadline {
                    Some(deadline) => {
                        if waiter.condvar.wait_until(&mut done, deadline).timed_out() {
                            break;
                        }
                    }
                    None => waiter.condvar.wait(&mut done),
                }
            }
        }

        // Deregister from every event that did not fire; events that fired
        // already drained their waiter lists.
        for &i in &order {
            let event = &entries[i].event;
            let mut waiters = event.waiters.lock();
            if !event.is_signaled() {
                waiters.sync.retain(|other| !Arc::ptr_eq(other, &waiter));
            }
        }

        let mut any = false;
        for entry in entries.iter_mut() {
            entry.ready = entry.event.is_signaled();
            any |= entry.ready;
        }
        any
    }
}
