//! One-Shot Signal Pairs
//!
//! The lowest-level wait primitives: a sender/receiver pair representing a
//! single one-shot signal, and [`wait_any_system_events`], the sole blocking
//! any-of-N operation the rest of the crate builds on. The pair is backed by
//! a bounded `flume` channel; the selector-based wait plays the role an
//! OS-level `poll`/`WaitForMultipleObjects` would in a platform backend,
//! with transient wakeups retried internally.

use std::time::{Duration, Instant};

use flume::select::{SelectError, Selector};
use smallvec::SmallVec;

use crate::errors::{LockstepError, Result};

/// Minimal contract for an externally produced completion token.
///
/// Worker pools hand one back per posted task; the task manager only ever
/// needs to block on it or poll it.
pub trait WaitableEvent: Send + Sync {
    /// Blocks until the underlying operation has finished.
    fn wait(&self);
    /// Non-blocking poll.
    fn is_complete(&self) -> bool;
}

/// Sending end of a one-shot signal pair.
///
/// Consumed by [`SystemEventPipeSender::signal`]; dropping it unsignaled
/// leaves the paired receiver permanently unsignalable, which a blocking
/// wait reports as an error rather than hanging on.
#[derive(Debug)]
pub struct SystemEventPipeSender {
    tx: flume::Sender<()>,
}

impl SystemEventPipeSender {
    /// Fires the signal. Idempotence is the caller's concern; each sender
    /// can only ever fire once because `signal` consumes it.
    pub fn signal(self) {
        // The receiver may already have been dropped by a caller that gave
        // up on the wait; that is not an error.
        let _ = self.tx.send(());
    }
}

/// Receiving end of a one-shot signal pair.
///
/// Move-only and single-use: once consumed by a successful wait it must
/// never be waited on again. There is deliberately no reset; recycling for
/// performance must go through an explicit pool that hands out fresh pairs.
#[derive(Debug)]
pub struct SystemEventReceiver {
    rx: flume::Receiver<()>,
}

impl SystemEventReceiver {
    /// Creates a connected sender/receiver pair.
    #[must_use]
    pub fn new_pair() -> (SystemEventPipeSender, SystemEventReceiver) {
        let (tx, rx) = flume::bounded(1);
        (SystemEventPipeSender { tx }, SystemEventReceiver { rx })
    }

    /// Creates a receiver that is already signaled.
    #[must_use]
    pub fn signaled() -> Self {
        let (tx, rx) = flume::bounded(1);
        tx.send(()).expect("freshly created pair cannot be closed");
        SystemEventReceiver { rx }
    }

    /// Non-consuming poll: whether the signal has fired and not yet been
    /// claimed by a blocking wait.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// One slot of a [`wait_any_system_events`] call.
#[derive(Debug)]
pub struct SystemWaitEntry {
    pub receiver: SystemEventReceiver,
    pub ready: bool,
}

impl SystemWaitEntry {
    #[must_use]
    pub fn new(receiver: SystemEventReceiver) -> Self {
        Self {
            receiver,
            ready: false,
        }
    }
}

/// Blocks until any receiver in the set is signaled or the timeout elapses.
///
/// Writes each slot's `ready` flag and returns whether at least one ended up
/// set. A zero timeout polls once and returns immediately; a timeout too
/// large for the clock to represent is treated as infinite (rounds up,
/// never down). Senders dropped unsignaled are retried past like `EINTR`
/// wakeups; if every remaining sender is gone the wait fails instead of
/// blocking forever.
pub fn wait_any_system_events(entries: &mut [SystemWaitEntry], timeout: Duration) -> Result<bool> {
    if entries.is_empty() {
        return Ok(false);
    }

    // Poll pass; also the entire fast path for a zero timeout.
    let mut any = false;
    for entry in entries.iter_mut() {
        entry.ready = entry.receiver.is_signaled();
        any |= entry.ready;
    }
    if any || timeout.is_zero() {
        return Ok(any);
    }

    // None → the deadline overflows the clock, wait unbounded.
    let deadline = Instant::now().checked_add(timeout);
    let mut dead: SmallVec<[bool; 8]> = SmallVec::from_elem(false, entries.len());

    loop {
        let mut selector = Selector::new();
        let mut live = 0usize;
        for (index, entry) in entries.iter().enumerate() {
            if dead[index] {
                continue;
            }
            live += 1;
            selector = selector.recv(&entry.receiver.rx, move |res| (index, res.is_ok()));
        }
        if live == 0 {
            return Err(LockstepError::WaitFailed(
                "every signal sender was dropped before firing".to_string(),
            ));
        }

        let outcome = match deadline {
            Some(deadline) => selector.wait_deadline(deadline),
            None => Ok(selector.wait()),
        };

        match outcome {
            Ok((index, true)) => {
                // The selector consumed the message; record readiness here
                // and sweep the rest non-blockingly so simultaneous signals
                // are all reported.
                entries[index].ready = true;
                for (other, entry) in entries.iter_mut().enumerate() {
                    if other != index {
                        entry.ready = entry.receiver.is_signaled();
                    }
                }
                return Ok(true);
            }
            Ok((index, false)) => {
                // Sender dropped unsignaled; drop it from the set and retry.
                dead[index] = true;
            }
            Err(SelectError::Timeout) => {
                let mut any = false;
                for entry in entries.iter_mut() {
                    entry.ready = entry.receiver.is_signaled();
                    any |= entry.ready;
                }
                return Ok(any);
            }
        }
    }
}
