//! Waitable Events and Future Tracking
//!
//! The completion machinery, leaves first:
//! - system.rs: one-shot signal pairs and the any-of-N blocking primitive
//! - wait_list.rs: refcounted many-waiter one-shot events
//! - tracked.rs: per-operation completion state and the exactly-once callback
//! - manager.rs: the future registry (track / poll / wait-any / shutdown)

mod manager;
mod system;
mod tracked;
mod wait_list;

pub use manager::{EventManager, FutureHandle, WaitRequest, WaitStatus};
pub use system::{
    SystemEventPipeSender, SystemEventReceiver, SystemWaitEntry, WaitableEvent,
    wait_any_system_events,
};
pub use tracked::{
    CallbackMode, CompletionKind, CompletionSource, CompletionStatus, QueueCompletion,
    TrackedEvent,
};
pub use wait_list::{WaitEntry, WaitListEvent};
