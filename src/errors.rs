//! Error Types
//!
//! # Overview
//!
//! The main error type [`LockstepError`] covers the recoverable failure
//! modes of the completion core:
//! - Waits that can never be satisfied because every signal sender is gone
//! - Invalid future handles passed to the event manager
//! - Tasks that could not be handed to the worker pool
//!
//! Programmer misuse (reviving a dead reference, double-completing an
//! event, waiting on a destroyed primitive) asserts rather than surfacing
//! here. Domain errors of individual asynchronous
//! operations travel through the completion callback as
//! [`CompletionStatus::Error`](crate::event::CompletionStatus), not through
//! this type.
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, LockstepError>`.

use thiserror::Error;

use crate::event::FutureHandle;

/// The main error type for the completion core.
#[derive(Error, Debug)]
pub enum LockstepError {
    // ========================================================================
    // Signal-primitive errors
    // ========================================================================
    /// The blocking wait machinery failed in a way that is not a timeout.
    #[error("Wait failed: {0}")]
    WaitFailed(String),

    // ========================================================================
    // Event-manager errors
    // ========================================================================
    /// A future handle that was never allocated by this manager.
    #[error("Invalid future handle: {0:?}")]
    InvalidHandle(FutureHandle),

    // ========================================================================
    // Task errors
    // ========================================================================
    /// A worker task could not be handed to the pool.
    #[error("Failed to post worker task: {0}")]
    TaskPostFailed(String),
}

/// Alias for `Result<T, LockstepError>`.
pub type Result<T> = std::result::Result<T, LockstepError>;
