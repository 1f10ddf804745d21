//! Mutex-Protected Values
//!
//! A mutex bundled with the value it guards, so the value is reachable only
//! through a scoped guard produced while the lock is held. "Forgot to lock"
//! is thereby unrepresentable: there is no access path that does not go
//! through a [`Guard`], and the guard unlocks on drop.
//!
//! Three variants:
//! - [`MutexProtected<T>`]: the plain form, over `parking_lot::Mutex`.
//! - [`SharedMutexProtected<T>`]: the refcounted form, whose guard keeps the
//!   mutex cell alive even if the owning container is torn down while the
//!   guard is outstanding.
//! - [`RecursiveMutexProtected<T>`]: explicit opt-in re-entrant locking for
//!   the rare lock that is entered recursively from the same thread.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use parking_lot::lock_api::RawMutex as _;
use parking_lot::{Mutex, MutexGuard, RawMutex, ReentrantMutex, ReentrantMutexGuard};

use crate::ref_count::{Ref, RefCount, RefCounted};

/// A value that can only be touched while its mutex is held.
pub struct MutexProtected<T> {
    inner: Mutex<T>,
}

/// Scoped access token for a [`MutexProtected`] value.
///
/// Move-only; moving transfers lock ownership without re-locking, and the
/// lock is released exactly when the guard is dropped.
pub struct Guard<'a, T> {
    inner: MutexGuard<'a, T>,
}

impl<T> MutexProtected<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquires the lock and returns the only access path to the value.
    pub fn lock(&self) -> Guard<'_, T> {
        Guard {
            inner: self.inner.lock(),
        }
    }

    /// Runs `f` with the lock held, returning its result.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    /// Consumes the wrapper, yielding the inner value without locking.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for MutexProtected<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Deref for Guard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for Guard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

// ============================================================================
// Refcounted variant
// ============================================================================

/// Refcounted cell pairing a raw mutex with the value it guards.
///
/// The cell, not the container, owns both; guards hold a [`Ref`] to it, so
/// the mutex outlives any container that is destroyed mid-critical-section
/// on another thread.
struct SharedMutexCell<T> {
    refs: RefCount,
    lock: RawMutex,
    value: UnsafeCell<T>,
}

impl<T> RefCounted for SharedMutexCell<T> {
    fn ref_count(&self) -> &RefCount {
        &self.refs
    }
}

// Access to `value` is serialized by `lock`.
unsafe impl<T: Send> Send for SharedMutexCell<T> {}
unsafe impl<T: Send> Sync for SharedMutexCell<T> {}

/// [`MutexProtected`] whose mutex is itself reference-counted.
pub struct SharedMutexProtected<T: Send + 'static> {
    cell: Ref<SharedMutexCell<T>>,
}

/// Owning guard for a [`SharedMutexProtected`] value.
///
/// Holds both the lock and a strong reference to the mutex cell.
pub struct SharedGuard<T: Send + 'static> {
    cell: Ref<SharedMutexCell<T>>,
}

impl<T: Send + 'static> SharedMutexProtected<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            cell: Ref::new(SharedMutexCell {
                refs: RefCount::new(1, 0),
                lock: RawMutex::INIT,
                value: UnsafeCell::new(value),
            }),
        }
    }

    /// Acquires the lock; the guard keeps the mutex alive on its own.
    pub fn lock(&self) -> SharedGuard<T> {
        self.cell.lock.lock();
        SharedGuard {
            cell: self.cell.clone(),
        }
    }

    /// Runs `f` with the lock held, returning its result.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }
}

impl<T: Send + 'static> Clone for SharedMutexProtected<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Send + 'static> Deref for SharedGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // Invariant: the guard constructor locked the cell's mutex.
        unsafe { &*self.cell.value.get() }
    }
}

impl<T: Send + 'static> DerefMut for SharedGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.cell.value.get() }
    }
}

impl<T: Send + 'static> Drop for SharedGuard<T> {
    fn drop(&mut self) {
        // The guard was constructed with the lock held.
        unsafe { self.cell.lock.unlock() }
    }
}

// ============================================================================
// Recursive variant
// ============================================================================

/// Mutex-protected value whose lock may be re-entered by the holding thread.
///
/// Used only where nested acquisition from the same thread is a documented
/// requirement; the plain [`MutexProtected`] deadlocks on re-entry.
/// Because nested holders alias the value, access is shared:
/// mutation goes through interior mutability inside `T` (`Cell`, atomics).
pub struct RecursiveMutexProtected<T> {
    inner: ReentrantMutex<T>,
}

/// Scoped access token for a [`RecursiveMutexProtected`] value.
pub struct RecursiveGuard<'a, T> {
    inner: ReentrantMutexGuard<'a, T>,
}

impl<T> RecursiveMutexProtected<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: ReentrantMutex::new(value),
        }
    }

    /// Acquires the lock; re-entrant calls from the holding thread nest
    /// rather than deadlock.
    pub fn lock(&self) -> RecursiveGuard<'_, T> {
        RecursiveGuard {
            inner: self.inner.lock(),
        }
    }

    /// Runs `f` with the lock held, returning its result.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.inner.lock())
    }
}

impl<T> Deref for RecursiveGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}
