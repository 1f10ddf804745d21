//! Intrusive Atomic Reference Counting
//!
//! Every lifetime-managed object in the crate embeds a [`RefCount`] and is
//! handed out through [`Ref<T>`], an owning smart handle: every clone
//! increments, every drop decrements, and the last decrement destroys the
//! object on whichever thread performed it.
//!
//! The count shares one `AtomicU64` with a small immutable payload tag:
//! the low 48 bits hold the count, the high bits hold the payload. The payload is set at construction and never changes, so
//! increments and decrements cannot disturb it.

use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering, fence};

/// Number of low bits reserved for the reference count itself.
const PAYLOAD_SHIFT: u32 = 48;
const COUNT_MASK: u64 = (1 << PAYLOAD_SHIFT) - 1;
/// Payload values must fit in the bits above the count.
const PAYLOAD_MAX: u64 = (1 << (u64::BITS - PAYLOAD_SHIFT)) - 1;

/// Atomic reference count with an attached immutable payload tag.
///
/// The counter itself is lock-free and safe under unbounded concurrent
/// increments and decrements. Incrementing a count that is already zero is
/// a use-after-free in the making; [`RefCount::increment`] reports it so
/// callers can treat it as a fatal logic error rather than resurrect the
/// object. [`RefCount::try_increment`] is the non-fatal form used to
/// promote a weak observation of a raw pointer to a strong reference.
pub struct RefCount {
    value: AtomicU64,
}

impl RefCount {
    /// Creates a counter with an explicit initial count and payload tag.
    ///
    /// # Panics
    ///
    /// Panics if `payload` does not fit in the payload bits.
    #[must_use]
    pub fn new(initial: u64, payload: u64) -> Self {
        assert!(initial <= COUNT_MASK, "initial refcount out of range");
        assert!(payload <= PAYLOAD_MAX, "refcount payload out of range");
        Self {
            value: AtomicU64::new((payload << PAYLOAD_SHIFT) | initial),
        }
    }

    /// Atomically adds one reference.
    ///
    /// Returns `true` iff the previous count was zero, i.e. the caller just
    /// resurrected a dead object. Callers must treat that as a programmer
    /// error; [`Ref::retain`] asserts on it in debug builds.
    #[inline]
    pub fn increment(&self) -> bool {
        // A thread can only legally increment while it already holds a
        // reference, so Relaxed is enough here.
        let previous = self.value.fetch_add(1, Ordering::Relaxed);
        previous & COUNT_MASK == 0
    }

    /// Attempts to add one reference, failing instead of resurrecting.
    ///
    /// Returns `false` (and does not increment) if the count was observed
    /// at zero, meaning another thread is concurrently destroying the
    /// object. This is the only safe way to upgrade a raw pointer that is
    /// not already covered by a strong reference.
    #[inline]
    pub fn try_increment(&self) -> bool {
        self.value
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |current| {
                if current & COUNT_MASK == 0 {
                    None
                } else {
                    Some(current + 1)
                }
            })
            .is_ok()
    }

    /// Atomically removes one reference.
    ///
    /// Returns `true` iff this was the last reference; the caller is then
    /// responsible for destroying the object, exactly once.
    #[inline]
    #[must_use]
    pub fn decrement(&self) -> bool {
        // Release orders this thread's writes before the destruction that
        // the last decrementer performs; the Acquire fence below makes
        // those writes visible to it.
        let previous = self.value.fetch_sub(1, Ordering::Release);
        debug_assert!(previous & COUNT_MASK != 0, "refcount underflow");
        if previous & COUNT_MASK == 1 {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Current count. Approximate under concurrency; exact once quiescent.
    #[inline]
    #[must_use]
    pub fn count(&self) -> u64 {
        self.value.load(Ordering::Relaxed) & COUNT_MASK
    }

    /// The immutable payload tag supplied at construction.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> u64 {
        self.value.load(Ordering::Relaxed) >> PAYLOAD_SHIFT
    }
}

impl fmt::Debug for RefCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCount")
            .field("count", &self.count())
            .field("payload", &self.payload())
            .finish()
    }
}

/// Implemented by every type whose lifetime is managed by [`Ref<T>`].
///
/// The embedded [`RefCount`] must be constructed with an initial count of 1,
/// attributed to the first `Ref` created by [`Ref::new`].
pub trait RefCounted {
    fn ref_count(&self) -> &RefCount;
}

/// Owning smart handle over a [`RefCounted`] object.
///
/// If the handle exists, at least one reference is attributed to it; the
/// empty state is expressed as `Option<Ref<T>>`. Cloning increments,
/// dropping decrements, and the final drop destroys the object.
pub struct Ref<T: RefCounted> {
    ptr: NonNull<T>,
}

// Ref hands out &T across threads and the last drop may destroy on any
// thread, so T must be both Send and Sync for either capability.
unsafe impl<T: RefCounted + Send + Sync> Send for Ref<T> {}
unsafe impl<T: RefCounted + Send + Sync> Sync for Ref<T> {}

impl<T: RefCounted> Ref<T> {
    /// Boxes a freshly constructed object and adopts its initial reference.
    #[must_use]
    pub fn new(value: T) -> Self {
        debug_assert!(
            value.ref_count().count() >= 1,
            "RefCounted objects must be constructed with an initial count of 1"
        );
        Self {
            ptr: NonNull::from(Box::leak(Box::new(value))),
        }
    }

    /// Creates an additional owning handle from a live reference.
    #[must_use]
    pub fn retain(object: &T) -> Self {
        let resurrected = object.ref_count().increment();
        debug_assert!(!resurrected, "retained an object with a zero refcount");
        Self {
            ptr: NonNull::from(object),
        }
    }

    /// Attempts to promote a possibly-dying reference to an owning handle.
    ///
    /// Returns `None` if the count was observed at zero, i.e. another
    /// thread already owns the destruction of the object.
    #[must_use]
    pub fn try_retain(object: &T) -> Option<Self> {
        if object.ref_count().try_increment() {
            Some(Self {
                ptr: NonNull::from(object),
            })
        } else {
            None
        }
    }

    /// Yields the raw pointer without decrementing, transferring ownership
    /// of one reference to the caller. Balance with [`Ref::acquire`].
    #[must_use]
    pub fn detach(self) -> *const T {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    /// Adopts a reference previously released through [`Ref::detach`],
    /// without incrementing.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from [`Ref::detach`] (or [`Ref::new`]'s
    /// allocation) and carry exactly one unclaimed reference.
    #[must_use]
    pub unsafe fn acquire(ptr: *const T) -> Self {
        Self {
            ptr: NonNull::new(ptr.cast_mut()).expect("acquired a null pointer"),
        }
    }

    /// Stable address of the pointee, usable as an identity key.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Whether two handles refer to the same object.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }
}

impl<T: RefCounted> Deref for Ref<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // Invariant: the handle holds a reference, so the pointee is alive.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: RefCounted> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self::retain(self)
    }
}

impl<T: RefCounted> Drop for Ref<T> {
    fn drop(&mut self) {
        if self.ref_count().decrement() {
            // Last reference; this thread destroys the object.
            unsafe { drop(Box::from_raw(self.ptr.as_ptr())) }
        }
    }
}

impl<T: RefCounted> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T: RefCounted> Eq for Ref<T> {}

impl<T: RefCounted + fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&**self).finish()
    }
}
