//! Object allocation and lifecycle management for the runtime.
//!
//! This module implements:
//! - Reference counting with atomic operations
//! - Manual retain/release on raw handles
//! - Class isa pointers for dynamic dispatch
//! - An optional immutable payload that initializers attach once
//! - Clearing of [`WeakRef`](crate::runtime::WeakRef)s on deallocation
//!
//! # Architecture
//!
//! Objects are heap-allocated and manually managed:
//! - Each object starts with a reference count of 1
//! - The object is freed when the count reaches 0
//! - [`ObjectPtr`] is a plain `Copy` handle that does not own a reference;
//!   ownership is tracked by whoever holds it (see [`Ownership`])
//!
//! # Thread Safety
//!
//! retain/release are atomic and safe from any thread. Payloads are
//! `Send + Sync` and set at most once.

use crate::runtime::{Class, weak};
use oxidex_log::trace;
use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Upper bound on the reference count before we treat it as corruption.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Who owes the release of a returned handle.
///
/// - `Retained`: the result carries one reference that the receiver of the
///   result must release (methods in the `alloc`, `new`, `copy`,
///   `mutableCopy` and `init` families).
/// - `NotRetained`: the result is borrowed from an autorelease pool or from
///   its owner and stays valid at least until the current pool drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    Retained,
    NotRetained,
}

impl Ownership {
    /// Returns the conventional keyword used in declarations.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Ownership::Retained => "retained",
            Ownership::NotRetained => "not_retained",
        }
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw object representation allocated on the heap.
pub(crate) struct RawObject {
    /// Class this object is an instance of
    isa: Class,
    /// Starts at 1, freed when it reaches 0
    refcount: AtomicUsize,
    /// Instance state, attached once by an initializer
    payload: OnceLock<Box<dyn Any + Send + Sync>>,
    /// Set once a weak reference has named this object
    weakly_referenced: AtomicBool,
}

/// Handle to a live runtime object.
///
/// `ObjectPtr` does **not** own a reference. Every method that touches the
/// object is `unsafe` because the caller must guarantee the object is still
/// alive, i.e. that somebody holds a reference for the duration of the call.
///
/// # Representation
///
/// `#[repr(transparent)]` over a non-null pointer; crosses the C ABI as a
/// plain object pointer.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectPtr(NonNull<RawObject>);

impl ObjectPtr {
    /// Allocates a new instance of `class` with a reference count of 1.
    ///
    /// The caller owns the returned reference.
    ///
    /// # Example
    ///
    /// ```rust
    /// use oxidex_bridge::runtime::{self, Class, ObjectPtr};
    ///
    /// runtime::init();
    /// let class = Class::get("OxObject").unwrap();
    /// let obj = ObjectPtr::alloc(class);
    /// unsafe {
    ///     assert_eq!(obj.retain_count(), 1);
    ///     assert_eq!(obj.class(), class);
    ///     obj.release();
    /// }
    /// ```
    #[must_use]
    pub fn alloc(class: Class) -> ObjectPtr {
        let raw = Box::new(RawObject {
            isa: class,
            refcount: AtomicUsize::new(1),
            payload: OnceLock::new(),
            weakly_referenced: AtomicBool::new(false),
        });
        let ptr = ObjectPtr(NonNull::from(Box::leak(raw)));
        trace!("alloc {} {:p}", class.name(), ptr.as_raw());
        ptr
    }

    /// Wraps a non-null object pointer.
    #[must_use]
    pub const fn from_non_null(ptr: NonNull<c_void>) -> ObjectPtr {
        ObjectPtr(ptr.cast())
    }

    /// Wraps a raw object pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to an object created by [`ObjectPtr::alloc`].
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<ObjectPtr> {
        NonNull::new(ptr.cast()).map(ObjectPtr)
    }

    /// Returns the raw pointer used at the C boundary.
    #[must_use]
    pub fn as_raw(self) -> *mut c_void {
        self.0.as_ptr().cast()
    }

    /// Returns the object pointer as a `NonNull`.
    #[must_use]
    pub const fn as_non_null(self) -> NonNull<c_void> {
        self.0.cast()
    }

    fn raw<'a>(self) -> &'a RawObject {
        // SAFETY: callers of the public unsafe methods guarantee liveness
        unsafe { self.0.as_ref() }
    }

    /// Returns the object's class.
    ///
    /// # Safety
    ///
    /// The object must be alive.
    #[must_use]
    pub unsafe fn class(self) -> Class {
        self.raw().isa
    }

    /// Increments the reference count and returns the same handle.
    ///
    /// # Safety
    ///
    /// The object must be alive.
    pub unsafe fn retain(self) -> ObjectPtr {
        let old = self.raw().refcount.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            // Same policy as Arc: a wrapped count would free a live object
            std::process::abort();
        }
        self
    }

    /// Retains the object unless its last reference is already gone.
    ///
    /// # Safety
    ///
    /// The object's memory must not have been freed yet.
    pub(crate) unsafe fn try_retain(self) -> bool {
        let refcount = &self.raw().refcount;
        let mut current = refcount.load(Ordering::Relaxed);
        while current != 0 {
            match refcount.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Records that a weak reference names this object.
    ///
    /// # Safety
    ///
    /// The object must be alive.
    pub(crate) unsafe fn mark_weakly_referenced(self) {
        self.raw().weakly_referenced.store(true, Ordering::Relaxed);
    }

    /// Decrements the reference count, freeing the object when it hits zero.
    ///
    /// # Safety
    ///
    /// The caller must own one reference to the object and must not use the
    /// handle afterwards unless it holds another reference.
    pub unsafe fn release(self) {
        if self.raw().refcount.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        std::sync::atomic::fence(Ordering::Acquire);

        trace!("dealloc {} {:p}", self.raw().isa.name(), self.as_raw());
        if self.raw().weakly_referenced.load(Ordering::Relaxed) {
            weak::clear(self);
        }
        // SAFETY: the pointer came from Box::leak in alloc and this was the
        // last reference
        unsafe { drop(Box::from_raw(self.0.as_ptr())) };
    }

    /// Returns the current reference count.
    ///
    /// # Safety
    ///
    /// The object must be alive.
    #[must_use]
    pub unsafe fn retain_count(self) -> usize {
        self.raw().refcount.load(Ordering::Acquire)
    }

    /// Returns the payload if one of type `T` has been attached.
    ///
    /// # Safety
    ///
    /// The object must stay alive for `'a`.
    #[must_use]
    pub unsafe fn payload<'a, T: Any>(self) -> Option<&'a T> {
        self.raw().payload.get()?.downcast_ref::<T>()
    }

    /// Attaches `value` as the object's payload.
    ///
    /// Returns `false` and drops `value` if a payload is already attached.
    ///
    /// # Safety
    ///
    /// The object must be alive.
    pub unsafe fn set_payload<T: Any + Send + Sync>(self, value: T) -> bool {
        self.raw().payload.set(Box::new(value)).is_ok()
    }
}

impl fmt::Debug for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Class and count are not read: the handle may be dangling
        write!(f, "ObjectPtr({:p})", self.as_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn root() -> Class {
        runtime::init();
        Class::get("OxObject").unwrap()
    }

    #[test]
    fn test_retain_release_balance() {
        let obj = ObjectPtr::alloc(root());
        unsafe {
            assert_eq!(obj.retain_count(), 1);
            obj.retain();
            obj.retain();
            assert_eq!(obj.retain_count(), 3);
            obj.release();
            obj.release();
            assert_eq!(obj.retain_count(), 1);
            obj.release();
        }
    }

    #[test]
    fn test_last_release_drops_payload() {
        let dropped = Arc::new(AtomicBool::new(false));
        let obj = ObjectPtr::alloc(root());
        unsafe {
            assert!(obj.set_payload(DropFlag(dropped.clone())));
            obj.retain();
            obj.release();
            assert!(!dropped.load(Ordering::SeqCst));
            obj.release();
        }
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_payload_set_once_and_typed() {
        let obj = ObjectPtr::alloc(root());
        unsafe {
            assert!(obj.payload::<u32>().is_none());
            assert!(obj.set_payload(7u32));
            assert!(!obj.set_payload(8u32));
            assert_eq!(obj.payload::<u32>(), Some(&7));
            assert!(obj.payload::<i64>().is_none());
            obj.release();
        }
    }

    #[test]
    fn test_raw_round_trip() {
        let obj = ObjectPtr::alloc(root());
        let back = unsafe { ObjectPtr::from_raw(obj.as_raw()) };
        assert_eq!(back, Some(obj));
        assert!(unsafe { ObjectPtr::from_raw(std::ptr::null_mut()) }.is_none());
        unsafe { obj.release() };
    }

    #[test]
    fn test_concurrent_retain_release() {
        let obj = ObjectPtr::alloc(root());
        let addr = obj.as_raw() as usize;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(move || {
                    let obj = unsafe { ObjectPtr::from_raw(addr as *mut c_void) }.unwrap();
                    for _ in 0..1000 {
                        unsafe {
                            obj.retain();
                            obj.release();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        unsafe {
            assert_eq!(obj.retain_count(), 1);
            obj.release();
        }
    }

    #[test]
    fn test_ownership_display() {
        assert_eq!(Ownership::Retained.to_string(), "retained");
        assert_eq!(Ownership::NotRetained.to_string(), "not_retained");
    }
}
