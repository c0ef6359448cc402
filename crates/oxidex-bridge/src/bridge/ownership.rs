//! Typed handles and the retained / not-retained return contract.
//!
//! Every runtime object seen from the bridge is a reference to some type
//! implementing [`Message`], ultimately rooted at [`Id`]. Ownership is carried
//! in the type that wraps the reference:
//!
//! - [`Retained<T>`] owns one reference and releases it on drop
//! - [`Autoreleased<'ar, T>`] borrows the innermost [`AutoreleasePool`] and
//!   must be [`retain`](Autoreleased::retain)ed to outlive it
//!
//! Trampolines pick one of the two through a [`ReturnConvention`] chosen at
//! the declaration site. The runtime reports how the called method actually
//! returned its result, and the convention reconciles the two so the caller
//! always gets exactly what the declaration promised.

use crate::runtime::autorelease;
use crate::runtime::{AutoreleasePool, MethodFamily, ObjectPtr, Ownership};
use std::ffi::c_void;
use std::fmt;
use std::marker::{PhantomData, PhantomPinned};
use std::ops::Deref;
use std::ptr::NonNull;

/// Root of every typed handle: an object of unknown class.
///
/// Never constructed by value; only ever seen behind a reference or a
/// [`Retained`] / [`Autoreleased`] wrapper. It is `!Send`, `!Sync` and
/// `!Unpin`.
#[repr(C)]
pub struct Id {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// Types that are runtime objects.
///
/// # Safety
///
/// Implementors must be zero-sized views over a runtime object, so that a
/// `&Self` is the object pointer itself. [`define_obj_type!`] upholds this.
///
/// [`define_obj_type!`]: crate::define_obj_type
pub unsafe trait Message: Sized {
    /// Returns the object pointer passed across the C boundary.
    fn as_raw(&self) -> *mut c_void {
        std::ptr::from_ref(self).cast_mut().cast()
    }

    /// Returns the untyped runtime handle.
    fn as_object(&self) -> ObjectPtr {
        ObjectPtr::from_non_null(NonNull::from(self).cast())
    }

    /// Views this object as an [`Id`].
    fn as_id(&self) -> &Id {
        // SAFETY: every Message is a view over an object, as is Id
        unsafe { &*self.as_raw().cast::<Id>() }
    }

    /// Takes an additional reference.
    fn retain(&self) -> Retained<Self> {
        // SAFETY: &self proves the object is alive
        unsafe {
            self.as_object().retain();
            Retained::from_non_null(NonNull::from(self))
        }
    }

    /// Returns the current reference count.
    fn retain_count(&self) -> usize {
        // SAFETY: &self proves the object is alive
        unsafe { self.as_object().retain_count() }
    }
}

// SAFETY: Id is the zero-sized root view
unsafe impl Message for Id {}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:p})", self.as_raw())
    }
}

/// Declares a typed handle.
///
/// ```rust
/// use oxidex_bridge::bridge::{Id, resolve_class};
/// use oxidex_bridge::define_obj_type;
///
/// define_obj_type!(
///     /// Any `OxNumber`.
///     pub Num(Id), resolve_class("OxNumber")
/// );
///
/// assert!(!Num::cls().is_null());
/// ```
///
/// The generated type is `#[repr(transparent)]` over its superclass handle
/// and dereferences to it, so every method declared on a superclass is
/// available on its subclasses. The optional class token expression adds
/// `cls()` and `try_cast()`.
#[macro_export]
macro_rules! define_obj_type {
    ($(#[$meta:meta])* $vis:vis $name:ident($super:ty), $cls:expr) => {
        $crate::define_obj_type!($(#[$meta])* $vis $name($super));

        impl $name {
            /// Returns the class token for this type.
            pub fn cls() -> $crate::bridge::ClassToken {
                $cls
            }

            /// Returns `obj` as this type if it is an instance of this class
            /// or of a subclass.
            pub fn try_cast(obj: &$crate::bridge::Id) -> ::std::option::Option<&Self> {
                let class = Self::cls().try_class()?;
                let object = $crate::bridge::Message::as_object(obj);
                // SAFETY: &Id proves the object is alive
                let is_kind = unsafe { object.class() }.is_subclass_of(class);
                // SAFETY: Self is a transparent view over the same object
                is_kind.then(|| unsafe { &*::std::ptr::from_ref(obj).cast::<Self>() })
            }
        }
    };
    ($(#[$meta:meta])* $vis:vis $name:ident($super:ty)) => {
        $(#[$meta])*
        #[repr(transparent)]
        $vis struct $name($super);

        impl ::std::ops::Deref for $name {
            type Target = $super;

            fn deref(&self) -> &$super {
                &self.0
            }
        }

        // SAFETY: transparent over another zero-sized object view
        unsafe impl $crate::bridge::Message for $name {}

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(
                    f,
                    "{}({:p})",
                    stringify!($name),
                    $crate::bridge::Message::as_raw(self)
                )
            }
        }
    };
}

/// An owned reference to a runtime object.
///
/// Dropping it releases the reference; cloning takes another one.
#[repr(transparent)]
pub struct Retained<T: Message> {
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

impl<T: Message> Retained<T> {
    /// Adopts a +1 reference.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live `T` whose reference the caller owns.
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Retained<T>> {
        NonNull::new(ptr.cast::<T>()).map(|ptr| unsafe { Retained::from_non_null(ptr) })
    }

    /// Retains a +0 reference.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live `T`.
    #[must_use]
    pub unsafe fn retain_raw(ptr: *mut c_void) -> Option<Retained<T>> {
        let ptr = NonNull::new(ptr.cast::<T>())?;
        unsafe {
            ObjectPtr::from_non_null(ptr.cast()).retain();
            Some(Retained::from_non_null(ptr))
        }
    }

    /// Adopts a +1 runtime handle.
    pub(crate) unsafe fn from_object(object: ObjectPtr) -> Retained<T> {
        unsafe { Retained::from_non_null(object.as_non_null().cast()) }
    }

    pub(crate) unsafe fn from_non_null(ptr: NonNull<T>) -> Retained<T> {
        Retained {
            ptr,
            _owns: PhantomData,
        }
    }

    /// Gives up ownership without releasing.
    #[must_use]
    pub fn into_raw(this: Retained<T>) -> *mut c_void {
        let ptr = this.ptr;
        std::mem::forget(this);
        ptr.as_ptr().cast()
    }

    /// Returns the object pointer without giving up ownership.
    #[must_use]
    pub fn as_ptr(this: &Retained<T>) -> *mut c_void {
        this.ptr.as_ptr().cast()
    }

    /// Hands the reference to `pool`.
    ///
    /// # Panics
    ///
    /// Panics if `pool` is not the innermost pool on this thread.
    #[must_use]
    #[track_caller]
    pub fn autorelease<'ar>(this: Retained<T>, pool: &'ar AutoreleasePool) -> Autoreleased<'ar, T> {
        pool.assert_innermost();
        let ptr = this.ptr;
        // SAFETY: the owned reference moves into the pool
        unsafe { autorelease::autorelease(ObjectPtr::from_non_null(ptr.cast())) };
        std::mem::forget(this);
        Autoreleased::new(ptr)
    }

    /// Reinterprets the handle as another object type.
    ///
    /// # Safety
    ///
    /// The object must be an instance of `U`'s class.
    #[must_use]
    pub unsafe fn cast<U: Message>(this: Retained<T>) -> Retained<U> {
        let ptr = this.ptr.cast::<U>();
        std::mem::forget(this);
        unsafe { Retained::from_non_null(ptr) }
    }

    /// Upcasts to [`Id`].
    #[must_use]
    pub fn into_id(this: Retained<T>) -> Retained<Id> {
        // SAFETY: every object is an Id
        unsafe { Retained::cast(this) }
    }
}

impl<T: Message> Drop for Retained<T> {
    fn drop(&mut self) {
        // SAFETY: we own one reference
        unsafe { ObjectPtr::from_non_null(self.ptr.cast()).release() };
    }
}

impl<T: Message> Clone for Retained<T> {
    fn clone(&self) -> Self {
        Message::retain(&**self)
    }
}

impl<T: Message> Deref for Retained<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the owned reference keeps the object alive
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Message> PartialEq for Retained<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T: Message> Eq for Retained<T> {}

impl<T: Message + fmt::Debug> fmt::Debug for Retained<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// A reference borrowed from an autorelease pool.
///
/// `'ar` is a borrow of the [`AutoreleasePool`] guard the object went into,
/// so the handle cannot outlive the drain:
///
/// ```compile_fail
/// use oxidex_bridge::bridge::{Autoreleased, Number};
/// use oxidex_bridge::runtime::AutoreleasePool;
///
/// let escaped: Autoreleased<'_, Number> = {
///     let pool = AutoreleasePool::new();
///     Number::with_integer(&pool, 7).unwrap()
/// };
/// ```
pub struct Autoreleased<'ar, T: Message> {
    ptr: NonNull<T>,
    _pool: PhantomData<&'ar T>,
}

impl<'ar, T: Message> Autoreleased<'ar, T> {
    fn new(ptr: NonNull<T>) -> Self {
        Autoreleased {
            ptr,
            _pool: PhantomData,
        }
    }

    /// Wraps a +0 reference.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a `T` that stays alive for `'ar`.
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr.cast::<T>()).map(Autoreleased::new)
    }

    /// Takes an owned reference that outlives the pool.
    #[must_use]
    pub fn retain(self) -> Retained<T> {
        Message::retain(&*self)
    }

    /// Returns the object pointer.
    #[must_use]
    pub fn as_ptr(self) -> *mut c_void {
        self.ptr.as_ptr().cast()
    }
}

impl<T: Message> Clone for Autoreleased<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Message> Copy for Autoreleased<'_, T> {}

impl<T: Message> Deref for Autoreleased<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the pool keeps the object alive for 'ar
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Message + fmt::Debug> fmt::Debug for Autoreleased<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// The ownership a trampoline promises for its handle result.
pub trait ReturnConvention {
    /// The tag recorded for this convention.
    const TAG: Ownership;

    /// What the caller receives for a non-null `T`.
    type Output<'ar, T: Message + 'ar>;

    /// What the caller supplies for the result to live in.
    type Scope<'ar>: Copy;

    /// Checks `scope` before the send.
    #[track_caller]
    fn check_scope(_scope: Self::Scope<'_>) {}

    /// Converts a result the method returned with `native` ownership.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live `T`. If `native` is `Retained` the caller must
    /// own that reference, which is consumed. If `native` is `NotRetained`
    /// the object must sit in the pool `scope` names.
    unsafe fn adopt<'ar, T: Message + 'ar>(
        ptr: NonNull<T>,
        native: Ownership,
        scope: Self::Scope<'ar>,
    ) -> Self::Output<'ar, T>;
}

/// The caller receives a +1 reference ([`Retained`]).
#[derive(Debug)]
pub enum ReturnsRetained {}

/// The caller receives a pool-owned reference ([`Autoreleased`]).
#[derive(Debug)]
pub enum ReturnsNotRetained {}

impl ReturnConvention for ReturnsRetained {
    const TAG: Ownership = Ownership::Retained;

    type Output<'ar, T: Message + 'ar> = Retained<T>;

    type Scope<'ar> = ();

    unsafe fn adopt<'ar, T: Message + 'ar>(ptr: NonNull<T>, native: Ownership, _: ()) -> Retained<T> {
        if native == Ownership::NotRetained {
            unsafe { ObjectPtr::from_non_null(ptr.cast()).retain() };
        }
        unsafe { Retained::from_non_null(ptr) }
    }
}

impl ReturnConvention for ReturnsNotRetained {
    const TAG: Ownership = Ownership::NotRetained;

    type Output<'ar, T: Message + 'ar> = Autoreleased<'ar, T>;

    type Scope<'ar> = &'ar AutoreleasePool;

    #[track_caller]
    fn check_scope(pool: &AutoreleasePool) {
        pool.assert_innermost();
    }

    unsafe fn adopt<'ar, T: Message + 'ar>(
        ptr: NonNull<T>,
        native: Ownership,
        _pool: &'ar AutoreleasePool,
    ) -> Autoreleased<'ar, T> {
        if native == Ownership::Retained {
            unsafe { autorelease::autorelease(ObjectPtr::from_non_null(ptr.cast())) };
        }
        Autoreleased::new(ptr)
    }
}

/// Call shape of a trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Message to a class token.
    Class,
    /// Accessor on a receiver.
    Read,
    /// Mutator on a receiver; result ignored.
    Write,
    /// Getter and chaining setter pair.
    ReadWrite,
    /// `alloc` followed by an initializer.
    Allocate,
}

/// One row of an ownership table: a declared trampoline and its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instantiation {
    pub class: &'static str,
    pub selector: &'static str,
    pub shape: Shape,
    pub arity: usize,
    /// `None` for trampolines that do not return a handle.
    pub tag: Option<Ownership>,
}

impl Instantiation {
    pub const fn new(
        class: &'static str,
        selector: &'static str,
        shape: Shape,
        arity: usize,
        tag: Option<Ownership>,
    ) -> Self {
        Instantiation {
            class,
            selector,
            shape,
            arity,
            tag,
        }
    }

    /// The tag the naming convention would give this trampoline.
    #[must_use]
    pub fn conventional_tag(&self) -> Ownership {
        match self.shape {
            Shape::Allocate => Ownership::Retained,
            _ => MethodFamily::conventional_ownership(self.selector),
        }
    }

    /// Returns `true` unless the declared tag departs from the convention.
    #[must_use]
    pub fn is_conventional(&self) -> bool {
        self.tag.is_none_or(|tag| tag == self.conventional_tag())
    }
}

/// Returns the rows whose declared tag deviates from the naming convention.
///
/// Deviations are not errors; the table is authoritative. This keeps the
/// overrides visible so they can be reviewed and pinned by tests.
#[must_use]
pub fn review(table: &[Instantiation]) -> Vec<&Instantiation> {
    table.iter().filter(|row| !row.is_conventional()).collect()
}
