//! Message dispatch.
//!
//! [`send_message`] is the single entry point every call goes through:
//!
//! 1. Resolve the method on the receiver's class (instance table) or on the
//!    class itself (class table), walking the inheritance chain through the
//!    per-class cache
//! 2. Check the call site's static types against the method signature
//! 3. Invoke the implementation
//! 4. Report the ownership of the returned handle
//!
//! An unknown selector or a signature mismatch raises an
//! `OxInvalidArgumentException`, which a guarded region can catch.
//!
//! The remaining functions are helpers for writing [`Imp`]s.
//!
//! [`Imp`]: crate::runtime::Imp

// Argument storage is aligned by the caller's typed locals
#![allow(clippy::cast_ptr_alignment)]

use crate::runtime::exception::{self, names};
use crate::runtime::{Class, Encoding, Method, ObjectPtr, Ownership, Selector};
use std::ffi::c_void;
use std::fmt::Write as _;

/// Target of a message send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// Send to an instance; resolves through the instance method table.
    Object(ObjectPtr),
    /// Send to a class; resolves through the class method table.
    Class(Class),
}

impl Receiver {
    /// Returns the pointer passed to the implementation as `this`.
    #[must_use]
    pub fn as_raw(self) -> *mut c_void {
        match self {
            Receiver::Object(obj) => obj.as_raw(),
            Receiver::Class(class) => class.as_ptr(),
        }
    }

    /// Resolves `selector` for this receiver.
    ///
    /// # Safety
    ///
    /// An object receiver must be alive.
    #[must_use]
    pub unsafe fn lookup(self, selector: Selector) -> Option<Method> {
        match self {
            Receiver::Object(obj) => unsafe { obj.class() }.lookup_method(selector),
            Receiver::Class(class) => class.lookup_class_method(selector),
        }
    }

    /// Formats `-[Class sel]` or `+[Class sel]`.
    unsafe fn describe(self, selector: Selector) -> String {
        match self {
            Receiver::Object(obj) => {
                format!("-[{} {}]", unsafe { obj.class() }.name(), selector)
            }
            Receiver::Class(class) => format!("+[{} {}]", class.name(), selector),
        }
    }
}

fn call_site(ret: Encoding, args: &[Encoding]) -> String {
    let mut text = format!("{ret}");
    for arg in args {
        let _ = write!(text, "{arg}");
    }
    text
}

/// Sends `selector` to `receiver`.
///
/// `ret` and `args` are the encodings of the call site's static types.
/// Returns the ownership of the returned handle as declared by the method.
///
/// # Panics
///
/// Raises an `OxInvalidArgumentException` (an unwind) if the receiver does
/// not respond to `selector` or if the types do not match its signature.
///
/// # Safety
///
/// - The receiver must be alive
/// - `arg_ptrs[i]` must point to a readable value of the type `args[i]`
///   describes
/// - `ret_ptr` must point to writable storage for the type `ret` describes
pub unsafe fn send_message(
    receiver: Receiver,
    selector: Selector,
    ret: Encoding,
    args: &[Encoding],
    arg_ptrs: &[*const c_void],
    ret_ptr: *mut c_void,
) -> Ownership {
    debug_assert_eq!(args.len(), arg_ptrs.len());

    let Some(method) = (unsafe { receiver.lookup(selector) }) else {
        let target = match receiver {
            Receiver::Object(obj) => format!("instance {:p}", obj.as_raw()),
            Receiver::Class(_) => "class".to_owned(),
        };
        exception::raise(
            names::INVALID_ARGUMENT,
            &format!(
                "{}: unrecognized selector sent to {target}",
                unsafe { receiver.describe(selector) }
            ),
        );
    };

    if !method.signature().accepts(ret, args) {
        exception::raise(
            names::INVALID_ARGUMENT,
            &format!(
                "{}: sent as `{}` but implemented as `{}`",
                unsafe { receiver.describe(selector) },
                call_site(ret, args),
                method.signature()
            ),
        );
    }

    #[cfg(feature = "dispatch-trace")]
    oxidex_log::trace!("send {}", unsafe { receiver.describe(selector) });

    unsafe { (method.imp())(receiver.as_raw(), selector, arg_ptrs.as_ptr(), ret_ptr) };
    method.ownership()
}

/// Reads argument `index` from an implementation's argument array.
///
/// # Safety
///
/// `args` must hold at least `index + 1` pointers and the pointee must be a
/// `T`.
#[must_use]
pub unsafe fn arg<T: Copy>(args: *const *const c_void, index: usize) -> T {
    unsafe { (*args.add(index)).cast::<T>().read() }
}

/// Writes an implementation's return value.
///
/// # Safety
///
/// `ret` must point to writable storage for a `T`.
pub unsafe fn set_return<T>(ret: *mut c_void, value: T) {
    unsafe { ret.cast::<T>().write(value) };
}

/// Converts an instance method's `this` into an object handle.
///
/// # Panics
///
/// Raises an `OxInvalidArgumentException` if `this` is null.
///
/// # Safety
///
/// `this` must be null or a live object pointer.
#[must_use]
pub unsafe fn receiver(this: *mut c_void) -> ObjectPtr {
    match unsafe { ObjectPtr::from_raw(this) } {
        Some(obj) => obj,
        None => exception::raise(names::INVALID_ARGUMENT, "message sent to a nil receiver"),
    }
}

/// Converts a class method's `this` into a class handle.
///
/// # Panics
///
/// Raises an `OxInvalidArgumentException` if `this` is null.
///
/// # Safety
///
/// `this` must be null or a pointer obtained from [`Class::as_ptr`].
#[must_use]
pub unsafe fn class_receiver(this: *mut c_void) -> Class {
    match unsafe { Class::from_ptr(this) } {
        Some(class) => class,
        None => exception::raise(names::INVALID_ARGUMENT, "class message sent to a nil class"),
    }
}
