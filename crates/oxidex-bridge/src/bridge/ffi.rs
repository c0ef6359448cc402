//! C entry points.
//!
//! Handles cross this boundary as plain pointers. Functions that may raise
//! use the `C-unwind` ABI; a runtime exception escaping any other entry point
//! aborts the process.

use crate::bridge::adapter::{CallbackTable, make_adapter};
use crate::bridge::{Retained, raise, registry};
use crate::runtime::builtins::string_contents;
use crate::runtime::{ObjectPtr, autorelease, exception};
use oxidex_log::warn;
use std::ffi::{CStr, c_char, c_void};

unsafe fn name_arg<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        warn!("null name passed to the bridge");
        return None;
    }
    match unsafe { CStr::from_ptr(name) }.to_str() {
        Ok(name) => Some(name),
        Err(e) => {
            warn!("non UTF-8 name passed to the bridge: {e}");
            None
        }
    }
}

/// Resolves a class by name. Returns null if it is not registered.
///
/// # Safety
///
/// `name` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxb_resolve_class(name: *const c_char) -> *mut c_void {
    unsafe { name_arg(name) }
        .and_then(|name| registry::resolve_class(name).try_class())
        .map_or(std::ptr::null_mut(), |class| class.as_ptr())
}

/// Resolves a selector by name. Returns null only for an invalid name.
///
/// # Safety
///
/// `name` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxb_resolve_selector(name: *const c_char) -> *const c_void {
    unsafe { name_arg(name) }.map_or(std::ptr::null(), |name| {
        registry::resolve_selector(name).as_ptr()
    })
}

/// Takes a reference. Returns `obj`.
///
/// # Safety
///
/// `obj` must be null or a live object.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxb_retain(obj: *mut c_void) -> *mut c_void {
    if let Some(obj) = unsafe { ObjectPtr::from_raw(obj) } {
        unsafe { obj.retain() };
    }
    obj
}

/// Gives up a reference.
///
/// # Safety
///
/// `obj` must be null or a live object the caller holds a reference to.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxb_release(obj: *mut c_void) {
    if let Some(obj) = unsafe { ObjectPtr::from_raw(obj) } {
        unsafe { obj.release() };
    }
}

/// Moves a reference into the innermost autorelease pool. Returns `obj`.
///
/// # Safety
///
/// Same as [`oxb_release`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxb_autorelease(obj: *mut c_void) -> *mut c_void {
    if let Some(obj) = unsafe { ObjectPtr::from_raw(obj) } {
        let _ = unsafe { autorelease::autorelease(obj) };
    }
    obj
}

/// Pushes an autorelease pool and returns its token.
#[unsafe(no_mangle)]
pub extern "C" fn oxb_autorelease_pool_push() -> usize {
    autorelease::push()
}

/// Pops the pool `token` and every pool pushed after it.
///
/// # Safety
///
/// Objects in the drained pools must not have been over-released, and no
/// Rust `AutoreleasePool` guard pushed after `token` may still be in use.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxb_autorelease_pool_pop(token: usize) {
    unsafe { autorelease::pop(token) };
}

/// Calls `operation(context)`. Returns the exception it raised as a +1
/// reference, or null.
///
/// # Safety
///
/// `operation` must be safe to call with `context`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxb_try_catch(
    operation: Option<unsafe extern "C-unwind" fn(*mut c_void)>,
    context: *mut c_void,
) -> *mut c_void {
    let Some(operation) = operation else {
        warn!("oxb_try_catch called without an operation");
        return std::ptr::null_mut();
    };
    unsafe { crate::bridge::guarded_call(operation, context) }
        .map_or(std::ptr::null_mut(), Retained::into_raw)
}

/// Raises an `OxGenericException` whose reason is the contents of the
/// `OxString` `message`.
///
/// # Safety
///
/// `message` must be null or a live object.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn oxb_raise_exception(message: *mut c_void) -> ! {
    let reason = unsafe { ObjectPtr::from_raw(message).and_then(|obj| string_contents(obj)) };
    raise(reason.unwrap_or_default())
}

/// Throws `value` itself.
///
/// # Safety
///
/// `value` must be a live object.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn oxb_throw_exception(value: *mut c_void) -> ! {
    match unsafe { ObjectPtr::from_raw(value) } {
        // The caller keeps its reference; the throw carries a new one
        Some(obj) => unsafe { exception::throw(obj.retain()) },
        None => raise("nil thrown"),
    }
}

/// Creates a port delegate forwarding to `table`. Returns a +1 reference.
///
/// # Safety
///
/// Same as [`make_adapter`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxb_make_port_delegate(table: CallbackTable) -> *mut c_void {
    Retained::into_raw(unsafe { make_adapter(table) })
}
