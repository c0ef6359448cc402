//! Exception bridge.
//!
//! Runtime exceptions unwind the stack. At a guarded boundary the unwind is
//! stopped and the thrown object comes back as a value the caller owns:
//!
//! - [`try_catch`] for closures, used by `guarded` trampolines
//! - [`guarded_call`] for a C function pointer plus context
//!
//! Panics that are not runtime exceptions keep unwinding through both.

use crate::bridge::{Id, Message, Retained};
use crate::runtime::builtins::{self, exception_info, new_exception, new_string, string_contents};
use crate::runtime::exception::{self, names};
use oxidex_log::debug;
use std::ffi::c_void;

/// Runs `f`, returning any runtime exception it raises as `Err`.
///
/// Autorelease pools pushed inside `f` are drained while unwinding.
///
/// ```rust
/// use oxidex_bridge::bridge::{exception_message, raise, try_catch};
///
/// let err = try_catch(|| -> () { raise("disk full") }).unwrap_err();
/// assert_eq!(exception_message(&err).as_deref(), Some("disk full"));
/// ```
pub fn try_catch<R>(f: impl FnOnce() -> R) -> Result<R, Retained<Id>> {
    // SAFETY: catch hands over the thrown +1 reference
    exception::catch(f).map_err(|object| unsafe { Retained::from_object(object) })
}

/// Calls `operation(context)` and returns the exception it raised, if any.
///
/// # Safety
///
/// `operation` must be safe to call with `context`.
pub unsafe fn guarded_call(
    operation: unsafe extern "C-unwind" fn(*mut c_void),
    context: *mut c_void,
) -> Option<Retained<Id>> {
    let result = try_catch(|| unsafe { operation(context) });
    if let Err(ref exception) = result {
        debug!(
            "guarded call {:p} raised {:p}",
            operation as *const (),
            exception.as_raw()
        );
    }
    result.err()
}

/// Raises an `OxGenericException` whose reason is `message`.
pub fn raise(message: &str) -> ! {
    exception::raise(names::GENERIC, message)
}

/// Throws an `OxString` holding `message` rather than an exception object.
pub fn throw_value(message: &str) -> ! {
    // SAFETY: new_string returns a +1 reference that the throw consumes
    unsafe { exception::throw(new_string(message)) }
}

/// Returns the reason of a caught exception, or the contents of a thrown
/// string. `None` for any other object.
#[must_use]
pub fn exception_message(thrown: &Id) -> Option<String> {
    let object = thrown.as_object();
    // SAFETY: &Id keeps the object alive for this call
    unsafe {
        if let Some(info) = exception_info(object) {
            return Some(info.reason.to_string());
        }
        string_contents(object).map(str::to_owned)
    }
}

/// Creates an exception object without raising it.
#[must_use]
pub fn new_exception_object(name: &str, reason: &str) -> Retained<Id> {
    // SAFETY: new_exception returns a live +1 reference
    unsafe { Retained::from_object(new_exception(name, reason)) }
}

/// Returns `true` if `thrown` is an `OxException`.
#[must_use]
pub fn is_exception(thrown: &Id) -> bool {
    // SAFETY: &Id keeps the object alive for this call
    let class = unsafe { thrown.as_object().class() };
    class.is_subclass_of(builtins::builtins().exception)
}
