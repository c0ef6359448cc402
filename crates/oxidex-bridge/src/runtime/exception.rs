//! Runtime exceptions.
//!
//! Any object can be thrown. A throw unwinds the stack with a [`Thrown`]
//! payload that owns one reference to the object; [`catch`] stops the unwind
//! and hands that reference to the caller. Panics that are not runtime
//! exceptions pass through `catch` untouched.
//!
//! Method implementations use the `C-unwind` ABI, so a throw inside a method
//! travels back through the send. Crossing a plain `extern "C"` frame aborts
//! the process, which is how uncaught exceptions stay fatal.

use crate::runtime::{ObjectPtr, builtins};
use oxidex_log::debug;
use std::mem::ManuallyDrop;
use std::panic::{self, AssertUnwindSafe};

/// Names of the exceptions the runtime raises itself.
pub mod names {
    /// Raised by `raise` with a caller-supplied reason.
    pub const GENERIC: &str = "OxGenericException";
    /// Raised for unknown selectors and signature mismatches.
    pub const INVALID_ARGUMENT: &str = "OxInvalidArgumentException";
}

/// Unwind payload carrying a thrown object.
pub struct Thrown(ObjectPtr);

// SAFETY: object reference counts are atomic and the payload only moves the
// owned reference across the unwind
unsafe impl Send for Thrown {}

impl Thrown {
    /// Returns the thrown object without giving up ownership.
    #[must_use]
    pub fn object(&self) -> ObjectPtr {
        self.0
    }

    fn into_object(self) -> ObjectPtr {
        ManuallyDrop::new(self).0
    }
}

impl Drop for Thrown {
    fn drop(&mut self) {
        // Reached when a non-catching frame discards the payload
        unsafe { self.0.release() };
    }
}

/// Throws `value`, consuming one reference to it.
///
/// # Safety
///
/// The caller must own the reference being transferred.
pub unsafe fn throw(value: ObjectPtr) -> ! {
    debug!(
        "throwing {} {:p}",
        unsafe { value.class() }.name(),
        value.as_raw()
    );
    panic::resume_unwind(Box::new(Thrown(value)))
}

/// Creates an `OxException` with `name` and `reason` and throws it.
pub fn raise(name: &str, reason: &str) -> ! {
    let exception = builtins::new_exception(name, reason);
    // SAFETY: new_exception returns a +1 reference
    unsafe { throw(exception) }
}

/// Runs `f`, returning the thrown object if it raised.
///
/// The returned object carries one reference owned by the caller.
/// Panics that are not runtime exceptions resume unwinding.
pub fn catch<R>(f: impl FnOnce() -> R) -> Result<R, ObjectPtr> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<Thrown>() {
            Ok(thrown) => {
                let object = thrown.into_object();
                debug!("caught {:p}", object.as_raw());
                Err(object)
            }
            Err(other) => panic::resume_unwind(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{self, builtins::exception_info};

    #[test]
    fn test_catch_returns_value() {
        assert_eq!(catch(|| 41 + 1), Ok(42));
    }

    #[test]
    fn test_raise_is_caught_with_name_and_reason() {
        runtime::init();
        let err = catch(|| -> () { raise(names::GENERIC, "boom") }).unwrap_err();
        let info = unsafe { exception_info(err) }.unwrap();
        assert_eq!(&*info.name, names::GENERIC);
        assert_eq!(&*info.reason, "boom");
        unsafe {
            assert_eq!(err.retain_count(), 1);
            err.release();
        }
    }

    #[test]
    fn test_nested_catch_stops_at_innermost() {
        runtime::init();
        let outer = catch(|| {
            let inner = catch(|| -> () { raise(names::GENERIC, "inner") });
            unsafe { inner.unwrap_err().release() };
            7
        });
        assert_eq!(outer, Ok(7));
    }

    #[test]
    fn test_plain_panic_passes_through() {
        let result = panic::catch_unwind(|| catch(|| -> () { panic!("not an exception") }));
        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"not an exception"));
    }
}
