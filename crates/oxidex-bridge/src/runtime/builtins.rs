//! Built-in classes installed by [`runtime::init`](crate::runtime::init).
//!
//! ```text
//! OxObject
//! ├── OxString      payload: Box<str>
//! ├── OxNumber      payload: i64
//! ├── OxException   payload: ExceptionInfo
//! └── OxPort        payload: PortState
//! ```
//!
//! Plus the `OxPortDelegate` protocol that `OxPort` delegates must adopt.
//!
//! Methods follow the family conventions: `alloc`/`new`/`copy`/`init...`
//! return +1 references, everything else returns autoreleased or borrowed
//! handles. `retain` is the one explicit override.

use crate::error::Result;
use crate::runtime::autorelease::autorelease;
use crate::runtime::dispatch::{
    Receiver, arg, class_receiver, receiver, send_message, set_return,
};
use crate::runtime::exception::{self, names};
use crate::runtime::{
    Class, Encoding, Imp, Method, ObjectPtr, Ownership, Protocol, Selector, WeakRef,
};
use oxidex_log::{debug, error, trace};
use std::ffi::c_void;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Borrowed UTF-8 string passed by value across a send.
///
/// Encoded as `{StrRef}`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StrRef {
    pub ptr: *const u8,
    pub len: usize,
}

impl StrRef {
    #[must_use]
    pub const fn new(s: &str) -> StrRef {
        StrRef {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// Reborrows the referenced string.
    ///
    /// # Safety
    ///
    /// The bytes must be valid UTF-8 and outlive `'a`.
    #[must_use]
    pub unsafe fn as_str<'a>(self) -> &'a str {
        if self.len == 0 {
            return "";
        }
        unsafe { std::str::from_utf8_unchecked(std::slice::from_raw_parts(self.ptr, self.len)) }
    }
}

impl From<&str> for StrRef {
    fn from(s: &str) -> StrRef {
        StrRef::new(s)
    }
}

/// Payload of an `OxException`.
#[derive(Debug)]
pub struct ExceptionInfo {
    pub name: Box<str>,
    pub reason: Box<str>,
    /// Present when the `exception-backtrace` feature is enabled.
    pub call_stack: Option<Box<str>>,
}

/// Payload of an `OxPort`.
#[derive(Debug, Default)]
struct PortState {
    /// Not retained; cleared when the delegate is freed
    delegate: WeakRef,
    timeout: AtomicU64,
}

/// Releases a loaded delegate, also when the delegate's handler raises.
struct LoadedDelegate(ObjectPtr);

impl Drop for LoadedDelegate {
    fn drop(&mut self) {
        // SAFETY: WeakRef::load handed us this reference
        unsafe { self.0.release() };
    }
}

/// Handles to the built-in classes.
#[derive(Debug)]
pub struct Builtins {
    pub object: Class,
    pub string: Class,
    pub number: Class,
    pub exception: Class,
    pub port: Class,
    pub port_delegate: Protocol,
}

static BUILTINS: OnceLock<Builtins> = OnceLock::new();

/// Returns the built-in classes, installing them on first use.
///
/// # Panics
///
/// Panics if one of the built-in names was registered by someone else
/// before installation.
pub fn builtins() -> &'static Builtins {
    BUILTINS.get_or_init(|| match install() {
        Ok(builtins) => builtins,
        Err(e) => {
            error!("failed to install builtin classes: {e}");
            panic!("failed to install builtin classes: {e}");
        }
    })
}

macro_rules! imp {
    ($(#[$m:meta])* fn $name:ident($this:ident, $args:ident, $ret:ident) { $($body:tt)* }) => {
        $(#[$m])*
        #[allow(unused_variables, unused_unsafe)]
        unsafe extern "C-unwind" fn $name(
            $this: *mut c_void,
            _cmd: Selector,
            $args: *const *const c_void,
            $ret: *mut c_void,
        ) {
            unsafe { $($body)* }
        }
    };
}

fn method(name: &str, imp: Imp, types: &str) -> Result<Method> {
    Method::new(Selector::register(name), imp, types)
}

fn install() -> Result<Builtins> {
    let object = Class::new_root("OxObject")?;
    object.add_class_method(method("alloc", object_alloc, "@#:")?);
    object.add_class_method(method("new", object_new, "@#:")?);
    object.add_method(method("init", object_init, "@@:")?);
    object.add_method(method("retain", object_retain, "@@:")?.returning(Ownership::Retained));
    object.add_method(method("release", object_release, "v@:")?);
    object.add_method(method("autorelease", object_autorelease, "@@:")?);
    object.add_method(method("retainCount", object_retain_count, "Q@:")?);
    object.add_method(method("class", object_class, "#@:")?);
    object.add_method(method("description", object_description, "@@:")?);
    object.add_method(method("respondsToSelector:", object_responds_to, "B@::")?);
    object.add_method(method("isKindOfClass:", object_is_kind_of, "B@:#")?);
    object.add_method(method("hash", object_hash, "Q@:")?);
    object.add_method(method("isEqual:", object_is_equal, "B@:@")?);

    let string = Class::new("OxString", object)?;
    string.add_class_method(method("stringWithStr:", string_with_str, "@#:{StrRef}")?);
    string.add_method(method("initWithStr:", string_init_with_str, "@@:{StrRef}")?);
    string.add_method(method("length", string_length, "Q@:")?);
    string.add_method(method("copy", string_copy, "@@:")?);
    string.add_method(method("strRef", string_str_ref, "{StrRef}@:")?);
    string.add_method(method("isEqualToString:", string_is_equal_to_string, "B@:@")?);
    string.add_method(method("isEqual:", string_is_equal_to_string, "B@:@")?);
    string.add_method(method("hash", string_hash, "Q@:")?);
    string.add_method(method("description", string_description, "@@:")?);

    let number = Class::new("OxNumber", object)?;
    number.add_class_method(method("numberWithInteger:", number_with_integer, "@#:q")?);
    number.add_method(method("initWithInteger:", number_init_with_integer, "@@:q")?);
    number.add_method(method("integerValue", number_integer_value, "q@:")?);
    number.add_method(method("description", number_description, "@@:")?);

    let exception = Class::new("OxException", object)?;
    exception.add_class_method(method(
        "exceptionWithName:reason:",
        exception_with_name_reason,
        "@#:@@",
    )?);
    exception.add_method(method("initWithName:reason:", exception_init, "@@:@@")?);
    exception.add_method(method("name", exception_name, "@@:")?);
    exception.add_method(method("reason", exception_reason, "@@:")?);
    exception.add_method(method("callStack", exception_call_stack, "@@:")?);
    exception.add_method(method("raise", exception_raise, "v@:")?);
    exception.add_method(method("description", exception_description, "@@:")?);

    let port_delegate = Protocol::new("OxPortDelegate")?;
    port_delegate.add_required(Selector::register("handleMachMessage:"));
    port_delegate.add_required(Selector::register("handlePortMessage:"));

    let port = Class::new("OxPort", object)?;
    port.add_class_method(method("port", port_port, "@#:")?);
    port.add_method(method("init", port_init, "@@:")?);
    port.add_method(method("delegate", port_delegate_get, "@@:")?);
    port.add_method(method("setDelegate:", port_set_delegate, "v@:@")?);
    port.add_method(method("timeout", port_timeout, "d@:")?);
    port.add_method(method("setTimeout:", port_set_timeout, "v@:d")?);
    port.add_method(method("postMachMessage:", port_post_mach_message, "v@:^")?);
    port.add_method(method("postPortMessage:", port_post_port_message, "v@:@")?);

    debug!("installed builtin runtime classes");
    Ok(Builtins {
        object,
        string,
        number,
        exception,
        port,
        port_delegate,
    })
}

/// Creates an `OxString` holding `s`. Returns a +1 reference.
#[must_use]
pub fn new_string(s: &str) -> ObjectPtr {
    let obj = ObjectPtr::alloc(builtins().string);
    // SAFETY: obj was just allocated and is owned here
    unsafe { obj.set_payload::<Box<str>>(s.into()) };
    obj
}

/// Returns the contents of an `OxString`, or `None` for anything else.
///
/// # Safety
///
/// `obj` must stay alive for `'a`.
#[must_use]
pub unsafe fn string_contents<'a>(obj: ObjectPtr) -> Option<&'a str> {
    unsafe { obj.payload::<Box<str>>() }.map(|s| &**s)
}

/// Creates an `OxException`. Returns a +1 reference.
#[must_use]
pub fn new_exception(name: &str, reason: &str) -> ObjectPtr {
    let obj = ObjectPtr::alloc(builtins().exception);
    // SAFETY: obj was just allocated and is owned here
    unsafe { obj.set_payload(exception_payload(name, reason)) };
    obj
}

fn exception_payload(name: &str, reason: &str) -> ExceptionInfo {
    ExceptionInfo {
        name: name.into(),
        reason: reason.into(),
        call_stack: capture_call_stack(),
    }
}

#[cfg(feature = "exception-backtrace")]
fn capture_call_stack() -> Option<Box<str>> {
    Some(format!("{:?}", backtrace::Backtrace::new()).into_boxed_str())
}

#[cfg(not(feature = "exception-backtrace"))]
fn capture_call_stack() -> Option<Box<str>> {
    None
}

/// Returns the payload of an `OxException`, or `None` for anything else.
///
/// # Safety
///
/// `obj` must stay alive for `'a`.
#[must_use]
pub unsafe fn exception_info<'a>(obj: ObjectPtr) -> Option<&'a ExceptionInfo> {
    unsafe { obj.payload::<ExceptionInfo>() }
}

/// Reads an object argument as an optional handle.
unsafe fn object_arg(args: *const *const c_void, index: usize) -> Option<ObjectPtr> {
    unsafe { ObjectPtr::from_raw(arg::<*mut c_void>(args, index)) }
}

/// Autoreleases a +1 reference and returns it as a raw `@` return value.
unsafe fn autoreleased(obj: ObjectPtr) -> *mut c_void {
    unsafe { autorelease(obj) }.as_raw()
}

// OxObject

imp!(fn object_alloc(this, args, ret) {
    let class = class_receiver(this);
    set_return(ret, ObjectPtr::alloc(class).as_raw());
});

imp!(fn object_new(this, args, ret) {
    let class = class_receiver(this);
    let obj = ObjectPtr::alloc(class);
    let mut out: *mut c_void = std::ptr::null_mut();
    // init consumes the allocation and returns +1
    send_message(
        Receiver::Object(obj),
        Selector::register("init"),
        Encoding::Object,
        &[],
        &[],
        std::ptr::from_mut(&mut out).cast(),
    );
    set_return(ret, out);
});

imp!(fn object_init(this, args, ret) {
    set_return(ret, this);
});

imp!(fn object_retain(this, args, ret) {
    set_return(ret, receiver(this).retain().as_raw());
});

imp!(fn object_release(this, args, ret) {
    receiver(this).release();
});

imp!(fn object_autorelease(this, args, ret) {
    set_return(ret, autoreleased(receiver(this)));
});

imp!(fn object_retain_count(this, args, ret) {
    set_return(ret, receiver(this).retain_count() as u64);
});

imp!(fn object_class(this, args, ret) {
    set_return(ret, receiver(this).class().as_ptr());
});

imp!(fn object_description(this, args, ret) {
    let obj = receiver(this);
    let text = format!("<{}: {:p}>", obj.class().name(), this);
    set_return(ret, autoreleased(new_string(&text)));
});

imp!(fn object_responds_to(this, args, ret) {
    let sel: Option<Selector> = arg(args, 0);
    let responds = sel.is_some_and(|sel| receiver(this).class().responds_to(sel));
    set_return(ret, responds);
});

imp!(fn object_is_kind_of(this, args, ret) {
    let class = Class::from_ptr(arg::<*const c_void>(args, 0));
    let is_kind = class.is_some_and(|class| receiver(this).class().is_subclass_of(class));
    set_return(ret, is_kind);
});

imp!(fn object_hash(this, args, ret) {
    set_return(ret, this as usize as u64);
});

imp!(fn object_is_equal(this, args, ret) {
    let other: *mut c_void = arg(args, 0);
    set_return(ret, std::ptr::eq(this, other));
});

// OxString

imp!(fn string_with_str(this, args, ret) {
    let class = class_receiver(this);
    let s: StrRef = arg(args, 0);
    let obj = ObjectPtr::alloc(class);
    obj.set_payload::<Box<str>>(s.as_str().into());
    set_return(ret, autoreleased(obj));
});

imp!(fn string_init_with_str(this, args, ret) {
    let s: StrRef = arg(args, 0);
    receiver(this).set_payload::<Box<str>>(s.as_str().into());
    set_return(ret, this);
});

imp!(fn string_length(this, args, ret) {
    let len = string_contents(receiver(this)).map_or(0, str::len);
    set_return(ret, len as u64);
});

imp!(fn string_copy(this, args, ret) {
    // Immutable, so a copy is the same object with one more reference
    set_return(ret, receiver(this).retain().as_raw());
});

imp!(fn string_str_ref(this, args, ret) {
    let s = string_contents(receiver(this)).unwrap_or("");
    set_return(ret, StrRef::new(s));
});

imp!(fn string_is_equal_to_string(this, args, ret) {
    let lhs = string_contents(receiver(this));
    let rhs = object_arg(args, 0).and_then(|other| string_contents(other));
    set_return(ret, lhs.is_some() && lhs == rhs);
});

imp!(fn string_hash(this, args, ret) {
    let s = string_contents(receiver(this)).unwrap_or("");
    set_return(ret, fxhash::hash64(s));
});

imp!(fn string_description(this, args, ret) {
    set_return(ret, autoreleased(receiver(this).retain()));
});

// OxNumber

imp!(fn number_with_integer(this, args, ret) {
    let class = class_receiver(this);
    let value: i64 = arg(args, 0);
    let obj = ObjectPtr::alloc(class);
    obj.set_payload(value);
    set_return(ret, autoreleased(obj));
});

imp!(fn number_init_with_integer(this, args, ret) {
    let value: i64 = arg(args, 0);
    receiver(this).set_payload(value);
    set_return(ret, this);
});

imp!(fn number_integer_value(this, args, ret) {
    let value = receiver(this).payload::<i64>().copied().unwrap_or(0);
    set_return(ret, value);
});

imp!(fn number_description(this, args, ret) {
    let value = receiver(this).payload::<i64>().copied().unwrap_or(0);
    set_return(ret, autoreleased(new_string(&value.to_string())));
});

// OxException

unsafe fn string_arg<'a>(args: *const *const c_void, index: usize) -> &'a str {
    unsafe { object_arg(args, index).and_then(|obj| string_contents(obj)) }.unwrap_or("")
}

imp!(fn exception_with_name_reason(this, args, ret) {
    let class = class_receiver(this);
    let obj = ObjectPtr::alloc(class);
    obj.set_payload(exception_payload(string_arg(args, 0), string_arg(args, 1)));
    set_return(ret, autoreleased(obj));
});

imp!(fn exception_init(this, args, ret) {
    receiver(this).set_payload(exception_payload(string_arg(args, 0), string_arg(args, 1)));
    set_return(ret, this);
});

imp!(fn exception_name(this, args, ret) {
    let name = exception_info(receiver(this)).map_or("", |info| &*info.name);
    set_return(ret, autoreleased(new_string(name)));
});

imp!(fn exception_reason(this, args, ret) {
    let reason = exception_info(receiver(this)).map_or("", |info| &*info.reason);
    set_return(ret, autoreleased(new_string(reason)));
});

imp!(fn exception_call_stack(this, args, ret) {
    let stack = exception_info(receiver(this)).and_then(|info| info.call_stack.as_deref());
    let out = match stack {
        Some(stack) => autoreleased(new_string(stack)),
        None => std::ptr::null_mut(),
    };
    set_return(ret, out);
});

imp!(fn exception_raise(this, args, ret) {
    exception::throw(receiver(this).retain());
});

imp!(fn exception_description(this, args, ret) {
    let text = match exception_info(receiver(this)) {
        Some(info) => format!("{}: {}", info.name, info.reason),
        None => names::GENERIC.to_owned(),
    };
    set_return(ret, autoreleased(new_string(&text)));
});

// OxPort

unsafe fn port_state<'a>(this: *mut c_void) -> Option<&'a PortState> {
    unsafe { receiver(this).payload::<PortState>() }
}

imp!(fn port_port(this, args, ret) {
    let class = class_receiver(this);
    let obj = ObjectPtr::alloc(class);
    obj.set_payload(PortState::default());
    set_return(ret, autoreleased(obj));
});

imp!(fn port_init(this, args, ret) {
    receiver(this).set_payload(PortState::default());
    set_return(ret, this);
});

imp!(fn port_delegate_get(this, args, ret) {
    let delegate = port_state(this)
        .and_then(|s| s.delegate.load())
        .map_or(std::ptr::null_mut(), |d| autoreleased(d));
    set_return(ret, delegate);
});

imp!(fn port_set_delegate(this, args, ret) {
    if let Some(state) = port_state(this) {
        state.delegate.store(object_arg(args, 0));
    }
});

imp!(fn port_timeout(this, args, ret) {
    let bits = port_state(this).map_or(0, |s| s.timeout.load(Ordering::Relaxed));
    set_return(ret, f64::from_bits(bits));
});

imp!(fn port_set_timeout(this, args, ret) {
    let timeout: f64 = arg(args, 0);
    if let Some(state) = port_state(this) {
        state.timeout.store(timeout.to_bits(), Ordering::Relaxed);
    }
});

/// Forwards a one-argument event to the port's delegate if it handles it.
unsafe fn notify_delegate(this: *mut c_void, selector: &str, encoding: Encoding, event: *mut c_void) {
    let Some(loaded) = (unsafe { port_state(this) }).and_then(|s| s.delegate.load()).map(LoadedDelegate)
    else {
        trace!("{selector} dropped, port {this:p} has no delegate");
        return;
    };
    let delegate = loaded.0;

    let sel = Selector::register(selector);
    if !unsafe { delegate.class() }.responds_to(sel) {
        trace!("{selector} dropped, delegate does not respond");
        return;
    }
    unsafe {
        send_message(
            Receiver::Object(delegate),
            sel,
            Encoding::Void,
            &[encoding],
            &[std::ptr::from_ref(&event).cast()],
            std::ptr::null_mut(),
        )
    };
}

imp!(fn port_post_mach_message(this, args, ret) {
    notify_delegate(this, "handleMachMessage:", Encoding::Pointer, arg(args, 0));
});

imp!(fn port_post_port_message(this, args, ret) {
    notify_delegate(this, "handlePortMessage:", Encoding::Object, arg(args, 0));
});
