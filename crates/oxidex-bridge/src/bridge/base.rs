//! Typed handles for the built-in runtime classes.
//!
//! ```text
//! Id
//! └── Object          OxObject
//!     ├── String      OxString
//!     ├── Number      OxNumber
//!     ├── Exception   OxException
//!     ├── Port        OxPort
//!     └── PortDelegate  OxPortDelegateAdapter (see adapter)
//! ```
//!
//! Every trampoline declared here has a row in [`OWNERSHIP_TABLE`].

use crate::bridge::{ClassToken, Id, Instantiation, Retained, Shape};
use crate::runtime::{Class, Ownership, Selector, StrRef};
use crate::{asel, csel, define_obj_type, rsel, rwsel, symbol_table, wsel};
use std::ffi::c_void;

symbol_table! {
    /// Class tokens and selectors used by the built-in handles.
    pub struct BaseSymbols in base_symbols {
        classes {
            object = "OxObject",
            string = "OxString",
            number = "OxNumber",
            exception = "OxException",
            port = "OxPort",
            port_delegate_adapter = "OxPortDelegateAdapter",
        }
        selectors {
            alloc = "alloc",
            new = "new",
            init = "init",
            class = "class",
            hash = "hash",
            is_equal = "isEqual:",
            description = "description",
            responds_to_selector = "respondsToSelector:",
            is_kind_of_class = "isKindOfClass:",
            string_with_str = "stringWithStr:",
            init_with_str = "initWithStr:",
            length = "length",
            str_ref = "strRef",
            copy = "copy",
            is_equal_to_string = "isEqualToString:",
            number_with_integer = "numberWithInteger:",
            init_with_integer = "initWithInteger:",
            integer_value = "integerValue",
            exception_with_name_reason = "exceptionWithName:reason:",
            init_with_name_reason = "initWithName:reason:",
            name = "name",
            reason = "reason",
            call_stack = "callStack",
            raise = "raise",
            port_factory = "port",
            delegate = "delegate",
            set_delegate = "setDelegate:",
            timeout = "timeout",
            set_timeout = "setTimeout:",
            post_mach_message = "postMachMessage:",
            post_port_message = "postPortMessage:",
            init_with_callbacks = "initWithCallbacks:",
            callbacks = "callbacks",
            handle_mach_message = "handleMachMessage:",
            handle_port_message = "handlePortMessage:",
        }
    }
}

define_obj_type!(
    /// An `OxObject` or any subclass.
    pub Object(Id), base_symbols().object
);

impl Object {
    csel!(pub retained fn new() -> Object = Self::cls(), base_symbols().new);

    rsel!(pub fn class(&self) -> Option<Class> = base_symbols().class);
    rsel!(pub fn hash(&self) -> u64 = base_symbols().hash);
    rsel!(pub fn is_equal(&self, other: Option<&Id>) -> bool = base_symbols().is_equal);
    rsel!(pub fn responds_to_selector(&self, selector: Selector) -> bool
        = base_symbols().responds_to_selector);
    rsel!(pub fn is_kind_of_class(&self, class: ClassToken) -> bool
        = base_symbols().is_kind_of_class);
    rsel!(pub not_retained fn description(&self) -> String = base_symbols().description);
}

define_obj_type!(
    /// An immutable `OxString`.
    pub String(Object), base_symbols().string
);

impl String {
    csel!(pub not_retained fn with_str(s: StrRef) -> String
        = Self::cls(), base_symbols().string_with_str);

    // Same method as `with_str`, declared retained so the caller owns the
    // result without an autorelease pool of its own
    csel!(pub retained fn with_str_retained(s: StrRef) -> String
        = Self::cls(), base_symbols().string_with_str);

    asel!(pub fn init_with_str(s: StrRef) -> String = Self::cls(), base_symbols().init_with_str);

    rsel!(pub fn length(&self) -> u64 = base_symbols().length);
    rsel!(pub fn str_ref(&self) -> StrRef = base_symbols().str_ref);
    rsel!(pub retained fn copy(&self) -> String = base_symbols().copy);
    rsel!(pub fn is_equal_to_string(&self, other: &String) -> bool
        = base_symbols().is_equal_to_string);

    /// Borrows the contents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // SAFETY: string payloads are immutable and live as long as the object
        unsafe { self.str_ref().as_str() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }
}

define_obj_type!(
    /// An `OxNumber` holding an `i64`.
    pub Number(Object), base_symbols().number
);

impl Number {
    csel!(pub not_retained fn with_integer(value: i64) -> Number
        = Self::cls(), base_symbols().number_with_integer);
    asel!(pub fn new_integer(value: i64) -> Number
        = Self::cls(), base_symbols().init_with_integer);
    rsel!(pub fn integer_value(&self) -> i64 = base_symbols().integer_value);
}

define_obj_type!(
    /// An `OxException`.
    pub Exception(Object), base_symbols().exception
);

impl Exception {
    csel!(pub not_retained fn with_name_reason(name: &String, reason: &String) -> Exception
        = Self::cls(), base_symbols().exception_with_name_reason);
    asel!(pub fn init_with_name_reason(name: &String, reason: &String) -> Exception
        = Self::cls(), base_symbols().init_with_name_reason);

    rsel!(pub not_retained fn name(&self) -> String = base_symbols().name);
    rsel!(pub not_retained fn reason(&self) -> String = base_symbols().reason);
    rsel!(
        /// `None` unless the `exception-backtrace` feature captured one.
        pub not_retained fn call_stack(&self) -> String = base_symbols().call_stack
    );

    wsel!(
        /// Throws the exception. Unwinds to the nearest guarded boundary.
        pub fn raise(&self) = base_symbols().raise
    );
    wsel!(
        /// Throws the exception and catches it again at this call.
        pub guarded fn try_raise(&self) = base_symbols().raise
    );
}

define_obj_type!(
    /// An `OxPort`: delivers messages to a weakly held delegate.
    pub Port(Object), base_symbols().port
);

impl Port {
    csel!(pub not_retained fn port() -> Port = Self::cls(), base_symbols().port_factory);
    asel!(pub fn init() -> Port = Self::cls(), base_symbols().init);

    rsel!(pub not_retained fn delegate(&self) -> Id = base_symbols().delegate);
    wsel!(
        /// The port does not retain its delegate.
        pub fn set_delegate(&self, delegate: Option<&Id>) = base_symbols().set_delegate
    );
    rwsel!(
        /// Seconds to wait when sending.
        pub fn timeout, set_timeout: f64 = base_symbols().timeout, base_symbols().set_timeout
    );
    wsel!(pub fn post_mach_message(&self, message: *mut c_void)
        = base_symbols().post_mach_message);
    wsel!(pub fn post_port_message(&self, message: &Id) = base_symbols().post_port_message);
}

const RETAINED: Option<Ownership> = Some(Ownership::Retained);
const NOT_RETAINED: Option<Ownership> = Some(Ownership::NotRetained);

/// Every trampoline on the built-in handles, with its declared tag.
///
/// This table is authoritative: a trampoline returns what its row says,
/// whatever the selector name suggests. [`review`](crate::bridge::review)
/// lists the rows that go against the naming convention.
pub const OWNERSHIP_TABLE: &[Instantiation] = &[
    Instantiation::new("OxObject", "new", Shape::Class, 0, RETAINED),
    Instantiation::new("OxObject", "class", Shape::Read, 0, None),
    Instantiation::new("OxObject", "hash", Shape::Read, 0, None),
    Instantiation::new("OxObject", "isEqual:", Shape::Read, 1, None),
    Instantiation::new("OxObject", "respondsToSelector:", Shape::Read, 1, None),
    Instantiation::new("OxObject", "isKindOfClass:", Shape::Read, 1, None),
    Instantiation::new("OxObject", "description", Shape::Read, 0, NOT_RETAINED),
    Instantiation::new("OxString", "stringWithStr:", Shape::Class, 1, NOT_RETAINED),
    Instantiation::new("OxString", "stringWithStr:", Shape::Class, 1, RETAINED),
    Instantiation::new("OxString", "initWithStr:", Shape::Allocate, 1, RETAINED),
    Instantiation::new("OxString", "length", Shape::Read, 0, None),
    Instantiation::new("OxString", "strRef", Shape::Read, 0, None),
    Instantiation::new("OxString", "copy", Shape::Read, 0, RETAINED),
    Instantiation::new("OxString", "isEqualToString:", Shape::Read, 1, None),
    Instantiation::new("OxNumber", "numberWithInteger:", Shape::Class, 1, NOT_RETAINED),
    Instantiation::new("OxNumber", "initWithInteger:", Shape::Allocate, 1, RETAINED),
    Instantiation::new("OxNumber", "integerValue", Shape::Read, 0, None),
    Instantiation::new("OxException", "exceptionWithName:reason:", Shape::Class, 2, NOT_RETAINED),
    Instantiation::new("OxException", "initWithName:reason:", Shape::Allocate, 2, RETAINED),
    Instantiation::new("OxException", "name", Shape::Read, 0, NOT_RETAINED),
    Instantiation::new("OxException", "reason", Shape::Read, 0, NOT_RETAINED),
    Instantiation::new("OxException", "callStack", Shape::Read, 0, NOT_RETAINED),
    Instantiation::new("OxException", "raise", Shape::Write, 0, None),
    Instantiation::new("OxPort", "port", Shape::Class, 0, NOT_RETAINED),
    Instantiation::new("OxPort", "init", Shape::Allocate, 0, RETAINED),
    Instantiation::new("OxPort", "delegate", Shape::Read, 0, NOT_RETAINED),
    Instantiation::new("OxPort", "setDelegate:", Shape::Write, 1, None),
    Instantiation::new("OxPort", "timeout", Shape::ReadWrite, 0, None),
    Instantiation::new("OxPort", "setTimeout:", Shape::ReadWrite, 1, None),
    Instantiation::new("OxPort", "postMachMessage:", Shape::Write, 1, None),
    Instantiation::new("OxPort", "postPortMessage:", Shape::Write, 1, None),
    Instantiation::new("OxPortDelegateAdapter", "initWithCallbacks:", Shape::Allocate, 1, RETAINED),
    Instantiation::new("OxPortDelegateAdapter", "callbacks", Shape::Read, 0, None),
    Instantiation::new("OxPortDelegateAdapter", "handleMachMessage:", Shape::Write, 1, None),
    Instantiation::new("OxPortDelegateAdapter", "handlePortMessage:", Shape::Write, 1, None),
];

/// Creates a `Retained<String>` from Rust text.
#[must_use]
pub fn string(s: &str) -> Retained<String> {
    match String::init_with_str(StrRef::new(s)) {
        Some(string) => string,
        None => unreachable!("OxString initializer never returns nil"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Message, review, try_catch};
    use crate::runtime::encoding::Encoding;
    use crate::runtime::{AutoreleasePool, autorelease::pending};

    #[test]
    fn test_review_pins_the_one_override() {
        let flagged = review(OWNERSHIP_TABLE);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].selector, "stringWithStr:");
        assert_eq!(flagged[0].tag, RETAINED);
    }

    #[test]
    fn test_table_matches_runtime_methods() {
        crate::bridge::preload();
        for row in OWNERSHIP_TABLE {
            let class = Class::get(row.class).unwrap();
            let selector = Selector::register(row.selector);
            let method = match row.shape {
                Shape::Class => class.lookup_class_method(selector),
                _ => class.lookup_method(selector),
            };
            let method = method.unwrap_or_else(|| panic!("{row:?} has no method"));
            assert_eq!(method.signature().arity(), row.arity, "{row:?}");
            let returns_handle = method.signature().ret() == Encoding::Object;
            assert_eq!(returns_handle, row.tag.is_some(), "{row:?}");
        }
    }

    #[test]
    fn test_with_str_retained_overrides_native_tag() {
        let pool = AutoreleasePool::new();
        let borrowed = String::with_str(&pool, "pooled".into()).unwrap();
        assert_eq!(pending(), 1);
        assert_eq!(borrowed.retain_count(), 1);

        // The native autorelease drains before the call returns
        let owned = String::with_str_retained("owned".into()).unwrap();
        assert_eq!(pending(), 1);
        assert_eq!(owned.retain_count(), 1);
        assert_eq!(owned.as_str(), "owned");
    }

    #[test]
    fn test_string_accessors() {
        let s = string("hello");
        assert_eq!(s.length(), 5);
        assert!(!s.is_empty());
        assert!(s.is_equal_to_string(&string("hello")));
        assert!(s.is_equal(Some(string("hello").as_id())));
        assert!(!s.is_equal(None));
        let copy = s.copy().unwrap();
        assert_eq!(copy, s);
        assert_eq!(s.retain_count(), 2);
    }

    #[test]
    fn test_object_queries() {
        let object = Object::new().unwrap();
        assert_eq!(object.class().unwrap().name(), "OxObject");
        assert!(object.responds_to_selector(base_symbols().hash));
        assert!(!object.responds_to_selector(base_symbols().length));
        assert!(object.is_kind_of_class(Object::cls()));
        assert!(!object.is_kind_of_class(String::cls()));
        assert_eq!(object.hash(), object.as_raw() as usize as u64);

        let pool = AutoreleasePool::new();
        let description = object.description(&pool).unwrap();
        assert!(description.as_str().starts_with("<OxObject: "));
    }

    #[test]
    fn test_try_cast_checks_class() {
        let s = string("x");
        assert!(String::try_cast(s.as_id()).is_some());
        assert!(Object::try_cast(s.as_id()).is_some());
        assert!(Number::try_cast(s.as_id()).is_none());
    }

    #[test]
    fn test_number_round_trip() {
        let n = Number::new_integer(-9).unwrap();
        assert_eq!(n.integer_value(), -9);
        let pool = AutoreleasePool::new();
        assert_eq!(n.description(&pool).unwrap().as_str(), "-9");
    }

    #[test]
    fn test_exception_accessors_and_guarded_raise() {
        let exception =
            Exception::init_with_name_reason(&string("OxTestException"), &string("bad input"))
                .unwrap();
        let pool = AutoreleasePool::new();
        assert_eq!(exception.name(&pool).unwrap().as_str(), "OxTestException");
        assert_eq!(exception.reason(&pool).unwrap().as_str(), "bad input");
        #[cfg(not(feature = "exception-backtrace"))]
        assert!(exception.call_stack(&pool).is_none());

        let caught = exception.try_raise().unwrap_err();
        assert_eq!(caught.as_raw(), exception.as_raw());
        assert_eq!(exception.retain_count(), 2);

        let again = try_catch(|| exception.raise()).unwrap_err();
        assert_eq!(again, caught);
    }

    #[test]
    fn test_port_delegate_is_weak_and_timeout_chains() {
        let port = Port::init().unwrap();
        let delegate = unsafe { crate::bridge::make_adapter(Default::default()) };
        port.set_delegate(Some(delegate.as_id()));
        assert_eq!(delegate.retain_count(), 1);

        let pool = AutoreleasePool::new();
        assert_eq!(port.delegate(&pool).unwrap().as_raw(), delegate.as_raw());
        port.set_delegate(None);
        assert!(port.delegate(&pool).is_none());

        assert!(port.set_timeout(1.5).timeout() > 1.0);
    }

    #[test]
    fn test_port_forgets_freed_delegate() {
        let port = Port::init().unwrap();
        let delegate = Object::new().unwrap();
        port.set_delegate(Some(delegate.as_id()));
        drop(delegate);

        let pool = AutoreleasePool::new();
        assert!(port.delegate(&pool).is_none());
        // Nothing left to deliver to
        port.post_mach_message(std::ptr::null_mut());
    }
}
