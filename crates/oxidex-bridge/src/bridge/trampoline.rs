//! The trampoline family.
//!
//! Four call shapes turn a typed Rust call into a message send:
//!
//! | Shape    | Target        | Macro              | Result                    |
//! |----------|---------------|--------------------|---------------------------|
//! | class    | class token   | [`csel!`]          | value or tagged handle    |
//! | read     | receiver      | [`rsel!`]          | value or tagged handle    |
//! | write    | receiver      | [`wsel!`]          | nothing                   |
//! | allocate | class token   | [`asel!`]          | `Retained` handle         |
//!
//! [`rwsel!`] pairs a read and a write into a getter and a chaining setter.
//!
//! Every macro takes 0 to 4 typed arguments. Handle results are declared
//! `retained` or `not_retained`; the keyword picks the [`ReturnConvention`]
//! and so the Rust return type. A `not_retained` trampoline takes the
//! innermost [`AutoreleasePool`] as its first argument and its result borrows
//! that pool. Prefixing `guarded` wraps the call in [`try_catch`], turning a
//! runtime exception into `Err`.
//!
//! ```rust
//! use oxidex_bridge::bridge::{Id, Retained, base_symbols, resolve_class};
//! use oxidex_bridge::runtime::AutoreleasePool;
//! use oxidex_bridge::{csel, define_obj_type, rsel};
//!
//! define_obj_type!(pub Num(Id), resolve_class("OxNumber"));
//!
//! impl Num {
//!     csel!(pub not_retained fn with_integer(value: i64) -> Num
//!         = Self::cls(), base_symbols().number_with_integer);
//!     rsel!(pub fn integer_value(&self) -> i64 = base_symbols().integer_value);
//! }
//!
//! let pool = AutoreleasePool::new();
//! let n = Num::with_integer(&pool, 42).unwrap();
//! assert_eq!(n.integer_value(), 42);
//! ```
//!
//! The functions in this module are what the macros expand to; they can be
//! called directly for one-off sends.
//!
//! [`csel!`]: crate::csel
//! [`rsel!`]: crate::rsel
//! [`wsel!`]: crate::wsel
//! [`rwsel!`]: crate::rwsel
//! [`asel!`]: crate::asel
//! [`ReturnConvention`]: crate::bridge::ReturnConvention
//! [`try_catch`]: crate::bridge::try_catch

use crate::bridge::encode::{EncodeReturn, MessageArguments, RawId};
use crate::bridge::{ClassToken, Message, ReturnConvention, Retained, ReturnsRetained, base_symbols};
use crate::runtime::dispatch::{Receiver, send_message};
use crate::runtime::{AutoreleasePool, ObjectPtr, Ownership, Selector};
use std::mem::MaybeUninit;
use std::ptr::NonNull;

/// Sends `selector` and returns the result with its native ownership.
unsafe fn send<A: MessageArguments, R: EncodeReturn>(
    receiver: Receiver,
    selector: Selector,
    args: &A,
) -> (R, Ownership) {
    let mut ret = MaybeUninit::<R>::uninit();
    let native = args.with_pointers(|ptrs| unsafe {
        send_message(
            receiver,
            selector,
            R::ENCODING,
            A::ENCODINGS,
            ptrs,
            ret.as_mut_ptr().cast(),
        )
    });
    // SAFETY: the signature check guarantees the method wrote an R, and every
    // EncodeReturn type accepts nil
    (unsafe { ret.assume_init() }, native)
}

unsafe fn adopt<'ar, C: ReturnConvention, T: Message + 'ar>(
    (raw, native): (RawId, Ownership),
    scope: C::Scope<'ar>,
) -> Option<C::Output<'ar, T>> {
    NonNull::new(raw.0.cast::<T>()).map(|ptr| unsafe { C::adopt(ptr, native, scope) })
}

/// Sends a message whose object result is handed out under convention `C`.
#[track_caller]
unsafe fn send_obj<'ar, C: ReturnConvention, T: Message + 'ar, A: MessageArguments>(
    receiver: Receiver,
    selector: Selector,
    args: &A,
    scope: C::Scope<'ar>,
) -> Option<C::Output<'ar, T>> {
    C::check_scope(scope);
    if C::TAG == Ownership::Retained {
        // A result the method autoreleased drains here, after adopt retained
        // it, so the caller holds exactly one reference with or without an
        // outer pool
        let _local = AutoreleasePool::new();
        return unsafe { adopt::<C, T>(send(receiver, selector, args), scope) };
    }
    unsafe { adopt::<C, T>(send(receiver, selector, args), scope) }
}

/// Sends a class message returning a non-handle value.
///
/// # Panics
///
/// Panics if `cls` is null. Raises if the class does not respond to
/// `selector` with these types.
///
/// # Safety
///
/// Arguments that are pointers must be valid for what the method does with
/// them.
#[track_caller]
pub unsafe fn class_call<A: MessageArguments, R: EncodeReturn>(
    cls: ClassToken,
    selector: Selector,
    args: A,
) -> R {
    let class = cls.class_for(selector);
    unsafe { send(Receiver::Class(class), selector, &args) }.0
}

/// Sends a class message returning a handle under convention `C`.
///
/// `scope` is `()` for [`ReturnsRetained`] and the innermost pool for
/// [`ReturnsNotRetained`](crate::bridge::ReturnsNotRetained).
///
/// # Panics
///
/// Same as [`class_call`]; also panics if `scope` is a pool other than the
/// innermost one.
///
/// # Safety
///
/// Same as [`class_call`]; additionally the result must be a `T`.
#[track_caller]
pub unsafe fn class_call_obj<'ar, C: ReturnConvention, T: Message + 'ar, A: MessageArguments>(
    cls: ClassToken,
    selector: Selector,
    args: A,
    scope: C::Scope<'ar>,
) -> Option<C::Output<'ar, T>> {
    let class = cls.class_for(selector);
    unsafe { send_obj::<C, T, A>(Receiver::Class(class), selector, &args, scope) }
}

/// Sends an instance message returning a non-handle value.
///
/// # Safety
///
/// Arguments that are pointers must be valid for what the method does with
/// them.
pub unsafe fn read_call<A: MessageArguments, R: EncodeReturn>(
    receiver: &impl Message,
    selector: Selector,
    args: A,
) -> R {
    unsafe { send(Receiver::Object(receiver.as_object()), selector, &args) }.0
}

/// Sends an instance message returning a handle under convention `C`.
///
/// # Panics
///
/// Panics if `scope` is a pool other than the innermost one.
///
/// # Safety
///
/// Same as [`read_call`]; additionally the result must be a `T`.
#[track_caller]
pub unsafe fn read_call_obj<'ar, C: ReturnConvention, T: Message + 'ar, A: MessageArguments>(
    receiver: &impl Message,
    selector: Selector,
    args: A,
    scope: C::Scope<'ar>,
) -> Option<C::Output<'ar, T>> {
    unsafe { send_obj::<C, T, A>(Receiver::Object(receiver.as_object()), selector, &args, scope) }
}

/// Sends an instance message whose method returns nothing.
///
/// # Safety
///
/// Same as [`read_call`].
pub unsafe fn write_call<A: MessageArguments>(receiver: &impl Message, selector: Selector, args: A) {
    unsafe { read_call::<A, ()>(receiver, selector, args) }
}

/// Allocates an instance of `cls` and sends it the initializer `init`.
///
/// The result is always a +1 reference. A nil from `alloc` or from the
/// initializer yields `None`.
///
/// # Panics
///
/// Panics if `cls` is null.
///
/// # Safety
///
/// Same as [`class_call`]; additionally the result must be a `T`.
#[track_caller]
pub unsafe fn alloc_init<T: Message, A: MessageArguments>(
    cls: ClassToken,
    init: Selector,
    args: A,
) -> Option<Retained<T>> {
    let class = cls.class_for(init);
    let alloc = base_symbols().alloc;
    let (raw, _) = unsafe { send::<(), RawId>(Receiver::Class(class), alloc, &()) };
    // SAFETY: alloc returns a live object or nil
    let obj = unsafe { ObjectPtr::from_raw(raw.0) }?;
    // The initializer consumes the +1 from alloc and returns its own result
    unsafe { send_obj::<ReturnsRetained, T, A>(Receiver::Object(obj), init, &args, ()) }
}

/// Expands one trampoline function, optionally guarded.
#[doc(hidden)]
#[macro_export]
macro_rules! __trampoline_fn {
    (guarded [$($m:tt)*] $vis:vis fn $name:ident [$($g:tt)*] ($($params:tt)*) -> ($ret:ty) $body:block) => {
        $($m)*
        $vis fn $name<$($g)*>($($params)*)
            -> ::std::result::Result<$ret, $crate::bridge::Retained<$crate::bridge::Id>>
        {
            $crate::bridge::try_catch(|| $body)
        }
    };
    ([$($m:tt)*] $vis:vis fn $name:ident [$($g:tt)*] ($($params:tt)*) -> ($ret:ty) $body:block) => {
        $($m)*
        $vis fn $name<$($g)*>($($params)*) -> $ret $body
    };
}

/// Declares a class-call trampoline.
///
/// ```text
/// csel!(pub fn name(a: A, ...) -> R = cls, sel);
/// csel!(pub retained fn name(a: A, ...) -> T = cls, sel);
/// csel!(pub not_retained fn name(a: A, ...) -> T = cls, sel);
/// csel!(pub guarded ... );
/// ```
///
/// Handle forms return `Option<Retained<T>>` or `Option<Autoreleased<T>>`;
/// the `not_retained` form takes `pool: &AutoreleasePool` before `a`.
#[macro_export]
macro_rules! csel {
    (@inner [$($g:ident)?] [$($m:tt)*] $vis:vis retained fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty = $cls:expr, $sel:expr) => {
        $crate::__trampoline_fn!($($g)? [$($m)*] $vis fn $name [] ($($arg: $ty),*)
            -> (::std::option::Option<$crate::bridge::Retained<$ret>>) {
            unsafe {
                $crate::bridge::trampoline::class_call_obj::<$crate::bridge::ReturnsRetained, $ret, _>(
                    $cls, $sel, ($($arg,)*), (),
                )
            }
        });
    };
    (@inner [$($g:ident)?] [$($m:tt)*] $vis:vis not_retained fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty = $cls:expr, $sel:expr) => {
        $crate::__trampoline_fn!($($g)? [$($m)*] $vis fn $name ['ar]
            (pool: &'ar $crate::runtime::AutoreleasePool, $($arg: $ty),*)
            -> (::std::option::Option<$crate::bridge::Autoreleased<'ar, $ret>>) {
            unsafe {
                $crate::bridge::trampoline::class_call_obj::<$crate::bridge::ReturnsNotRetained, $ret, _>(
                    $cls, $sel, ($($arg,)*), pool,
                )
            }
        });
    };
    (@inner [$($g:ident)?] [$($m:tt)*] $vis:vis fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty = $cls:expr, $sel:expr) => {
        $crate::__trampoline_fn!($($g)? [$($m)*] $vis fn $name [] ($($arg: $ty),*) -> ($ret) {
            unsafe { $crate::bridge::trampoline::class_call::<_, $ret>($cls, $sel, ($($arg,)*)) }
        });
    };
    ($(#[$m:meta])* $vis:vis guarded $($rest:tt)*) => {
        $crate::csel!(@inner [guarded] [$(#[$m])*] $vis $($rest)*);
    };
    ($(#[$m:meta])* $vis:vis retained $($rest:tt)*) => {
        $crate::csel!(@inner [] [$(#[$m])*] $vis retained $($rest)*);
    };
    ($(#[$m:meta])* $vis:vis not_retained $($rest:tt)*) => {
        $crate::csel!(@inner [] [$(#[$m])*] $vis not_retained $($rest)*);
    };
    ($(#[$m:meta])* $vis:vis fn $($rest:tt)*) => {
        $crate::csel!(@inner [] [$(#[$m])*] $vis fn $($rest)*);
    };
}

/// Declares a read-call trampoline on `&self`.
///
/// ```text
/// rsel!(pub fn name(&self, a: A, ...) -> R = sel);
/// rsel!(pub retained fn name(&self, a: A, ...) -> T = sel);
/// rsel!(pub not_retained fn name(&self, a: A, ...) -> T = sel);
/// rsel!(pub guarded ... );
/// ```
///
/// The `not_retained` form takes `pool: &AutoreleasePool` right after
/// `&self`.
#[macro_export]
macro_rules! rsel {
    (@inner [$($g:ident)?] [$($m:tt)*] $vis:vis retained fn $name:ident(&self $(, $arg:ident: $ty:ty)* $(,)?) -> $ret:ty = $sel:expr) => {
        $crate::__trampoline_fn!($($g)? [$($m)*] $vis fn $name [] (&self, $($arg: $ty),*)
            -> (::std::option::Option<$crate::bridge::Retained<$ret>>) {
            unsafe {
                $crate::bridge::trampoline::read_call_obj::<$crate::bridge::ReturnsRetained, $ret, _>(
                    self, $sel, ($($arg,)*), (),
                )
            }
        });
    };
    (@inner [$($g:ident)?] [$($m:tt)*] $vis:vis not_retained fn $name:ident(&self $(, $arg:ident: $ty:ty)* $(,)?) -> $ret:ty = $sel:expr) => {
        $crate::__trampoline_fn!($($g)? [$($m)*] $vis fn $name ['ar]
            (&self, pool: &'ar $crate::runtime::AutoreleasePool, $($arg: $ty),*)
            -> (::std::option::Option<$crate::bridge::Autoreleased<'ar, $ret>>) {
            unsafe {
                $crate::bridge::trampoline::read_call_obj::<$crate::bridge::ReturnsNotRetained, $ret, _>(
                    self, $sel, ($($arg,)*), pool,
                )
            }
        });
    };
    (@inner [$($g:ident)?] [$($m:tt)*] $vis:vis fn $name:ident(&self $(, $arg:ident: $ty:ty)* $(,)?) -> $ret:ty = $sel:expr) => {
        $crate::__trampoline_fn!($($g)? [$($m)*] $vis fn $name [] (&self, $($arg: $ty),*) -> ($ret) {
            unsafe { $crate::bridge::trampoline::read_call::<_, $ret>(self, $sel, ($($arg,)*)) }
        });
    };
    ($(#[$m:meta])* $vis:vis guarded $($rest:tt)*) => {
        $crate::rsel!(@inner [guarded] [$(#[$m])*] $vis $($rest)*);
    };
    ($(#[$m:meta])* $vis:vis retained $($rest:tt)*) => {
        $crate::rsel!(@inner [] [$(#[$m])*] $vis retained $($rest)*);
    };
    ($(#[$m:meta])* $vis:vis not_retained $($rest:tt)*) => {
        $crate::rsel!(@inner [] [$(#[$m])*] $vis not_retained $($rest)*);
    };
    ($(#[$m:meta])* $vis:vis fn $($rest:tt)*) => {
        $crate::rsel!(@inner [] [$(#[$m])*] $vis fn $($rest)*);
    };
}

/// Declares a write-call trampoline on `&self`.
///
/// ```text
/// wsel!(pub fn name(&self, a: A, ...) = sel);
/// wsel!(pub guarded fn name(&self, a: A, ...) = sel);
/// ```
#[macro_export]
macro_rules! wsel {
    (@inner [$($g:ident)?] [$($m:tt)*] $vis:vis fn $name:ident(&self $(, $arg:ident: $ty:ty)* $(,)?) = $sel:expr) => {
        $crate::__trampoline_fn!($($g)? [$($m)*] $vis fn $name [] (&self, $($arg: $ty),*) -> (()) {
            unsafe { $crate::bridge::trampoline::write_call(self, $sel, ($($arg,)*)) }
        });
    };
    ($(#[$m:meta])* $vis:vis guarded $($rest:tt)*) => {
        $crate::wsel!(@inner [guarded] [$(#[$m])*] $vis $($rest)*);
    };
    ($(#[$m:meta])* $vis:vis fn $($rest:tt)*) => {
        $crate::wsel!(@inner [] [$(#[$m])*] $vis fn $($rest)*);
    };
}

/// Declares a getter and a setter for one scalar property.
///
/// The setter returns `&Self` so calls chain.
///
/// ```text
/// rwsel!(pub fn getter, set_getter: T = get_sel, set_sel);
/// ```
#[macro_export]
macro_rules! rwsel {
    ($(#[$m:meta])* $vis:vis fn $get:ident, $set:ident: $ty:ty = $get_sel:expr, $set_sel:expr) => {
        $(#[$m])*
        $vis fn $get(&self) -> $ty {
            unsafe { $crate::bridge::trampoline::read_call::<_, $ty>(self, $get_sel, ()) }
        }

        $(#[$m])*
        $vis fn $set(&self, value: $ty) -> &Self {
            unsafe { $crate::bridge::trampoline::write_call(self, $set_sel, (value,)) };
            self
        }
    };
}

/// Declares an allocate-and-initialize trampoline.
///
/// The result is always `Option<Retained<T>>`.
///
/// ```text
/// asel!(pub fn name(a: A, ...) -> T = cls, init_sel);
/// asel!(pub guarded fn name(a: A, ...) -> T = cls, init_sel);
/// ```
#[macro_export]
macro_rules! asel {
    (@inner [$($g:ident)?] [$($m:tt)*] $vis:vis fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty = $cls:expr, $sel:expr) => {
        $crate::__trampoline_fn!($($g)? [$($m)*] $vis fn $name [] ($($arg: $ty),*)
            -> (::std::option::Option<$crate::bridge::Retained<$ret>>) {
            unsafe { $crate::bridge::trampoline::alloc_init::<$ret, _>($cls, $sel, ($($arg,)*)) }
        });
    };
    ($(#[$m:meta])* $vis:vis guarded $($rest:tt)*) => {
        $crate::asel!(@inner [guarded] [$(#[$m])*] $vis $($rest)*);
    };
    ($(#[$m:meta])* $vis:vis fn $($rest:tt)*) => {
        $crate::asel!(@inner [] [$(#[$m])*] $vis fn $($rest)*);
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Id, ReturnsNotRetained, resolve_class, resolve_selector};
    use crate::runtime::{StrRef, autorelease::{depth, pending}};

    #[test]
    fn test_class_call_scalar_and_handle() {
        let pool = AutoreleasePool::new();
        let number = resolve_class("OxNumber");
        let n = unsafe {
            class_call_obj::<ReturnsNotRetained, Id, _>(
                number,
                resolve_selector("numberWithInteger:"),
                (5i64,),
                &pool,
            )
        }
        .unwrap();
        assert_eq!(pending(), 1);
        let value: i64 = unsafe { read_call(&*n, resolve_selector("integerValue"), ()) };
        assert_eq!(value, 5);
    }

    #[test]
    fn test_alloc_init_is_plus_one() {
        let s = unsafe {
            alloc_init::<Id, _>(
                resolve_class("OxString"),
                resolve_selector("initWithStr:"),
                (StrRef::new("abc"),),
            )
        }
        .unwrap();
        assert_eq!(s.retain_count(), 1);
        let len: u64 = unsafe { read_call(&*s, resolve_selector("length"), ()) };
        assert_eq!(len, 3);
    }

    #[test]
    fn test_retained_call_outside_a_pool_is_plus_one() {
        assert_eq!(depth(), 0);
        let n = unsafe {
            class_call_obj::<ReturnsRetained, Id, _>(
                resolve_class("OxNumber"),
                resolve_selector("numberWithInteger:"),
                (6i64,),
                (),
            )
        }
        .unwrap();
        assert_eq!(n.retain_count(), 1);
        assert_eq!(depth(), 0);
    }

    #[test]
    #[should_panic(expected = "is not the innermost pool")]
    fn test_not_retained_call_into_outer_pool_panics() {
        let outer = AutoreleasePool::new();
        let _inner = AutoreleasePool::new();
        let _ = unsafe {
            class_call_obj::<ReturnsNotRetained, Id, _>(
                resolve_class("OxNumber"),
                resolve_selector("numberWithInteger:"),
                (1i64,),
                &outer,
            )
        };
    }

    #[test]
    #[should_panic(expected = "unresolved class token")]
    fn test_null_class_token_panics() {
        let _: u64 = unsafe { class_call(ClassToken::NULL, resolve_selector("hash"), ()) };
    }
}
