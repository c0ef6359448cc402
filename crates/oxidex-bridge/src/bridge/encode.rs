//! Static type encodings for trampoline arguments and results.
//!
//! Each type that may cross a send implements [`Encode`], which ties it to an
//! [`Encoding`]. The runtime compares the call site's encodings with the
//! method's signature before invoking it, so a trampoline declared with the
//! wrong types raises instead of reading garbage.

use crate::bridge::{ClassToken, Message};
use crate::runtime::{Class, Encoding, Selector, StrRef};
use std::ffi::c_void;

/// Types that can be passed to or returned from a message send.
///
/// # Safety
///
/// `ENCODING` must describe the in-memory layout of `Self` exactly.
pub unsafe trait Encode: Copy {
    const ENCODING: Encoding;
}

/// Types that can be returned from a message send.
///
/// A method may return nil for any pointer-sized encoding, so only types with
/// a valid all-zero value qualify: `Option<Selector>` and `Option<Class>`
/// rather than `Selector` and `Class`.
///
/// # Safety
///
/// Same as [`Encode`], and every bit pattern a method may write for
/// `ENCODING` (nil included) must be a valid `Self`.
pub unsafe trait EncodeReturn {
    const ENCODING: Encoding;
}

unsafe impl EncodeReturn for () {
    const ENCODING: Encoding = Encoding::Void;
}

macro_rules! encode_impls {
    ($($ty:ty => $encoding:expr),* $(,)?) => {
        $(
            unsafe impl Encode for $ty {
                const ENCODING: Encoding = $encoding;
            }

            unsafe impl EncodeReturn for $ty {
                const ENCODING: Encoding = $encoding;
            }
        )*
    };
}

// Never nil: arguments only
unsafe impl Encode for Selector {
    const ENCODING: Encoding = Encoding::Selector;
}

unsafe impl Encode for Class {
    const ENCODING: Encoding = Encoding::Class;
}

encode_impls! {
    Option<Selector> => Encoding::Selector,
    Option<Class> => Encoding::Class,
    bool => Encoding::Bool,
    i8 => Encoding::Char,
    u8 => Encoding::UChar,
    i16 => Encoding::Short,
    u16 => Encoding::UShort,
    i32 => Encoding::Int,
    u32 => Encoding::UInt,
    i64 => Encoding::Long,
    u64 => Encoding::ULong,
    f32 => Encoding::Float,
    f64 => Encoding::Double,
    *const c_void => Encoding::Pointer,
    *mut c_void => Encoding::Pointer,
    ClassToken => Encoding::Class,
}

#[cfg(target_pointer_width = "64")]
encode_impls! {
    isize => Encoding::Long,
    usize => Encoding::ULong,
}

/// An untyped object pointer, used for `@` results before ownership is
/// decided.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawId(pub *mut c_void);

impl RawId {
    pub const NIL: RawId = RawId(std::ptr::null_mut());
}

encode_impls! {
    RawId => Encoding::Object,
}

unsafe impl<T: Message> Encode for &T {
    const ENCODING: Encoding = Encoding::Object;
}

unsafe impl<T: Message> Encode for Option<&T> {
    const ENCODING: Encoding = Encoding::Object;
}

/// Implements [`Encode`] for a `#[repr(C)]` struct passed by value.
///
/// The struct is encoded as `{Name}`; the name defaults to the type's
/// identifier and must match the name in the method's type string.
///
/// ```rust
/// use oxidex_bridge::encode_struct;
///
/// #[repr(C)]
/// #[derive(Clone, Copy)]
/// struct Point {
///     x: f64,
///     y: f64,
/// }
///
/// encode_struct!(Point);
/// ```
#[macro_export]
macro_rules! encode_struct {
    ($ty:ident) => {
        $crate::encode_struct!($ty = stringify!($ty));
    };
    ($ty:ty = $name:expr) => {
        // SAFETY: the caller declares the type as #[repr(C)]
        unsafe impl $crate::bridge::Encode for $ty {
            const ENCODING: $crate::runtime::Encoding = $crate::runtime::Encoding::Struct($name);
        }

        // SAFETY: as above; a struct result is written whole
        unsafe impl $crate::bridge::EncodeReturn for $ty {
            const ENCODING: $crate::runtime::Encoding = $crate::runtime::Encoding::Struct($name);
        }
    };
}

encode_struct!(StrRef);

/// Argument lists of arity 0 to 4, as tuples of [`Encode`] values.
///
/// # Safety
///
/// `ENCODINGS` must list the encodings of the tuple fields in order, and
/// `with_pointers` must pass one pointer per field.
pub unsafe trait MessageArguments {
    const ENCODINGS: &'static [Encoding];

    /// Calls `f` with pointers to each argument.
    fn with_pointers<R>(&self, f: impl FnOnce(&[*const c_void]) -> R) -> R;
}

unsafe impl MessageArguments for () {
    const ENCODINGS: &'static [Encoding] = &[];

    fn with_pointers<R>(&self, f: impl FnOnce(&[*const c_void]) -> R) -> R {
        f(&[])
    }
}

macro_rules! message_arguments {
    ($($t:ident . $idx:tt),+) => {
        unsafe impl<$($t: Encode),+> MessageArguments for ($($t,)+) {
            const ENCODINGS: &'static [Encoding] = &[$($t::ENCODING),+];

            fn with_pointers<R>(&self, f: impl FnOnce(&[*const c_void]) -> R) -> R {
                f(&[$(std::ptr::from_ref(&self.$idx).cast::<c_void>()),+])
            }
        }
    };
}

message_arguments!(A.0);
message_arguments!(A.0, B.1);
message_arguments!(A.0, B.1, C.2);
message_arguments!(A.0, B.1, C.2, D.3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Id;

    #[test]
    fn test_scalar_encodings() {
        assert_eq!(<i64 as Encode>::ENCODING, Encoding::Long);
        assert_eq!(<u32 as Encode>::ENCODING, Encoding::UInt);
        assert_eq!(<f64 as Encode>::ENCODING, Encoding::Double);
        assert_eq!(<() as EncodeReturn>::ENCODING, Encoding::Void);
        assert_eq!(<bool as EncodeReturn>::ENCODING, Encoding::Bool);
    }

    #[test]
    fn test_handle_encodings() {
        assert_eq!(<&Id as Encode>::ENCODING, Encoding::Object);
        assert_eq!(<Option<&Id> as Encode>::ENCODING, Encoding::Object);
        assert_eq!(<ClassToken as Encode>::ENCODING, Encoding::Class);
        assert_eq!(<StrRef as Encode>::ENCODING, Encoding::Struct("StrRef"));
        assert_eq!(<StrRef as EncodeReturn>::ENCODING, Encoding::Struct("StrRef"));
    }

    #[test]
    fn test_nullable_results_use_the_niche() {
        use std::mem::size_of;
        assert_eq!(<Option<Class> as EncodeReturn>::ENCODING, Encoding::Class);
        assert_eq!(<Option<Selector> as EncodeReturn>::ENCODING, Encoding::Selector);
        assert_eq!(size_of::<Option<Class>>(), size_of::<*mut c_void>());
        assert_eq!(size_of::<Option<Selector>>(), size_of::<*mut c_void>());
        // A nil result reads back as None
        let nil: Option<Class> = unsafe { std::mem::transmute(std::ptr::null_mut::<c_void>()) };
        assert!(nil.is_none());
    }

    #[test]
    fn test_tuple_encodings_in_order() {
        type Args = (i32, f64, Selector, *mut c_void);
        assert_eq!(
            <Args as MessageArguments>::ENCODINGS,
            &[Encoding::Int, Encoding::Double, Encoding::Selector, Encoding::Pointer]
        );
        assert!(<() as MessageArguments>::ENCODINGS.is_empty());
    }

    #[test]
    fn test_with_pointers_points_at_fields() {
        let args = (7i64, 2.5f64);
        let (a, b) = args.with_pointers(|ptrs| {
            assert_eq!(ptrs.len(), 2);
            unsafe { (*ptrs[0].cast::<i64>(), *ptrs[1].cast::<f64>()) }
        });
        assert_eq!(a, 7);
        assert!((b - 2.5).abs() < f64::EPSILON);
    }
}
