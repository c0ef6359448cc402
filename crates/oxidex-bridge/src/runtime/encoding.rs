//! Type encodings for method signatures.
//!
//! Every method registered with the runtime carries a [`Signature`] parsed
//! from an encoding string, and every send is checked against it.
//!
//! # Encoding Format
//!
//! - `v` void, `B` bool
//! - `c`/`C` i8/u8, `s`/`S` i16/u16, `i`/`I` i32/u32, `q`/`Q` i64/u64
//! - `f` f32, `d` f64
//! - `@` object, `#` class, `:` selector, `^` untyped pointer
//! - `{Name}` a `#[repr(C)]` structure passed by value
//!
//! A method encoding is `<return>@:<arguments>`. The `@:` pair stands for the
//! implicit receiver and selector and is required even for class methods.
//!
//! Example encodings:
//! - `"v@:"` - void return, no arguments
//! - `"q@:q"` - i64 return, one i64 argument
//! - `"@#:{StrRef}"` - object return, one structure argument

// Identical arms kept per encoding for readability
#![allow(clippy::match_same_arms)]

use crate::error::{Error, Result};
use fxhash::FxHashSet;
use std::fmt;
use std::sync::{OnceLock, RwLock};

/// A single type in a method signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Void,
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    Object,
    Class,
    Selector,
    Pointer,
    /// Structure passed by value, identified by name.
    Struct(&'static str),
}

impl Encoding {
    /// Returns the single-character code, or `None` for structures.
    #[must_use]
    pub const fn code(self) -> Option<char> {
        Some(match self {
            Encoding::Void => 'v',
            Encoding::Bool => 'B',
            Encoding::Char => 'c',
            Encoding::UChar => 'C',
            Encoding::Short => 's',
            Encoding::UShort => 'S',
            Encoding::Int => 'i',
            Encoding::UInt => 'I',
            Encoding::Long => 'q',
            Encoding::ULong => 'Q',
            Encoding::Float => 'f',
            Encoding::Double => 'd',
            Encoding::Object => '@',
            Encoding::Class => '#',
            Encoding::Selector => ':',
            Encoding::Pointer => '^',
            Encoding::Struct(_) => return None,
        })
    }

    const fn from_code(ch: char) -> Option<Encoding> {
        Some(match ch {
            'v' => Encoding::Void,
            'B' => Encoding::Bool,
            'c' => Encoding::Char,
            'C' => Encoding::UChar,
            's' => Encoding::Short,
            'S' => Encoding::UShort,
            'i' => Encoding::Int,
            'I' => Encoding::UInt,
            'q' => Encoding::Long,
            'Q' => Encoding::ULong,
            'f' => Encoding::Float,
            'd' => Encoding::Double,
            '@' => Encoding::Object,
            '#' => Encoding::Class,
            ':' => Encoding::Selector,
            '^' => Encoding::Pointer,
            _ => return None,
        })
    }

    /// Returns `true` for handle-like encodings (object, class).
    #[must_use]
    pub const fn is_handle(self) -> bool {
        matches!(self, Encoding::Object | Encoding::Class)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.code()) {
            (Encoding::Struct(name), _) => write!(f, "{{{name}}}"),
            (_, Some(code)) => write!(f, "{code}"),
            (_, None) => Ok(()),
        }
    }
}

/// Returns a `'static` copy of a structure name, interned so repeated parses
/// of the same encoding do not allocate.
fn intern_struct_name(name: &str) -> &'static str {
    static NAMES: OnceLock<RwLock<FxHashSet<&'static str>>> = OnceLock::new();
    let names = NAMES.get_or_init(|| RwLock::new(FxHashSet::default()));

    if let Some(found) = names.read().unwrap().get(name) {
        return *found;
    }
    let mut names = names.write().unwrap();
    if let Some(found) = names.get(name) {
        return *found;
    }
    let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
    names.insert(leaked);
    leaked
}

/// A parsed method signature: return type plus explicit argument types.
///
/// The receiver encoding is kept for display only; the selector is implicit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    ret: Encoding,
    receiver: Encoding,
    args: Vec<Encoding>,
}

impl Signature {
    /// Creates an instance-method signature from its parts.
    #[must_use]
    pub fn new(ret: Encoding, args: &[Encoding]) -> Self {
        Signature {
            ret,
            receiver: Encoding::Object,
            args: args.to_vec(),
        }
    }

    /// Parses an encoding string such as `"v@:i"`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use oxidex_bridge::runtime::{Encoding, Signature};
    ///
    /// let sig = Signature::parse("@#:{StrRef}q").unwrap();
    /// assert_eq!(sig.ret(), Encoding::Object);
    /// assert_eq!(sig.args(), &[Encoding::Struct("StrRef"), Encoding::Long]);
    /// assert_eq!(sig.to_string(), "@#:{StrRef}q");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEncoding`] if the string is empty, contains an
    /// unknown code or an unterminated structure, uses `v` as an argument
    /// type, or lacks the receiver and selector pair after the return type.
    pub fn parse(encoding: &str) -> Result<Signature> {
        let invalid = || Error::InvalidEncoding {
            encoding: encoding.to_owned(),
        };

        let mut types = Vec::new();
        let mut rest = encoding;
        while let Some(ch) = rest.chars().next() {
            if ch == '{' {
                let end = rest.find('}').ok_or_else(invalid)?;
                let name = &rest[1..end];
                if name.is_empty() {
                    return Err(invalid());
                }
                types.push(Encoding::Struct(intern_struct_name(name)));
                rest = &rest[end + 1..];
            } else {
                types.push(Encoding::from_code(ch).ok_or_else(invalid)?);
                rest = &rest[ch.len_utf8()..];
            }
        }

        // Receiver may be an instance or a class
        match types.as_slice() {
            [ret, receiver @ (Encoding::Object | Encoding::Class), Encoding::Selector, args @ ..] => {
                if args.contains(&Encoding::Void) {
                    return Err(invalid());
                }
                Ok(Signature {
                    ret: *ret,
                    receiver: *receiver,
                    args: args.to_vec(),
                })
            }
            _ => Err(invalid()),
        }
    }

    /// Returns the return type.
    #[must_use]
    pub fn ret(&self) -> Encoding {
        self.ret
    }

    /// Returns the explicit argument types.
    #[must_use]
    pub fn args(&self) -> &[Encoding] {
        &self.args
    }

    /// Returns the number of explicit arguments.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Returns `true` if a call site with these types may invoke a method
    /// with this signature.
    #[must_use]
    pub fn accepts(&self, ret: Encoding, args: &[Encoding]) -> bool {
        self.ret == ret && self.args == args
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:", self.ret, self.receiver)?;
        self.args.iter().try_for_each(|arg| write!(f, "{arg}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let sig = Signature::parse("v@:").unwrap();
        assert_eq!(sig.ret(), Encoding::Void);
        assert_eq!(sig.arity(), 0);

        let sig = Signature::parse("B@:@#").unwrap();
        assert_eq!(sig.ret(), Encoding::Bool);
        assert_eq!(sig.args(), &[Encoding::Object, Encoding::Class]);

        let sig = Signature::parse("@#:q").unwrap();
        assert_eq!(sig.args(), &[Encoding::Long]);
    }

    #[test]
    fn test_parse_struct() {
        let sig = Signature::parse("{StrRef}@:{Point}d").unwrap();
        assert_eq!(sig.ret(), Encoding::Struct("StrRef"));
        assert_eq!(sig.args(), &[Encoding::Struct("Point"), Encoding::Double]);
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", "v", "v@", "v:@", "x@:", "v@:x", "v@:v", "v@:{Open", "v@:{}"] {
            assert_eq!(
                Signature::parse(bad),
                Err(Error::InvalidEncoding {
                    encoding: bad.to_owned()
                }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_round_trips_canonical_text() {
        for text in ["v@:", "q@:qq", "@@:@@", "@#:q", "{StrRef}@:", "d@:^:"] {
            assert_eq!(Signature::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_accepts() {
        let sig = Signature::parse("v@:d").unwrap();
        assert!(sig.accepts(Encoding::Void, &[Encoding::Double]));
        assert!(!sig.accepts(Encoding::Void, &[Encoding::Float]));
        assert!(!sig.accepts(Encoding::Double, &[Encoding::Double]));
        assert!(!sig.accepts(Encoding::Void, &[]));
    }

    #[test]
    fn test_struct_names_are_interned() {
        let a = Signature::parse("v@:{Interned}").unwrap();
        let b = Signature::parse("v@:{Interned}").unwrap();
        let (Encoding::Struct(x), Encoding::Struct(y)) = (a.args()[0], b.args()[0]) else {
            panic!("expected structure encodings");
        };
        assert!(std::ptr::eq(x, y));
    }
}
