//! The dynamic object runtime the bridge sends messages into.
//!
//! This is a compact message-passing runtime in the Objective-C mould:
//!
//! - [`selector`]: interned message names
//! - [`class`]: classes, method tables, dispatch caches and method families
//! - [`object`]: reference-counted instances with a typed payload
//! - [`encoding`]: method signatures checked on every send
//! - [`dispatch`]: `send_message` and helpers for writing implementations
//! - [`autorelease`]: thread-local autorelease pools
//! - [`exception`]: unwind-based throw and catch
//! - [`protocol`]: required-selector protocols
//! - [`weak`]: zeroing weak references
//! - [`builtins`]: `OxObject`, `OxString`, `OxNumber`, `OxException`, `OxPort`
//!
//! Everything here works on raw handles. The typed, ownership-aware surface
//! lives in [`crate::bridge`].
//!
//! # Example
//!
//! ```rust
//! use oxidex_bridge::runtime::{self, Class};
//!
//! runtime::init();
//! let string = Class::get("OxString").unwrap();
//! assert_eq!(string.superclass().unwrap().name(), "OxObject");
//! ```

pub mod autorelease;
pub mod builtins;
pub mod class;
pub mod dispatch;
pub mod encoding;
pub mod exception;
pub mod object;
pub mod protocol;
pub mod selector;
pub mod weak;

pub use autorelease::{AutoreleasePool, autoreleasepool};
pub use builtins::StrRef;
pub use class::{Class, Imp, Method, MethodFamily, MethodKind};
pub use dispatch::Receiver;
pub use encoding::{Encoding, Signature};
pub use object::{ObjectPtr, Ownership};
pub use protocol::Protocol;
pub use selector::Selector;
pub use weak::WeakRef;

/// Installs the built-in classes and applies any `OXIDEX_LOG` directives.
/// Idempotent and thread-safe.
///
/// Every entry point that needs the built-ins calls this itself; calling it
/// up front only moves the one-time cost.
pub fn init() {
    oxidex_log::init_from_env();
    builtins::builtins();
}
