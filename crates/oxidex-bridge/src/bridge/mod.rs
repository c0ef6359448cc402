//! The typed bridge over the runtime.
//!
//! - [`registry`]: class tokens, selectors and symbol tables
//! - [`ownership`]: typed handles, `Retained` / `Autoreleased`, ownership tables
//! - [`encode`]: static type encodings for arguments and results
//! - [`trampoline`]: the call shapes and their declaration macros
//! - [`exception`]: guarded calls, raise and inspection
//! - [`adapter`]: port delegates backed by C callback tables
//! - [`base`]: typed handles for the built-in classes
//! - [`ffi`]: the C surface
//!
//! # Example
//!
//! ```rust
//! use oxidex_bridge::bridge::{Exception, String, try_catch};
//! use oxidex_bridge::runtime::AutoreleasePool;
//!
//! let pool = AutoreleasePool::new();
//! let name = String::with_str(&pool, "OxDemoException".into()).unwrap();
//! let reason = String::with_str(&pool, "demo".into()).unwrap();
//! let exception = Exception::with_name_reason(&pool, &name, &reason).unwrap();
//!
//! let caught = exception.try_raise().unwrap_err();
//! assert!(try_catch(|| 1 + 1).is_ok());
//! assert_eq!(oxidex_bridge::bridge::exception_message(&caught).as_deref(), Some("demo"));
//! ```

pub mod adapter;
pub mod base;
pub mod encode;
pub mod exception;
pub mod ffi;
pub mod ownership;
pub mod registry;
pub mod trampoline;

pub use adapter::{CallbackTable, EventCallback, PortDelegate, make_adapter};
pub use base::{
    BaseSymbols, Exception, Number, OWNERSHIP_TABLE, Object, Port, String, base_symbols,
};
pub use encode::{Encode, EncodeReturn, MessageArguments, RawId};
pub use exception::{exception_message, guarded_call, raise, throw_value, try_catch};
pub use ownership::{
    Autoreleased, Id, Instantiation, Message, ReturnConvention, Retained, ReturnsNotRetained,
    ReturnsRetained, Shape, review,
};
pub use registry::{ClassToken, preload, resolve_class, resolve_selector};
