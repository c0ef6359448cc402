//! # `OxideX` Bridge
//!
//! Typed calls into a dynamic message-passing object runtime.
//!
//! The crate has two layers:
//!
//! - [`runtime`]: a compact runtime in the Objective-C mould. Selectors,
//!   classes with instance and class method tables, reference-counted
//!   objects, autorelease pools, protocols and unwind-based exceptions.
//! - [`bridge`]: the layer a caller actually uses. Symbol tables resolved
//!   once, trampolines that turn typed Rust calls into checked sends, the
//!   retained / autoreleased return contract, guarded calls that turn
//!   exceptions into values, and a C callback adapter.
//!
//! ## Quick Start
//!
//! ```rust
//! use oxidex_bridge::bridge::{Number, String};
//! use oxidex_bridge::runtime::autoreleasepool;
//!
//! autoreleasepool(|pool| {
//!     // Class-call, not retained: borrows the pool
//!     let n = Number::with_integer(pool, 7).unwrap();
//!     assert_eq!(n.integer_value(), 7);
//!
//!     // Allocate-call: always retained, released on drop
//!     let s = String::init_with_str("hi".into()).unwrap();
//!     assert_eq!(s.as_str(), "hi");
//! });
//! ```
//!
//! ## Features
//!
//! - `exception-backtrace`: capture a call stack in every raised exception
//! - `dispatch-trace`: log every send at trace level

pub mod bridge;
pub mod error;
pub mod runtime;

pub use error::{Error, Result};
