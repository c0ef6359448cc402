//! `Selector` interning for the runtime.
//!
//! Each unique message name maps to exactly one [`Selector`], so comparison is
//! pointer equality and the hash is computed once at interning time.

// SHARD_MASK is 15, the truncation is intentional
#![allow(clippy::cast_possible_truncation)]
//!
//! # Architecture
//!
//! Interned selectors are leaked and live for the whole process:
//! - Each unique name maps to exactly one `Selector` instance
//! - Pointers are stable, so a `Selector` is a plain `Copy` handle
//! - The FFI representation is a single non-null pointer
//!
//! # Thread Safety
//!
//! The registry is split into `NUM_SHARDS` independent shards, each behind its
//! own `RwLock`. A cache hit takes one read lock on one shard; a miss takes
//! one write lock and double-checks before inserting.

use crate::error::{Error, Result};
use fxhash::FxHashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// Number of shards in the selector registry (power of 2 for fast bit masking).
const NUM_SHARDS: usize = 16;

/// Bit mask for shard selection (`NUM_SHARDS` - 1).
const SHARD_MASK: usize = NUM_SHARDS - 1;

/// Interned selector data. Leaked on creation, never freed.
struct InternedSelector {
    name: &'static str,
    hash: u64,
}

type Shard = RwLock<FxHashMap<&'static str, &'static InternedSelector>>;

static REGISTRY: OnceLock<Box<[Shard]>> = OnceLock::new();

fn shards() -> &'static [Shard] {
    REGISTRY.get_or_init(|| {
        (0..NUM_SHARDS)
            .map(|_| RwLock::new(FxHashMap::default()))
            .collect()
    })
}

/// `Selector` represents a unique message name in the runtime.
///
/// `Selector`s are **globally interned**: interning the same name twice yields
/// the same handle, on any thread.
///
/// # Representation
///
/// `#[repr(transparent)]` over a non-null pointer, so `Selector` and
/// `Option<Selector>` can cross the C ABI directly (a null selector maps to
/// `None`).
///
/// # Example
///
/// ```rust
/// use oxidex_bridge::runtime::Selector;
///
/// let a = Selector::register("initWithStr:");
/// let b = Selector::register("initWithStr:");
/// assert_eq!(a, b);
/// assert_eq!(a.name(), "initWithStr:");
/// ```
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct Selector(NonNull<InternedSelector>);

// SAFETY: the pointee is leaked, immutable and valid for the whole process.
unsafe impl Send for Selector {}
unsafe impl Sync for Selector {}

impl Selector {
    /// Returns the selector for `name`, interning it on first use.
    ///
    /// Interning never fails; any string, including an empty one, becomes a
    /// selector. Use [`str::parse`] to reject empty names.
    ///
    /// # Panics
    ///
    /// Panics if a registry shard lock is poisoned.
    #[must_use]
    pub fn register(name: &str) -> Selector {
        let hash = fxhash::hash64(name);
        let shard = &shards()[(hash as usize) & SHARD_MASK];

        // Fast path: read lock only
        if let Some(interned) = shard.read().unwrap().get(name) {
            return Selector(NonNull::from(*interned));
        }

        let mut map = shard.write().unwrap();
        // Another thread may have inserted while we waited for the write lock
        if let Some(interned) = map.get(name) {
            return Selector(NonNull::from(*interned));
        }

        let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let interned: &'static InternedSelector =
            Box::leak(Box::new(InternedSelector { name, hash }));
        map.insert(name, interned);
        Selector(NonNull::from(interned))
    }

    /// Returns the selector for `name` only if it has already been interned.
    ///
    /// # Panics
    ///
    /// Panics if a registry shard lock is poisoned.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Selector> {
        let hash = fxhash::hash64(name);
        let shard = &shards()[(hash as usize) & SHARD_MASK];
        shard
            .read()
            .unwrap()
            .get(name)
            .map(|interned| Selector(NonNull::from(*interned)))
    }

    /// Returns the selector's name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.interned().name
    }

    /// Returns the precomputed hash of the selector name.
    #[must_use]
    pub fn hash(self) -> u64 {
        self.interned().hash
    }

    /// Returns the number of arguments implied by the name (one per colon).
    ///
    /// ```rust
    /// use oxidex_bridge::runtime::Selector;
    ///
    /// assert_eq!(Selector::register("length").arity(), 0);
    /// assert_eq!(Selector::register("exceptionWithName:reason:").arity(), 2);
    /// ```
    #[must_use]
    pub fn arity(self) -> usize {
        self.name().bytes().filter(|&b| b == b':').count()
    }

    /// Returns the raw pointer used at the C boundary.
    #[must_use]
    pub fn as_ptr(self) -> *const std::ffi::c_void {
        self.0.as_ptr().cast()
    }

    /// Rebuilds a selector from a pointer obtained through [`Selector::as_ptr`].
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a value previously returned by `as_ptr`.
    #[must_use]
    pub unsafe fn from_ptr(ptr: *const std::ffi::c_void) -> Option<Selector> {
        NonNull::new(ptr.cast_mut().cast()).map(Selector)
    }

    fn interned(self) -> &'static InternedSelector {
        // SAFETY: every Selector points at a leaked InternedSelector
        unsafe { self.0.as_ref() }
    }
}

impl FromStr for Selector {
    type Err = Error;

    /// Interns `name`, rejecting the empty string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] if `name` is empty.
    fn from_str(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidSelector);
        }
        Ok(Selector::register(name))
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        // Interning guarantees one pointer per name
        self.0 == other.0
    }
}

impl Eq for Selector {}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(Selector::hash(*self));
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("name", &self.name())
            .field("hash", &format_args!("{:#x}", Selector::hash(*self)))
            .finish()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
