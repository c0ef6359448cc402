//! Thread-local autorelease pools.
//!
//! An autoreleased object is owned by the innermost pool on the current
//! thread and released when that pool is popped. Pools nest; popping an outer
//! pool also drains every pool pushed after it.
//!
//! An [`AutoreleasePool`] guard dropped while a pool pushed after it is still
//! alive only retires its level; its objects drain once every later pool is
//! gone. Objects never leave the stack before a guard still borrowed for them.
//!
//! # Example
//!
//! ```rust
//! use oxidex_bridge::runtime::{self, autorelease, Class, ObjectPtr};
//!
//! runtime::init();
//! let class = Class::get("OxObject").unwrap();
//! autorelease::autoreleasepool(|_| {
//!     let obj = ObjectPtr::alloc(class);
//!     unsafe { autorelease::autorelease(obj) };
//!     assert_eq!(autorelease::pending(), 1);
//! });
//! assert_eq!(autorelease::pending(), 0);
//! ```

use crate::runtime::ObjectPtr;
use oxidex_log::{trace, warn};
use std::cell::RefCell;
use std::marker::PhantomData;

#[derive(Default)]
struct PoolStack {
    /// Pending releases, oldest first
    objects: Vec<ObjectPtr>,
    /// One entry per pushed pool
    marks: Vec<Mark>,
}

#[derive(Clone, Copy)]
struct Mark {
    /// Start index into `objects`
    start: usize,
    /// Cleared when a guard retires the pool before the pools above it
    live: bool,
}

impl PoolStack {
    /// Drops trailing retired levels and returns their objects.
    fn drain_retired(&mut self) -> Vec<ObjectPtr> {
        let mut start = self.objects.len();
        while let Some(mark) = self.marks.last().copied() {
            if mark.live {
                break;
            }
            start = mark.start;
            self.marks.pop();
        }
        self.objects.split_off(start)
    }
}

thread_local! {
    static POOLS: RefCell<PoolStack> = RefCell::new(PoolStack::default());
}

/// Pushes a new pool and returns its token (the pool depth before the push).
pub fn push() -> usize {
    POOLS.with_borrow_mut(|stack| {
        let token = stack.marks.len();
        stack.marks.push(Mark {
            start: stack.objects.len(),
            live: true,
        });
        token
    })
}

/// Pops the pool identified by `token`, along with any pool pushed after it,
/// releasing every object they hold. Unknown tokens are ignored.
///
/// # Safety
///
/// Every object autoreleased into the drained pools must still be alive,
/// which holds as long as nothing released them behind the pool's back. No
/// [`AutoreleasePool`] guard at or above `token` may still be borrowed.
pub unsafe fn pop(token: usize) {
    let drained = POOLS.with_borrow_mut(|stack| {
        if token >= stack.marks.len() {
            return Vec::new();
        }
        let start = stack.marks[token].start;
        stack.marks.truncate(token);
        stack.objects.split_off(start)
    });
    unsafe { release_drained(token, drained) };
}

/// Retires the pool `token`, draining it and any retired pool below it once
/// no live pool sits above.
unsafe fn retire(token: usize) {
    let drained = POOLS.with_borrow_mut(|stack| {
        match stack.marks.get_mut(token) {
            Some(mark) => mark.live = false,
            None => return Vec::new(),
        }
        stack.drain_retired()
    });
    unsafe { release_drained(token, drained) };
}

unsafe fn release_drained(token: usize, drained: Vec<ObjectPtr>) {
    if !drained.is_empty() {
        trace!("draining {} object(s) from pool {token}", drained.len());
    }
    // Released outside the borrow: a release may run arbitrary drop code
    for obj in drained.into_iter().rev() {
        unsafe { obj.release() };
    }
}

/// Hands one reference to `obj` to the innermost pool.
///
/// Without a pool the reference is leaked and a warning is logged.
///
/// # Safety
///
/// The caller must own the reference being transferred.
pub unsafe fn autorelease(obj: ObjectPtr) -> ObjectPtr {
    let pooled = POOLS.with_borrow_mut(|stack| {
        if stack.marks.is_empty() {
            return false;
        }
        stack.objects.push(obj);
        true
    });
    if !pooled {
        warn!(
            "{:p} autoreleased with no pool in place, just leaking",
            obj.as_raw()
        );
    }
    obj
}

/// Returns the number of pools on the current thread.
#[must_use]
pub fn depth() -> usize {
    POOLS.with_borrow(|stack| stack.marks.len())
}

/// Returns the number of objects waiting in all pools on the current thread.
#[must_use]
pub fn pending() -> usize {
    POOLS.with_borrow(|stack| stack.objects.len())
}

/// RAII guard for an autorelease pool.
///
/// The guard is neither `Send` nor `Sync`: a pool belongs to the thread that
/// pushed it. Dropping the guard (including during unwinding) drains it.
pub struct AutoreleasePool {
    token: usize,
    _not_send: PhantomData<*mut ()>,
}

impl AutoreleasePool {
    /// Pushes a new pool on the current thread.
    #[must_use]
    pub fn new() -> Self {
        AutoreleasePool {
            token: push(),
            _not_send: PhantomData,
        }
    }

    /// Returns this pool's depth token.
    #[must_use]
    pub fn token(&self) -> usize {
        self.token
    }

    /// Returns `true` if this is the pool new autoreleases go to.
    #[must_use]
    pub fn is_innermost(&self) -> bool {
        POOLS.with_borrow(|stack| {
            stack.marks.len() == self.token + 1 && stack.marks[self.token].live
        })
    }

    /// Panics unless this is the innermost pool.
    ///
    /// An object autoreleased while another pool sits above this one would
    /// drain with that pool, before a borrow of this one ends.
    #[track_caller]
    pub fn assert_innermost(&self) {
        if !self.is_innermost() {
            panic!(
                "autorelease pool {} is not the innermost pool (depth {})",
                self.token,
                depth()
            );
        }
    }
}

impl Default for AutoreleasePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AutoreleasePool {
    fn drop(&mut self) {
        // SAFETY: objects reach the pool only through `autorelease`, whose
        // callers transferred a live reference
        unsafe { retire(self.token) };
    }
}

/// Runs `f` inside a fresh autorelease pool.
///
/// Results borrowed from the pool cannot leave the closure:
///
/// ```compile_fail
/// use oxidex_bridge::bridge::{Autoreleased, Number};
/// use oxidex_bridge::runtime::autoreleasepool;
///
/// let escaped: Autoreleased<'_, Number> =
///     autoreleasepool(|pool| Number::with_integer(pool, 7).unwrap());
/// ```
pub fn autoreleasepool<R>(f: impl FnOnce(&AutoreleasePool) -> R) -> R {
    let pool = AutoreleasePool::new();
    f(&pool)
}
