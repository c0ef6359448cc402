//! Zeroing weak references.
//!
//! A [`WeakRef`] names an object without keeping it alive. When the object is
//! freed every weak reference to it is cleared, so a later [`WeakRef::load`]
//! sees `None` instead of a dangling pointer.
//!
//! # Thread Safety
//!
//! One global table maps each weakly referenced object to the slots naming
//! it. Loads, stores and the clearing done at deallocation all take the table
//! lock, so a load either retains the object before its last release or finds
//! the slot already cleared.

use crate::runtime::ObjectPtr;
use fxhash::FxHashMap;
use oxidex_log::trace;
use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Mutex, OnceLock};

/// Object address to the addresses of the slots naming it.
type WeakTable = FxHashMap<usize, Vec<usize>>;

static WEAK_TABLE: OnceLock<Mutex<WeakTable>> = OnceLock::new();

fn table() -> &'static Mutex<WeakTable> {
    WEAK_TABLE.get_or_init(|| Mutex::new(FxHashMap::default()))
}

fn unregister(table: &mut WeakTable, target: *mut c_void, slot: usize) {
    let key = target as usize;
    if let Some(slots) = table.get_mut(&key) {
        slots.retain(|&s| s != slot);
        if slots.is_empty() {
            table.remove(&key);
        }
    }
}

/// Clears every weak reference to `obj`. Called once, when its last strong
/// reference goes away and before its memory is freed.
pub(crate) fn clear(obj: ObjectPtr) {
    let mut table = table().lock().unwrap();
    let Some(slots) = table.remove(&(obj.as_raw() as usize)) else {
        return;
    };
    trace!("clearing {} weak reference(s) to {:p}", slots.len(), obj.as_raw());
    for slot in slots {
        // SAFETY: registered slots stay boxed until their WeakRef drops,
        // which unregisters them under this lock first
        unsafe { (*(slot as *const AtomicPtr<c_void>)).store(ptr::null_mut(), Ordering::Release) };
    }
}

/// A weak reference that is cleared when its target is freed.
pub struct WeakRef {
    /// Boxed so the address registered in the table is stable
    slot: Box<AtomicPtr<c_void>>,
}

impl WeakRef {
    /// Creates an empty weak reference.
    #[must_use]
    pub fn new() -> Self {
        WeakRef {
            slot: Box::new(AtomicPtr::new(ptr::null_mut())),
        }
    }

    fn slot_addr(&self) -> usize {
        ptr::from_ref::<AtomicPtr<c_void>>(&*self.slot) as usize
    }

    /// Points the reference at `target`, or clears it.
    ///
    /// # Safety
    ///
    /// `target` must be alive.
    pub unsafe fn store(&self, target: Option<ObjectPtr>) {
        let mut table = table().lock().unwrap();
        let old = self.slot.load(Ordering::Acquire);
        if !old.is_null() {
            unregister(&mut table, old, self.slot_addr());
        }
        let new = target.map_or(ptr::null_mut(), ObjectPtr::as_raw);
        if let Some(obj) = target {
            unsafe { obj.mark_weakly_referenced() };
            table.entry(new as usize).or_default().push(self.slot_addr());
        }
        self.slot.store(new, Ordering::Release);
    }

    /// Returns a +1 reference to the target, or `None` once it is freed.
    #[must_use]
    pub fn load(&self) -> Option<ObjectPtr> {
        let _table = table().lock().unwrap();
        // SAFETY: a non-null slot names an object whose deallocation has not
        // cleared it yet, and clearing needs the lock held here
        let obj = unsafe { ObjectPtr::from_raw(self.slot.load(Ordering::Acquire)) }?;
        unsafe { obj.try_retain() }.then_some(obj)
    }

    /// Returns `true` if the reference is currently cleared.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.slot.load(Ordering::Acquire).is_null()
    }
}

impl Default for WeakRef {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WeakRef {
    fn drop(&mut self) {
        let mut table = table().lock().unwrap();
        let target = self.slot.load(Ordering::Acquire);
        if !target.is_null() {
            unregister(&mut table, target, self.slot_addr());
        }
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakRef({:p})", self.slot.load(Ordering::Acquire))
    }
}
