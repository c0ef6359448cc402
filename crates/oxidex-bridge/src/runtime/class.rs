//! `Class` creation, method tables and inheritance for the runtime.
//!
//! This module implements the class system with:
//! - `Class` registration and lookup by name
//! - Single inheritance
//! - Separate instance and class method tables
//! - Per-class dispatch caches
//! - Protocol adoption with conformance validation
//!
//! # Architecture
//!
//! `Class`es are **globally registered** and never deallocated:
//! - Each class name maps to exactly one `Class` instance
//! - A `Class` is a `Copy` handle to leaked metadata
//! - Method tables may grow after creation; any addition bumps a global
//!   epoch that invalidates every dispatch cache lazily
//!
//! # Method Ownership
//!
//! Each [`Method`] records the ownership of the handle it returns. The
//! default comes from the selector's [`MethodFamily`]; registration can
//! override it with [`Method::returning`].
//!
//! # Thread Safety
//!
//! The class registry, method tables and caches are protected by `RwLock`s.
//! Classes may be created and extended from any thread.

use crate::error::{Error, Result};
use crate::runtime::{Ownership, Protocol, Selector, Signature};
use fxhash::FxHashMap;
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};

/// `Method` implementation function pointer type.
///
/// - `this`: the receiver, an object pointer for instance methods or a class
///   pointer for class methods
/// - `cmd`: the selector being sent
/// - `args`: array of pointers to argument storage, one per explicit argument
/// - `ret`: pointer to return storage (unused for `v` returns)
///
/// The `C-unwind` ABI lets runtime exceptions raised inside a method unwind
/// back through the send to the nearest guarded region.
///
/// # Safety
///
/// Implementations must only read arguments and write the return value with
/// the types declared in the method's signature.
pub type Imp = unsafe extern "C-unwind" fn(
    this: *mut c_void,
    cmd: Selector,
    args: *const *const c_void,
    ret: *mut c_void,
);

/// Selector naming families that return a +1 reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodFamily {
    Alloc,
    New,
    Copy,
    MutableCopy,
    Init,
}

impl MethodFamily {
    const PREFIXES: [(&'static str, MethodFamily); 5] = [
        ("alloc", MethodFamily::Alloc),
        ("new", MethodFamily::New),
        ("copy", MethodFamily::Copy),
        ("mutableCopy", MethodFamily::MutableCopy),
        ("init", MethodFamily::Init),
    ];

    /// Classifies a selector name.
    ///
    /// A name belongs to a family when, after leading underscores, it starts
    /// with the family word and the word is not followed by a lowercase letter.
    ///
    /// ```rust
    /// use oxidex_bridge::runtime::MethodFamily;
    ///
    /// assert_eq!(MethodFamily::of_name("initWithStr:"), Some(MethodFamily::Init));
    /// assert_eq!(MethodFamily::of_name("new"), Some(MethodFamily::New));
    /// assert_eq!(MethodFamily::of_name("newest"), None);
    /// assert_eq!(MethodFamily::of_name("stringWithStr:"), None);
    /// ```
    #[must_use]
    pub fn of_name(name: &str) -> Option<MethodFamily> {
        let name = name.trim_start_matches('_');
        Self::PREFIXES.iter().find_map(|&(word, family)| {
            let rest = name.strip_prefix(word)?;
            match rest.chars().next() {
                Some(ch) if ch.is_ascii_lowercase() => None,
                _ => Some(family),
            }
        })
    }

    /// Classifies a selector.
    #[must_use]
    pub fn of(selector: Selector) -> Option<MethodFamily> {
        Self::of_name(selector.name())
    }

    /// Returns the ownership a method named `name` conventionally returns.
    #[must_use]
    pub fn conventional_ownership(name: &str) -> Ownership {
        match Self::of_name(name) {
            Some(_) => Ownership::Retained,
            None => Ownership::NotRetained,
        }
    }
}

/// Which method table a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Instance,
    Class,
}

/// A registered method: selector, implementation, signature and the
/// ownership of its returned handle.
///
/// `Method`s are immutable after creation and `Copy`.
#[derive(Clone, Copy)]
pub struct Method {
    selector: Selector,
    imp: Imp,
    signature: &'static Signature,
    ownership: Ownership,
}

impl Method {
    /// Creates a method from an encoding string such as `"@@:q"`.
    ///
    /// The return ownership defaults to the selector's family convention.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEncoding`] if `types` is not a valid
    /// signature.
    pub fn new(selector: Selector, imp: Imp, types: &str) -> Result<Method> {
        let signature: &'static Signature = Box::leak(Box::new(Signature::parse(types)?));
        Ok(Method {
            selector,
            imp,
            signature,
            ownership: MethodFamily::conventional_ownership(selector.name()),
        })
    }

    /// Overrides the ownership of the returned handle.
    #[must_use]
    pub fn returning(mut self, ownership: Ownership) -> Method {
        self.ownership = ownership;
        self
    }

    #[must_use]
    pub fn selector(&self) -> Selector {
        self.selector
    }

    #[must_use]
    pub fn imp(&self) -> Imp {
        self.imp
    }

    #[must_use]
    pub fn signature(&self) -> &'static Signature {
        self.signature
    }

    #[must_use]
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("selector", &self.selector.name())
            .field("imp", &format_args!("{:p}", self.imp as *const ()))
            .field("types", &format_args!("{}", self.signature))
            .field("ownership", &self.ownership)
            .finish()
    }
}

/// Global method epoch. Bumped on every method table change.
static EPOCH: AtomicU64 = AtomicU64::new(0);

/// Dispatch cache. Entries are only valid for the epoch they were filled in.
#[derive(Default)]
struct MethodCache {
    epoch: u64,
    entries: FxHashMap<(Selector, MethodKind), Method>,
}

/// Class metadata. Leaked on creation, never freed.
pub(crate) struct ClassInner {
    name: &'static str,
    superclass: Option<Class>,
    instance_methods: RwLock<FxHashMap<Selector, Method>>,
    class_methods: RwLock<FxHashMap<Selector, Method>>,
    cache: RwLock<MethodCache>,
    protocols: RwLock<Vec<Protocol>>,
}

type ClassRegistry = RwLock<FxHashMap<&'static str, Class>>;

static REGISTRY: OnceLock<ClassRegistry> = OnceLock::new();

fn registry() -> &'static ClassRegistry {
    REGISTRY.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// `Class` represents a runtime class definition with methods and inheritance.
///
/// # Representation
///
/// `#[repr(transparent)]` over a `'static` reference, so `Option<Class>`
/// crosses the C ABI as a nullable class pointer.
///
/// # Example
///
/// ```rust
/// use oxidex_bridge::runtime::Class;
///
/// let root = Class::new_root("DocRoot").unwrap();
/// let child = Class::new("DocChild", root).unwrap();
///
/// assert!(child.is_subclass_of(root));
/// assert_eq!(Class::get("DocChild"), Some(child));
/// ```
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct Class(&'static ClassInner);

impl Class {
    /// Creates a new root class (no superclass).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassAlreadyExists`] if the name is taken.
    pub fn new_root(name: &str) -> Result<Class> {
        Self::create(name, None)
    }

    /// Creates a new class inheriting from `superclass`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassAlreadyExists`] if the name is taken.
    pub fn new(name: &str, superclass: Class) -> Result<Class> {
        Self::create(name, Some(superclass))
    }

    fn create(name: &str, superclass: Option<Class>) -> Result<Class> {
        let mut classes = registry().write().unwrap();
        if classes.contains_key(name) {
            return Err(Error::ClassAlreadyExists {
                name: name.to_owned(),
            });
        }

        let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let inner: &'static ClassInner = Box::leak(Box::new(ClassInner {
            name,
            superclass,
            instance_methods: RwLock::new(FxHashMap::default()),
            class_methods: RwLock::new(FxHashMap::default()),
            cache: RwLock::new(MethodCache::default()),
            protocols: RwLock::new(Vec::new()),
        }));
        let class = Class(inner);
        classes.insert(name, class);
        Ok(class)
    }

    /// Looks up a registered class by name.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn get(name: &str) -> Option<Class> {
        registry().read().unwrap().get(name).copied()
    }

    /// Returns the class name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.0.name
    }

    /// Returns the superclass, or `None` for a root class.
    #[must_use]
    pub fn superclass(self) -> Option<Class> {
        self.0.superclass
    }

    /// Returns `true` if `class` is this class or one of its ancestors.
    #[must_use]
    pub fn is_subclass_of(self, class: Class) -> bool {
        std::iter::successors(Some(self), |c| c.superclass()).any(|c| c == class)
    }

    /// Adds or replaces an instance method, returning the replaced one.
    ///
    /// # Panics
    ///
    /// Panics if the method table lock is poisoned.
    pub fn add_method(self, method: Method) -> Option<Method> {
        self.insert(MethodKind::Instance, method)
    }

    /// Adds or replaces a class method, returning the replaced one.
    ///
    /// # Panics
    ///
    /// Panics if the method table lock is poisoned.
    pub fn add_class_method(self, method: Method) -> Option<Method> {
        self.insert(MethodKind::Class, method)
    }

    fn table(self, kind: MethodKind) -> &'static RwLock<FxHashMap<Selector, Method>> {
        match kind {
            MethodKind::Instance => &self.0.instance_methods,
            MethodKind::Class => &self.0.class_methods,
        }
    }

    fn insert(self, kind: MethodKind, method: Method) -> Option<Method> {
        let previous = self.table(kind).write().unwrap().insert(method.selector, method);
        // Subclass caches may hold the old resolution too
        EPOCH.fetch_add(1, Ordering::AcqRel);
        previous
    }

    /// Looks up an instance method, searching the inheritance chain.
    ///
    /// # Panics
    ///
    /// Panics if a method table or cache lock is poisoned.
    #[must_use]
    pub fn lookup_method(self, selector: Selector) -> Option<Method> {
        self.lookup(selector, MethodKind::Instance)
    }

    /// Looks up a class method, searching the inheritance chain.
    ///
    /// # Panics
    ///
    /// Panics if a method table or cache lock is poisoned.
    #[must_use]
    pub fn lookup_class_method(self, selector: Selector) -> Option<Method> {
        self.lookup(selector, MethodKind::Class)
    }

    /// Cached lookup.
    ///
    /// Misses are not cached; a later `add_method` would have to invalidate
    /// them anyway.
    fn lookup(self, selector: Selector, kind: MethodKind) -> Option<Method> {
        let epoch = EPOCH.load(Ordering::Acquire);
        {
            let cache = self.0.cache.read().unwrap();
            if cache.epoch == epoch {
                if let Some(method) = cache.entries.get(&(selector, kind)) {
                    return Some(*method);
                }
            }
        }

        let method = std::iter::successors(Some(self), |c| c.superclass())
            .find_map(|c| c.table(kind).read().unwrap().get(&selector).copied())?;

        let mut cache = self.0.cache.write().unwrap();
        if cache.epoch < epoch {
            cache.entries.clear();
            cache.epoch = epoch;
        }
        if cache.epoch == epoch {
            cache.entries.insert((selector, kind), method);
        }
        Some(method)
    }

    /// Returns `true` if instances respond to `selector`.
    #[must_use]
    pub fn responds_to(self, selector: Selector) -> bool {
        self.lookup_method(selector).is_some()
    }

    /// Adopts `protocol` after checking that every required selector is
    /// implemented (directly or inherited).
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolAlreadyAdopted`] if this class already adopts it
    /// - [`Error::MissingProtocolMethod`] for the first unimplemented selector
    ///
    /// # Panics
    ///
    /// Panics if the protocol list lock is poisoned.
    pub fn add_protocol(self, protocol: Protocol) -> Result<()> {
        let mut protocols = self.0.protocols.write().unwrap();
        if protocols.contains(&protocol) {
            return Err(Error::ProtocolAlreadyAdopted {
                class: self.name().to_owned(),
                protocol: protocol.name().to_owned(),
            });
        }

        if let Some(missing) = protocol
            .required()
            .into_iter()
            .find(|sel| !self.responds_to(*sel))
        {
            return Err(Error::MissingProtocolMethod {
                protocol: protocol.name().to_owned(),
                selector: missing.name().to_owned(),
            });
        }

        protocols.push(protocol);
        Ok(())
    }

    /// Returns `true` if this class or an ancestor adopts `protocol`.
    #[must_use]
    pub fn conforms_to(self, protocol: Protocol) -> bool {
        std::iter::successors(Some(self), |c| c.superclass())
            .any(|c| c.0.protocols.read().unwrap().contains(&protocol))
    }

    /// Returns the protocols adopted directly by this class.
    #[must_use]
    pub fn protocols(self) -> Vec<Protocol> {
        self.0.protocols.read().unwrap().clone()
    }

    /// Returns the raw pointer used at the C boundary and as the receiver of
    /// class methods.
    #[must_use]
    pub fn as_ptr(self) -> *mut c_void {
        std::ptr::from_ref(self.0).cast_mut().cast()
    }

    /// Rebuilds a class from a pointer obtained through [`Class::as_ptr`].
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a value previously returned by `as_ptr`.
    #[must_use]
    pub unsafe fn from_ptr(ptr: *const c_void) -> Option<Class> {
        // SAFETY: class metadata is leaked, so a valid pointer is 'static
        NonNull::new(ptr.cast_mut().cast::<ClassInner>()).map(|p| Class(unsafe { p.as_ref() }))
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Class {}

impl std::hash::Hash for Class {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state);
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Class").field(&self.0.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::dispatch::set_return;
    use std::sync::atomic::AtomicUsize;

    static NEXT: AtomicUsize = AtomicUsize::new(0);

    fn unique(prefix: &str) -> String {
        format!("{prefix}{}", NEXT.fetch_add(1, Ordering::Relaxed))
    }

    unsafe extern "C-unwind" fn returns_one(
        _this: *mut c_void,
        _cmd: Selector,
        _args: *const *const c_void,
        ret: *mut c_void,
    ) {
        unsafe { set_return(ret, 1i64) };
    }

    unsafe extern "C-unwind" fn returns_two(
        _this: *mut c_void,
        _cmd: Selector,
        _args: *const *const c_void,
        ret: *mut c_void,
    ) {
        unsafe { set_return(ret, 2i64) };
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let name = unique("Dup");
        Class::new_root(&name).unwrap();
        assert_eq!(
            Class::new_root(&name).unwrap_err(),
            Error::ClassAlreadyExists { name: name.clone() }
        );
    }

    #[test]
    fn test_inheritance_chain() {
        let root = Class::new_root(&unique("Root")).unwrap();
        let child = Class::new(&unique("Child"), root).unwrap();
        let grandchild = Class::new(&unique("Grand"), child).unwrap();

        assert!(grandchild.is_subclass_of(child));
        assert!(grandchild.is_subclass_of(root));
        assert!(grandchild.is_subclass_of(grandchild));
        assert!(!root.is_subclass_of(child));
        assert_eq!(grandchild.superclass(), Some(child));
        assert_eq!(root.superclass(), None);
    }

    #[test]
    fn test_method_inherited_and_overridden() {
        let sel = Selector::register("classTestValue");
        let root = Class::new_root(&unique("Root")).unwrap();
        let child = Class::new(&unique("Child"), root).unwrap();

        root.add_method(Method::new(sel, returns_one, "q@:").unwrap());
        let inherited = child.lookup_method(sel).unwrap();
        assert_eq!(inherited.imp() as usize, returns_one as usize);

        // Override after the child cached the inherited method
        child.add_method(Method::new(sel, returns_two, "q@:").unwrap());
        assert_eq!(child.lookup_method(sel).unwrap().imp() as usize, returns_two as usize);
        assert_eq!(root.lookup_method(sel).unwrap().imp() as usize, returns_one as usize);
    }

    #[test]
    fn test_instance_and_class_tables_are_separate() {
        let sel = Selector::register("separateTables");
        let class = Class::new_root(&unique("Tables")).unwrap();
        class.add_class_method(Method::new(sel, returns_one, "q#:").unwrap());

        assert!(class.lookup_class_method(sel).is_some());
        assert!(class.lookup_method(sel).is_none());
        assert!(!class.responds_to(sel));
    }

    #[test]
    fn test_add_method_returns_previous() {
        let sel = Selector::register("replaced");
        let class = Class::new_root(&unique("Replace")).unwrap();
        assert!(class.add_method(Method::new(sel, returns_one, "q@:").unwrap()).is_none());
        let previous = class.add_method(Method::new(sel, returns_two, "q@:").unwrap());
        assert_eq!(previous.unwrap().imp() as usize, returns_one as usize);
    }

    #[test]
    fn test_method_family_ownership() {
        let alloc = Method::new(Selector::register("alloc"), returns_one, "q#:").unwrap();
        let init = Method::new(Selector::register("initWithValue:"), returns_one, "q@:q").unwrap();
        let copy = Method::new(Selector::register("copy"), returns_one, "q@:").unwrap();
        let getter = Method::new(Selector::register("value"), returns_one, "q@:").unwrap();
        let copyright = Method::new(Selector::register("copyright"), returns_one, "q@:").unwrap();

        assert_eq!(alloc.ownership(), Ownership::Retained);
        assert_eq!(init.ownership(), Ownership::Retained);
        assert_eq!(copy.ownership(), Ownership::Retained);
        assert_eq!(getter.ownership(), Ownership::NotRetained);
        assert_eq!(copyright.ownership(), Ownership::NotRetained);
        assert_eq!(getter.returning(Ownership::Retained).ownership(), Ownership::Retained);
    }

    #[test]
    fn test_method_family_prefixes() {
        assert_eq!(MethodFamily::of_name("_init"), Some(MethodFamily::Init));
        assert_eq!(MethodFamily::of_name("mutableCopy"), Some(MethodFamily::MutableCopy));
        assert_eq!(MethodFamily::of_name("newPort"), Some(MethodFamily::New));
        assert_eq!(MethodFamily::of_name("initialize"), None);
        assert_eq!(MethodFamily::of_name("description"), None);
    }

    #[test]
    fn test_invalid_encoding_rejected() {
        let err = Method::new(Selector::register("bad"), returns_one, "q@").unwrap_err();
        assert_eq!(err, Error::InvalidEncoding { encoding: "q@".into() });
    }

    #[test]
    fn test_class_ptr_round_trip() {
        let class = Class::new_root(&unique("Ptr")).unwrap();
        assert_eq!(unsafe { Class::from_ptr(class.as_ptr()) }, Some(class));
        assert_eq!(unsafe { Class::from_ptr(std::ptr::null()) }, None);
    }

    #[test]
    fn test_protocol_conformance() {
        let sel = Selector::register("protocolRequirement");
        let proto = Protocol::new(&unique("Proto")).unwrap();
        proto.add_required(sel);

        let class = Class::new_root(&unique("Conformer")).unwrap();
        assert_eq!(
            class.add_protocol(proto),
            Err(Error::MissingProtocolMethod {
                protocol: proto.name().to_owned(),
                selector: "protocolRequirement".to_owned(),
            })
        );

        class.add_method(Method::new(sel, returns_one, "q@:").unwrap());
        class.add_protocol(proto).unwrap();
        assert!(class.conforms_to(proto));
        assert!(matches!(
            class.add_protocol(proto),
            Err(Error::ProtocolAlreadyAdopted { .. })
        ));

        let sub = Class::new(&unique("SubConformer"), class).unwrap();
        assert!(sub.conforms_to(proto));
        assert!(sub.protocols().is_empty());
    }
}
