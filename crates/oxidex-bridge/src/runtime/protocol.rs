//! Protocols: named sets of required selectors.
//!
//! A class adopts a protocol through [`Class::add_protocol`], which checks
//! that every required selector is implemented. The bridge uses this to mark
//! callback adapters as conforming to the capability an event source expects.
//!
//! [`Class::add_protocol`]: crate::runtime::Class::add_protocol

use crate::error::{Error, Result};
use crate::runtime::Selector;
use fxhash::FxHashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

/// Protocol metadata. Leaked on creation, never freed.
pub(crate) struct ProtocolInner {
    name: &'static str,
    required: RwLock<Vec<Selector>>,
}

static REGISTRY: OnceLock<RwLock<FxHashMap<&'static str, Protocol>>> = OnceLock::new();

fn registry() -> &'static RwLock<FxHashMap<&'static str, Protocol>> {
    REGISTRY.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Handle to a registered protocol.
///
/// # Example
///
/// ```rust
/// use oxidex_bridge::runtime::{Protocol, Selector};
///
/// let proto = Protocol::new("DocDelegate").unwrap();
/// proto.add_required(Selector::register("handleEvent:"));
/// assert_eq!(Protocol::get("DocDelegate"), Some(proto));
/// assert_eq!(proto.required().len(), 1);
/// ```
#[derive(Clone, Copy)]
pub struct Protocol(&'static ProtocolInner);

impl Protocol {
    /// Registers a new protocol.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolAlreadyExists`] if the name is taken.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub fn new(name: &str) -> Result<Protocol> {
        let mut protocols = registry().write().unwrap();
        if protocols.contains_key(name) {
            return Err(Error::ProtocolAlreadyExists {
                name: name.to_owned(),
            });
        }

        let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let protocol = Protocol(Box::leak(Box::new(ProtocolInner {
            name,
            required: RwLock::new(Vec::new()),
        })));
        protocols.insert(name, protocol);
        Ok(protocol)
    }

    /// Looks up a registered protocol by name.
    #[must_use]
    pub fn get(name: &str) -> Option<Protocol> {
        registry().read().unwrap().get(name).copied()
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.0.name
    }

    /// Adds a required selector. Adding the same selector twice is a no-op.
    ///
    /// Classes that adopted the protocol earlier are not re-validated.
    pub fn add_required(self, selector: Selector) {
        let mut required = self.0.required.write().unwrap();
        if !required.contains(&selector) {
            required.push(selector);
        }
    }

    /// Returns the required selectors in insertion order.
    #[must_use]
    pub fn required(self) -> Vec<Selector> {
        self.0.required.read().unwrap().clone()
    }
}

impl PartialEq for Protocol {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Protocol {}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.0.name)
            .field("required", &self.required())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_protocol_rejected() {
        Protocol::new("DuplicateProtocolTest").unwrap();
        assert_eq!(
            Protocol::new("DuplicateProtocolTest"),
            Err(Error::ProtocolAlreadyExists {
                name: "DuplicateProtocolTest".into()
            })
        );
    }

    #[test]
    fn test_required_deduplicated() {
        let proto = Protocol::new("RequiredDedupTest").unwrap();
        let sel = Selector::register("onlyOnce");
        proto.add_required(sel);
        proto.add_required(sel);
        assert_eq!(proto.required(), vec![sel]);
    }

    #[test]
    fn test_unknown_protocol() {
        assert!(Protocol::get("NoSuchProtocolRegistered").is_none());
    }
}
