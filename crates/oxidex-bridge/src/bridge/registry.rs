//! Symbol registry: class tokens and selectors resolved once per process.
//!
//! Symbols are grouped into tables declared with [`symbol_table!`]. A table
//! is resolved as one unit on first access, behind a `OnceLock`, so every
//! trampoline that reads it sees a fully initialized table no matter which
//! thread got there first.
//!
//! A class that does not exist resolves to [`ClassToken::NULL`]. Sending a
//! class message through a null token is a precondition violation and
//! panics; it is never turned into a runtime exception.
//!
//! [`symbol_table!`]: crate::symbol_table

use crate::bridge::{adapter, base};
use crate::runtime::{self, Class, Selector};
use oxidex_log::{debug, error, warn};
use std::fmt;

/// A possibly-null class handle, resolved by name.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClassToken(Option<Class>);

impl ClassToken {
    /// The token of a class that could not be resolved.
    pub const NULL: ClassToken = ClassToken(None);

    #[must_use]
    pub const fn new(class: Class) -> ClassToken {
        ClassToken(Some(class))
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0.is_none()
    }

    #[must_use]
    pub const fn try_class(self) -> Option<Class> {
        self.0
    }

    /// Returns the class.
    ///
    /// # Panics
    ///
    /// Panics if the token is null.
    #[track_caller]
    #[must_use]
    pub fn class(self) -> Class {
        match self.0 {
            Some(class) => class,
            None => unresolved("class token used"),
        }
    }

    /// Returns the class a `selector` send should go to.
    ///
    /// # Panics
    ///
    /// Panics if the token is null.
    #[track_caller]
    pub(crate) fn class_for(self, selector: Selector) -> Class {
        match self.0 {
            Some(class) => class,
            None => unresolved(&format!("`{selector}` sent")),
        }
    }
}

#[cold]
#[track_caller]
fn unresolved(what: &str) -> ! {
    error!("{what} through an unresolved class token");
    panic!("{what} through an unresolved class token");
}

impl From<Class> for ClassToken {
    fn from(class: Class) -> ClassToken {
        ClassToken::new(class)
    }
}

impl fmt::Debug for ClassToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(class) => write!(f, "ClassToken({})", class.name()),
            None => f.write_str("ClassToken(NULL)"),
        }
    }
}

/// Installs the runtime built-ins and the bridge's own classes.
/// Idempotent and thread-safe.
pub fn install() {
    runtime::init();
    adapter::install();
}

/// Resolves a class by name. Returns [`ClassToken::NULL`] if no such class
/// is registered.
#[must_use]
pub fn resolve_class(name: &str) -> ClassToken {
    install();
    match Class::get(name) {
        Some(class) => {
            debug!("resolved class {name}");
            ClassToken::new(class)
        }
        None => {
            warn!("class {name} is not registered, token is null");
            ClassToken::NULL
        }
    }
}

/// Resolves a selector by name. Selectors always resolve.
#[must_use]
pub fn resolve_selector(name: &str) -> Selector {
    Selector::register(name)
}

/// Resolves the built-in symbol tables now rather than on first use.
pub fn preload() {
    let table = base::base_symbols();
    debug!("preloaded base symbols: {table:?}");
}

#[doc(hidden)]
pub fn __table_resolved(table: &str, classes: &[(&str, ClassToken)]) {
    let missing = classes.iter().filter(|(_, token)| token.is_null()).count();
    if missing == 0 {
        debug!("symbol table {table} resolved");
    } else {
        warn!("symbol table {table} resolved with {missing} null class token(s)");
    }
}

/// Declares a table of class tokens and selectors resolved together.
///
/// ```rust
/// use oxidex_bridge::symbol_table;
///
/// symbol_table! {
///     /// Symbols used by the number helpers.
///     pub struct NumberSymbols in number_symbols {
///         classes {
///             number = "OxNumber",
///         }
///         selectors {
///             integer_value = "integerValue",
///             with_integer = "numberWithInteger:",
///         }
///     }
/// }
///
/// let symbols = number_symbols();
/// assert!(!symbols.number.is_null());
/// assert!(std::ptr::eq(symbols, number_symbols()));
/// ```
///
/// The accessor resolves the table on first call and returns the same
/// `'static` table afterwards.
#[macro_export]
macro_rules! symbol_table {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident in $getter:ident {
            classes {
                $($(#[$cmeta:meta])* $class:ident = $class_name:literal),* $(,)?
            }
            selectors {
                $($(#[$smeta:meta])* $sel:ident = $sel_name:literal),* $(,)?
            }
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        $vis struct $name {
            $($(#[$cmeta])* pub $class: $crate::bridge::ClassToken,)*
            $($(#[$smeta])* pub $sel: $crate::runtime::Selector,)*
        }

        impl $name {
            /// Resolves every symbol in the table.
            pub fn resolve() -> Self {
                let table = $name {
                    $($class: $crate::bridge::resolve_class($class_name),)*
                    $($sel: $crate::bridge::resolve_selector($sel_name),)*
                };
                $crate::bridge::registry::__table_resolved(
                    stringify!($name),
                    &[$(($class_name, table.$class)),*],
                );
                table
            }
        }

        #[doc = concat!("Returns the resolved [`", stringify!($name), "`] table.")]
        $vis fn $getter() -> &'static $name {
            static TABLE: ::std::sync::OnceLock<$name> = ::std::sync::OnceLock::new();
            TABLE.get_or_init($name::resolve)
        }
    };
}
