//! Error types for the `OxideX` bridge.
//!
//! Only registration-time failures are reported through [`Error`]. Failures
//! that happen while a message is being sent (unknown selector, mismatched
//! signature) are runtime exceptions and travel through the exception bridge
//! instead.

use std::fmt;

/// Errors that can occur while registering runtime metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Class name already exists in registry.
    ClassAlreadyExists {
        /// The duplicated class name.
        name: String,
    },

    /// Selector name is empty.
    InvalidSelector,

    /// Type encoding string could not be parsed.
    InvalidEncoding {
        /// The rejected encoding string.
        encoding: String,
    },

    /// Protocol name already exists in registry.
    ProtocolAlreadyExists {
        /// The duplicated protocol name.
        name: String,
    },

    /// Class already adopts the protocol.
    ProtocolAlreadyAdopted {
        /// The class name.
        class: String,
        /// The protocol name.
        protocol: String,
    },

    /// Class does not implement a selector the protocol requires.
    MissingProtocolMethod {
        /// The protocol name.
        protocol: String,
        /// The missing selector.
        selector: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClassAlreadyExists { name } => {
                write!(f, "Class `{name}` already exists in registry")
            }
            Error::InvalidSelector => write!(f, "Selector name must not be empty"),
            Error::InvalidEncoding { encoding } => {
                write!(f, "Invalid type encoding: {encoding:?}")
            }
            Error::ProtocolAlreadyExists { name } => {
                write!(f, "Protocol `{name}` already exists in registry")
            }
            Error::ProtocolAlreadyAdopted { class, protocol } => {
                write!(f, "Class `{class}` already adopts protocol `{protocol}`")
            }
            Error::MissingProtocolMethod { protocol, selector } => {
                write!(f, "Protocol `{protocol}` requires `{selector}`, which is not implemented")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for bridge registration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", Error::ClassAlreadyExists { name: "Foo".into() }),
            "Class `Foo` already exists in registry"
        );
        assert_eq!(
            format!("{}", Error::InvalidEncoding { encoding: "x@:".into() }),
            "Invalid type encoding: \"x@:\""
        );
        assert_eq!(
            format!(
                "{}",
                Error::MissingProtocolMethod {
                    protocol: "P".into(),
                    selector: "run".into()
                }
            ),
            "Protocol `P` requires `run`, which is not implemented"
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::InvalidSelector, Error::InvalidSelector);
        assert_ne!(
            Error::ClassAlreadyExists { name: "A".into() },
            Error::ClassAlreadyExists { name: "B".into() }
        );
    }
}
