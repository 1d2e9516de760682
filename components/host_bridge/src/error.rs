//! Error types for the bridge.
//!
//! Translation failures ([`BridgeError::ArgumentIncompatible`] and
//! [`BridgeError::InvalidHandle`]) are recoverable: overload resolution
//! catches them and tries the next signature. Everything else propagates.

use core_types::{ErrorKind, JsError};
use std::sync::Arc;
use thiserror::Error;

/// Error raised by host code registered with the bridge.
pub type HostError = Box<dyn std::error::Error + Send + Sync>;

/// Why an object handle failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifetimeError {
    /// The identifier was never issued by this runtime.
    #[error("never existed")]
    NeverExisted,
    /// The identifier was issued but its host object has been collected.
    #[error("aged out")]
    Collected,
}

/// Errors raised while bridging values and calls.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A value could not be translated to the required type.
    #[error("Incompatible parameter type. Expected {expected}, but actual is {actual}")]
    ArgumentIncompatible {
        /// Required type
        expected: String,
        /// Offered type and value
        actual: String,
    },

    /// A script object carried a handle that no longer resolves.
    #[error("Argument has invalid host object handle or object referenced by handle has aged out ({handle}: {state})")]
    InvalidHandle {
        /// The handle found on the script object
        handle: String,
        /// Why resolution failed
        state: LifetimeError,
    },

    /// No overload accepted the arguments of a call.
    #[error("No signature exists for {name} with parameters [{arguments}].")]
    NoMatchingSignature {
        /// Method, static method or class name
        name: String,
        /// Rendered arguments, each followed by `", "`
        arguments: String,
        /// Why the last candidate was rejected
        #[source]
        last_mismatch: Option<Box<BridgeError>>,
    },

    /// A callback was used after its script resources were released.
    #[error("Object released")]
    ReleasedResource,

    /// Host code invoked from script returned an error.
    #[error("{method} failed: {source}")]
    HostMethod {
        /// Name of the failing method or constructor
        method: String,
        /// The host error
        source: HostError,
    },

    /// A host object was attached through the proxy of another class.
    #[error("Cannot attach host object of type [{actual}] using proxy for type [{expected}]")]
    ClassMismatch {
        /// Class of the proxy
        expected: String,
        /// Class of the object
        actual: String,
    },

    /// A typed execution produced a value of another type.
    #[error("Expected {expected} result, but script returned {actual}")]
    ResultType {
        /// Requested result type
        expected: &'static str,
        /// Kind of the value produced
        actual: String,
    },

    /// Rejected runtime configuration.
    #[error("Invalid runtime configuration: {0}")]
    Config(String),

    /// The runtime owning this value has been dropped.
    #[error("Runtime has been dropped")]
    RuntimeDropped,

    /// Error raised by the engine or thrown by script code.
    #[error(transparent)]
    Script(#[from] JsError),
}

impl BridgeError {
    /// Returns true for translation failures that overload resolution retries.
    pub fn is_translation(&self) -> bool {
        matches!(
            self,
            BridgeError::ArgumentIncompatible { .. } | BridgeError::InvalidHandle { .. }
        )
    }

    /// The bridge error behind this one.
    ///
    /// Errors raised inside a native call reach the caller wrapped in a
    /// script error; this unwraps them again.
    pub fn as_bridge(&self) -> Option<&BridgeError> {
        match self {
            BridgeError::Script(error) => error.cause_as::<BridgeError>(),
            other => Some(other),
        }
    }

    pub(crate) fn incompatible(expected: impl ToString, actual: impl ToString) -> Self {
        BridgeError::ArgumentIncompatible {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<BridgeError> for JsError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Script(inner) => inner,
            other => {
                let kind = match other {
                    BridgeError::ArgumentIncompatible { .. }
                    | BridgeError::InvalidHandle { .. }
                    | BridgeError::NoMatchingSignature { .. }
                    | BridgeError::ClassMismatch { .. } => ErrorKind::TypeError,
                    _ => ErrorKind::Error,
                };
                JsError::new(kind, other.to_string()).with_cause(Arc::new(other))
            }
        }
    }
}
