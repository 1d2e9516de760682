//! Script-level error types.
//!
//! A [`JsError`] is what script code observes as a thrown exception. Errors
//! raised by embedder code keep their original cause so host code can still
//! inspect it after the error has crossed the engine boundary.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// The kind of script error.
///
/// These correspond to the built-in error constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Plain `Error`
    Error,
    /// Syntax error in script code
    SyntaxError,
    /// Type error (e.g., calling a non-function)
    TypeError,
    /// Reference to an undefined variable or a released handle
    ReferenceError,
    /// Value out of allowed range
    RangeError,
    /// Internal engine error
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Error => "Error",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::InternalError => "InternalError",
        };
        f.write_str(name)
    }
}

/// A script error with a message and an optional embedder cause.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, JsError};
///
/// let error = JsError::type_error("undefined is not a function");
///
/// assert_eq!(error.kind, ErrorKind::TypeError);
/// assert_eq!(error.to_string(), "TypeError: undefined is not a function");
/// ```
#[derive(Debug, Clone)]
pub struct JsError {
    /// The type of error
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Embedder error that caused this script error, if any
    pub cause: Option<Arc<dyn Error + Send + Sync>>,
}

impl JsError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        JsError {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a plain `Error`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message)
    }

    /// Creates a `TypeError`.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    /// Creates a `ReferenceError`.
    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReferenceError, message)
    }

    /// Creates an `InternalError`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// Attaches the embedder error that caused this error.
    pub fn with_cause(mut self, cause: Arc<dyn Error + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Returns the cause downcast to a concrete type.
    pub fn cause_as<E: Error + 'static>(&self) -> Option<&E> {
        self.cause
            .as_deref()
            .and_then(|cause| (cause as &(dyn Error + 'static)).downcast_ref::<E>())
    }
}

impl fmt::Display for JsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for JsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn Error + 'static))
    }
}

/// Result type for engine operations.
pub type JsResult<T> = Result<T, JsError>;
