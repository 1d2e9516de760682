//! Core value and error types shared by the engine and the host bridge.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of engine values
//! - [`Handle`] - Reference to a heap cell in an engine's handle table
//! - [`JsError`] - Script errors, optionally carrying an embedder cause
//! - [`ErrorKind`] - Types of script errors
//!
//! # Examples
//!
//! ```
//! use core_types::{ErrorKind, JsError, Value};
//!
//! let num = Value::Smi(42);
//! assert!(num.is_truthy());
//! assert_eq!(num.type_of(), "number");
//!
//! let error = JsError::new(ErrorKind::TypeError, "undefined is not a function");
//! assert_eq!(error.message, "undefined is not a function");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod value;

pub use error::{ErrorKind, JsError, JsResult};
pub use value::{Handle, Value};
