//! Embedded object engine.
//!
//! A small single-threaded object engine exposing the capability surface an
//! embedder needs: objects, arrays and functions living in a collected heap,
//! explicit handle duplication and release, native function registration,
//! accessor properties and an exclusive access lock.
//!
//! # Overview
//!
//! - [`Engine`] - Heap, handle table and exclusive access
//! - [`NativeFn`] - Signature of host functions callable from script
//! - [`WeakRef`] - Weak reference to a heap cell
//! - [`MarkColor`] - Collector mark state
//!
//! # Examples
//!
//! ```
//! use core_types::Value;
//! use script_engine::Engine;
//!
//! let engine = Engine::new();
//! let global = engine.global();
//! engine
//!     .register_function(&global, "double", |_, _, args| {
//!         Ok(Value::number(args[0].as_number().unwrap_or(0.0) * 2.0))
//!     })
//!     .unwrap();
//!
//! let result = engine.call_method(&global, "double", &[Value::Smi(21)]).unwrap();
//! assert_eq!(result, Value::Smi(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod engine;
mod gc;
mod heap;

pub use engine::{Engine, EngineGuard, WeakRef};
pub use gc::MarkColor;

use core_types::{JsResult, Value};
use std::sync::Arc;

/// A host function callable from script.
///
/// Receives the engine, the receiver (`this`) and the call arguments.
pub type NativeFn = Arc<dyn Fn(&Engine, &Value, &[Value]) -> JsResult<Value> + Send + Sync>;
