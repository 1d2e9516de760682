//! Host object bridge for the embedded script engine.
//!
//! Exposes Rust types to script as constructible classes, passes host
//! objects back and forth with stable identity, and lets host code hold and
//! call script functions.
//!
//! # Overview
//!
//! - [`Runtime`] - Owns an engine and all bridge state; the entry point
//! - [`HostClass`] / [`ClassBuilder`] - Declare what script sees of a type
//! - [`ClassInterceptor`] / [`InterceptorContext`] - Custom injection
//! - [`CallBack`] / [`Listener`] / [`JsCallback`] - Script functions held by host code
//! - [`FromHost`] / [`IntoHost`] - Typed parameter and return conversion
//! - [`BridgeError`] - Everything that can go wrong
//!
//! # Examples
//!
//! ```
//! use core_types::Value;
//! use host_bridge::{ClassBuilder, HostClass, Runtime};
//! use std::sync::atomic::{AtomicI32, Ordering};
//!
//! struct Foo {
//!     base: AtomicI32,
//! }
//!
//! impl HostClass for Foo {
//!     fn describe(class: &mut ClassBuilder<Self>) {
//!         class
//!             .constructor(|(base,): (i32,)| Foo { base: AtomicI32::new(base) })
//!             .method("doInstance", |foo: &Foo, (n,): (i32,)| {
//!                 foo.base.load(Ordering::SeqCst) + n
//!             });
//!     }
//! }
//!
//! let runtime = Runtime::new();
//! runtime.inject_class::<Foo>().unwrap();
//!
//! let result = runtime
//!     .execute_integer(|engine| {
//!         let foo = engine.new_instance("Foo", &[Value::Smi(3300)])?;
//!         let result = engine.call_method(&foo, "doInstance", &[Value::Smi(44)]);
//!         engine.release(&foo);
//!         result
//!     })
//!     .unwrap();
//! assert_eq!(result, 3344);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod bridge;
pub mod callback;
pub mod class;
pub mod config;
pub mod convert;
pub mod error;
pub mod interceptor;
pub mod method;
mod registry;
pub mod runtime;
mod translator;
pub mod types;

pub use callback::{
    CallBack, CallbackAdapter, GcExecutor, GcJob, InlineExecutor, JsCallback, Listener,
    ScriptArray, ScriptFunction, ScriptObject,
};
pub use class::{ClassBuilder, ClassDescriptor, HostClass, PropertyAccessors};
pub use config::RuntimeConfig;
pub use convert::{FromHost, HostArgs, IntoHost, IntoHostArgs, VarArgs};
pub use error::{BridgeError, BridgeResult, HostError, LifetimeError};
pub use interceptor::{ClassInterceptor, InterceptorContext};
pub use method::{OverloadSet, Signature};
pub use runtime::Runtime;
pub use translator::widen_number;
pub use types::{
    CallbackMode, ClassKey, HostArray, HostObject, HostType, HostValue, Primitive, ScriptHandle,
};
