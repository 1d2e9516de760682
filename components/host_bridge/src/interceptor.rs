//! Class interceptors.
//!
//! An interceptor replaces the default method binding of a class. Instead of
//! exposing methods and properties on the script object, the bridge gives
//! each bridged instance an [`InterceptorContext`] and lets the interceptor
//! and the script object exchange state through it:
//!
//! - on injection, [`ClassInterceptor::on_inject`] fills the context from the
//!   host object, then the script object's inject hook reads it;
//! - on extraction, the script object's extract hook fills the context, then
//!   [`ClassInterceptor::on_extract`] writes it back to the host object.
//!
//! Hooks only run for script objects that define the inject hook function.

use crate::class::{ClassBuilder, HostClass};
use crate::convert::FromHost;
use crate::error::BridgeResult;
use crate::types::{HostObject, HostValue};
use core_types::{JsResult, Value};
use indexmap::IndexMap;
use parking_lot::Mutex;
use script_engine::Engine;
use std::marker::PhantomData;

/// Custom injection behavior for a host class.
///
/// # Examples
///
/// ```
/// use host_bridge::{ClassInterceptor, InterceptorContext};
/// use std::sync::atomic::{AtomicI32, Ordering};
///
/// struct Counter {
///     value: AtomicI32,
/// }
///
/// struct CounterInterceptor;
///
/// impl ClassInterceptor<Counter> for CounterInterceptor {
///     fn on_inject(&self, context: &InterceptorContext, counter: &Counter) {
///         context.set("value", counter.value.load(Ordering::SeqCst));
///     }
///
///     fn on_extract(&self, context: &InterceptorContext, counter: &Counter) {
///         if let Ok(Some(value)) = context.get_as::<i32>("value") {
///             counter.value.store(value, Ordering::SeqCst);
///         }
///     }
/// }
/// ```
pub trait ClassInterceptor<T>: Send + Sync + 'static {
    /// Script-side construction logic, run on each new script object before
    /// the host object is attached. Typically defines the inject and extract
    /// hook functions on `receiver`.
    fn script_body(&self, engine: &Engine, receiver: &Value) -> JsResult<()> {
        let _ = (engine, receiver);
        Ok(())
    }

    /// Copies host state into the context before script sees the object.
    fn on_inject(&self, context: &InterceptorContext, object: &T);

    /// Copies context state back into the host object.
    fn on_extract(&self, context: &InterceptorContext, object: &T);

    /// Replaces the default injection of a named host object.
    ///
    /// When this returns a value, `inject_object` binds that value instead of
    /// a bridged wrapper.
    fn injection_override(&self, object: &T) -> Option<HostValue> {
        let _ = object;
        None
    }
}

/// Interceptor with the host class erased.
pub(crate) trait ErasedInterceptor: Send + Sync {
    fn script_body(&self, engine: &Engine, receiver: &Value) -> JsResult<()>;
    fn on_inject(&self, context: &InterceptorContext, object: &HostObject);
    fn on_extract(&self, context: &InterceptorContext, object: &HostObject);
    fn injection_override(&self, object: &HostObject) -> Option<HostValue>;
}

pub(crate) struct Erased<T, I> {
    inner: I,
    _class: PhantomData<fn() -> T>,
}

impl<T, I> Erased<T, I> {
    pub(crate) fn new(inner: I) -> Self {
        Erased {
            inner,
            _class: PhantomData,
        }
    }
}

impl<T: HostClass, I: ClassInterceptor<T>> ErasedInterceptor for Erased<T, I> {
    fn script_body(&self, engine: &Engine, receiver: &Value) -> JsResult<()> {
        self.inner.script_body(engine, receiver)
    }

    fn on_inject(&self, context: &InterceptorContext, object: &HostObject) {
        if let Some(object) = object.downcast_ref::<T>() {
            self.inner.on_inject(context, object);
        }
    }

    fn on_extract(&self, context: &InterceptorContext, object: &HostObject) {
        if let Some(object) = object.downcast_ref::<T>() {
            self.inner.on_extract(context, object);
        }
    }

    fn injection_override(&self, object: &HostObject) -> Option<HostValue> {
        object
            .downcast_ref::<T>()
            .and_then(|object| self.inner.injection_override(object))
    }
}

/// Key/value store shared by an interceptor and one script object.
///
/// Script code sees it as an object with `get(key)`, `set(key, value)`,
/// `has(key)` and `keys()` methods.
#[derive(Debug, Default)]
pub struct InterceptorContext {
    values: Mutex<IndexMap<String, HostValue>>,
}

impl InterceptorContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<HostValue> {
        self.values.lock().get(key).cloned()
    }

    /// Value stored under `key`, converted to `T`.
    pub fn get_as<T: FromHost>(&self, key: &str) -> BridgeResult<Option<T>> {
        self.get(key).map(T::from_host).transpose()
    }

    /// Stores a value, replacing any previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<HostValue>) {
        let previous = self.values.lock().insert(key.into(), value.into());
        drop(previous);
    }

    /// Returns true if a value is stored under `key`.
    pub fn has(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    /// Stored keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.values.lock().keys().cloned().collect()
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove(&self, key: &str) -> Option<HostValue> {
        self.values.lock().shift_remove(key)
    }
}

impl HostClass for InterceptorContext {
    fn class_name() -> String {
        "InterceptorContext".to_string()
    }

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .function("get", |context: &Self, (key,): (String,)| {
                context.get(&key).unwrap_or(HostValue::Undefined)
            })
            .function("set", |context: &Self, (key, value): (String, HostValue)| {
                context.set(key, value)
            })
            .function("has", |context: &Self, (key,): (String,)| context.has(&key))
            .function("keys", |context: &Self, (): ()| context.keys());
    }
}
