//! Script functions held by host code.
//!
//! A [`CallbackAdapter`] owns duplicated handles of a script function and
//! the receiver it is called against. It runs in one of two modes:
//!
//! - call-back: released right after its first invocation
//! - listener: kept until released explicitly or dropped
//!
//! Host closures receive adapters through the typed wrappers [`CallBack`],
//! [`Listener`] and [`JsCallback`]. An adapter dropped without being released
//! posts its handles to the runtime's release queue, which the runtime
//! drains on its next unit of work or through the configured [`GcExecutor`].

use crate::bridge::Bridge;
use crate::convert::{FromHost, IntoHost, IntoHostArgs};
use crate::error::{BridgeError, BridgeResult, HostError};
use crate::translator;
use crate::types::{CallbackMode, HostType, HostValue, ScriptHandle};
use core_types::Value;
use script_engine::Engine;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A script function wrapped for host calls.
pub struct CallbackAdapter {
    bridge: Weak<Bridge>,
    receiver: Value,
    function: Value,
    mode: CallbackMode,
    released: AtomicBool,
}

impl CallbackAdapter {
    /// Wraps `function`, to be called with `receiver` as `this`.
    ///
    /// Both handles are duplicated and tracked as runtime resources.
    pub(crate) fn new(
        bridge: &Arc<Bridge>,
        receiver: &Value,
        function: &Value,
        mode: CallbackMode,
    ) -> BridgeResult<Arc<Self>> {
        let engine = bridge.engine();
        let _access = engine.lock();
        let receiver = engine.duplicate(receiver)?;
        let function = match engine.duplicate(function) {
            Ok(function) => function,
            Err(error) => {
                engine.release(&receiver);
                return Err(error.into());
            }
        };
        bridge.track(&[&receiver, &function]);
        tracing::trace!(?mode, "callback adapter created");
        Ok(Arc::new(CallbackAdapter {
            bridge: Arc::downgrade(bridge),
            receiver,
            function,
            mode,
            released: AtomicBool::new(false),
        }))
    }

    /// Invocation mode.
    pub fn mode(&self) -> CallbackMode {
        self.mode
    }

    /// Returns true once the script handles have been released, either by
    /// this adapter or by [`Runtime::release_resources`](crate::Runtime::release_resources).
    pub fn is_released(&self) -> bool {
        if self.released.load(Ordering::Acquire) {
            return true;
        }
        match self.bridge.upgrade() {
            Some(bridge) => self.handles_released(bridge.engine()),
            None => false,
        }
    }

    /// Checks that the handles are still held, marking the adapter released
    /// when the runtime released them.
    fn ensure_live(&self, engine: &Engine) -> BridgeResult<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(BridgeError::ReleasedResource);
        }
        if self.handles_released(engine) {
            self.released.store(true, Ordering::Release);
            return Err(BridgeError::ReleasedResource);
        }
        Ok(())
    }

    fn handles_released(&self, engine: &Engine) -> bool {
        engine.is_released(&self.function) || engine.is_released(&self.receiver)
    }

    fn bridge(&self) -> BridgeResult<Arc<Bridge>> {
        self.bridge.upgrade().ok_or(BridgeError::RuntimeDropped)
    }

    /// A new handle to the wrapped function, owned by the caller.
    pub(crate) fn function_value(&self) -> BridgeResult<Value> {
        let bridge = self.bridge()?;
        let engine = bridge.engine();
        let _access = engine.lock();
        self.ensure_live(engine)?;
        Ok(engine.duplicate(&self.function)?)
    }

    /// Calls the function and converts its result to `returns`.
    ///
    /// A call-back adapter is released after the call, whether or not the
    /// script function succeeded.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ReleasedResource`] when the adapter was released;
    /// [`BridgeError::Script`] when the function throws; translation errors
    /// for arguments or the result.
    pub fn call_with(&self, args: Vec<HostValue>, returns: &HostType) -> BridgeResult<HostValue> {
        let bridge = self.bridge()?;
        let engine = bridge.engine();
        let _access = engine.lock();
        if let Err(error) = self.ensure_live(engine) {
            args.into_iter().for_each(HostValue::discard);
            return Err(error);
        }

        let mut argv = Vec::with_capacity(args.len());
        let mut failure = None;
        for arg in args {
            if failure.is_some() {
                arg.discard();
                continue;
            }
            match translator::to_script(&bridge, arg) {
                Ok(value) => argv.push(value),
                Err(error) => failure = Some(error),
            }
        }
        let outcome = match failure {
            Some(error) => Err(error),
            None => engine
                .call(&self.function, &self.receiver, &argv)
                .map_err(BridgeError::from),
        };
        argv.iter().for_each(|value| engine.release(value));

        let result = outcome.and_then(|value| match returns {
            HostType::Any => translator::script_result_to_host(&bridge, value, &self.receiver),
            target => {
                let converted = translator::to_host(&bridge, target, &value, &self.receiver);
                engine.release(&value);
                converted
            }
        });
        if self.mode == CallbackMode::CallBack {
            self.release();
        }
        result
    }

    /// Calls the function and converts its result without a target type.
    ///
    /// Bridged objects come back as host objects and functions as listener
    /// callbacks.
    pub fn call_raw(&self, args: Vec<HostValue>) -> BridgeResult<HostValue> {
        self.call_with(args, &HostType::Any)
    }

    /// Releases the script handles. Later calls fail with
    /// [`BridgeError::ReleasedResource`]; releasing again does nothing.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(bridge) = self.bridge.upgrade() else {
            return;
        };
        let engine = bridge.engine();
        let _access = engine.lock();
        let owned = bridge.untrack(&[&self.receiver, &self.function]);
        owned.iter().for_each(|value| engine.release(value));
        tracing::trace!(mode = ?self.mode, handles = owned.len(), "callback adapter released");
    }
}

impl Drop for CallbackAdapter {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.defer_release(vec![self.receiver.clone(), self.function.clone()]);
        }
    }
}

impl fmt::Debug for CallbackAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackAdapter")
            .field("mode", &self.mode)
            .field("function", &self.function)
            .field("released", &self.is_released())
            .finish()
    }
}

fn adapter_from(value: HostValue, expected: HostType) -> BridgeResult<Arc<CallbackAdapter>> {
    match value {
        HostValue::Callback(adapter) => Ok(adapter),
        other => Err(BridgeError::incompatible(expected, other.type_name())),
    }
}

// ============================================================================
// Typed wrappers
// ============================================================================

macro_rules! typed_callback {
    ($(#[$doc:meta])* $name:ident, $mode:ident) => {
        $(#[$doc])*
        pub struct $name<A, R> {
            adapter: Arc<CallbackAdapter>,
            _signature: PhantomData<fn(A) -> R>,
        }

        impl<A: IntoHostArgs, R: FromHost> $name<A, R> {
            /// Calls the script function.
            pub fn call(&self, args: A) -> BridgeResult<R> {
                let values = args.into_host_args()?;
                let result = self.adapter.call_with(values, &R::host_type())?;
                R::from_host(result)
            }
        }

        impl<A, R> $name<A, R> {
            /// Releases the script function.
            pub fn release(&self) {
                self.adapter.release();
            }

            /// Returns true once the script function has been released.
            pub fn is_released(&self) -> bool {
                self.adapter.is_released()
            }

            /// The untyped adapter.
            pub fn adapter(&self) -> &Arc<CallbackAdapter> {
                &self.adapter
            }
        }

        impl<A, R> Clone for $name<A, R> {
            fn clone(&self) -> Self {
                $name {
                    adapter: self.adapter.clone(),
                    _signature: PhantomData,
                }
            }
        }

        impl<A, R> fmt::Debug for $name<A, R> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.adapter).finish()
            }
        }

        impl<A: 'static, R: 'static> FromHost for $name<A, R> {
            fn host_type() -> HostType {
                HostType::Callback(CallbackMode::$mode)
            }

            fn from_host(value: HostValue) -> BridgeResult<Self> {
                Ok($name {
                    adapter: adapter_from(value, Self::host_type())?,
                    _signature: PhantomData,
                })
            }
        }

        impl<A, R> IntoHost for $name<A, R> {
            fn into_host(self) -> Result<HostValue, HostError> {
                Ok(HostValue::Callback(self.adapter))
            }
        }
    };
}

typed_callback! {
    /// A script function called at most once.
    ///
    /// The function is released after the first call; calling again fails
    /// with [`BridgeError::ReleasedResource`].
    CallBack, CallBack
}

typed_callback! {
    /// A script function that stays callable until released.
    Listener, Listener
}

/// An untyped listener, produced when a script function is passed where
/// any value is accepted and a [`GcExecutor`] is configured.
#[derive(Clone, Debug)]
pub struct JsCallback {
    adapter: Arc<CallbackAdapter>,
}

impl JsCallback {
    /// Calls the script function.
    pub fn call(&self, args: impl IntoHostArgs) -> BridgeResult<HostValue> {
        self.adapter.call_raw(args.into_host_args()?)
    }

    /// Releases the script function.
    pub fn release(&self) {
        self.adapter.release();
    }

    /// Returns true once the script function has been released.
    pub fn is_released(&self) -> bool {
        self.adapter.is_released()
    }
}

impl From<Arc<CallbackAdapter>> for JsCallback {
    fn from(adapter: Arc<CallbackAdapter>) -> Self {
        JsCallback { adapter }
    }
}

impl FromHost for JsCallback {
    fn host_type() -> HostType {
        HostType::Callback(CallbackMode::Listener)
    }

    fn from_host(value: HostValue) -> BridgeResult<Self> {
        adapter_from(value, Self::host_type()).map(JsCallback::from)
    }
}

impl IntoHost for JsCallback {
    fn into_host(self) -> Result<HostValue, HostError> {
        Ok(HostValue::Callback(self.adapter))
    }
}

// ============================================================================
// Raw script values
// ============================================================================

macro_rules! script_value {
    ($(#[$doc:meta])* $name:ident, $host_type:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug)]
        pub struct $name(ScriptHandle);

        impl $name {
            /// The underlying handle.
            pub fn handle(&self) -> &ScriptHandle {
                &self.0
            }

            /// Consumes the wrapper.
            pub fn into_handle(self) -> ScriptHandle {
                self.0
            }
        }

        impl FromHost for $name {
            fn host_type() -> HostType {
                HostType::$host_type
            }

            fn from_host(value: HostValue) -> BridgeResult<Self> {
                match value {
                    HostValue::Script(handle) => Ok($name(handle)),
                    other => Err(BridgeError::incompatible(Self::host_type(), other.type_name())),
                }
            }
        }

        impl IntoHost for $name {
            fn into_host(self) -> Result<HostValue, HostError> {
                Ok(HostValue::Script(self.0))
            }
        }
    };
}

script_value! {
    /// A script function passed to host code as is.
    ScriptFunction, ScriptFunction
}

script_value! {
    /// A script array passed to host code as is.
    ScriptArray, ScriptArray
}

script_value! {
    /// A script object passed to host code as is, bridged or not.
    ScriptObject, ScriptObject
}

impl ScriptFunction {
    /// Calls the function with an undefined receiver.
    pub fn call(&self, args: impl IntoHostArgs) -> BridgeResult<HostValue> {
        let bridge = self.0.bridge()?;
        let args = args.into_host_args()?;
        let engine = bridge.engine();
        let _access = engine.lock();
        let mut argv = Vec::with_capacity(args.len());
        let mut failure = None;
        for arg in args {
            if failure.is_some() {
                arg.discard();
                continue;
            }
            match translator::to_script(&bridge, arg) {
                Ok(value) => argv.push(value),
                Err(error) => failure = Some(error),
            }
        }
        let outcome = match failure {
            Some(error) => Err(error),
            None => engine
                .call(self.0.value(), &Value::Undefined, &argv)
                .map_err(BridgeError::from),
        };
        argv.iter().for_each(|value| engine.release(value));
        translator::script_result_to_host(&bridge, outcome?, &Value::Undefined)
    }
}

impl ScriptArray {
    /// Number of elements.
    pub fn len(&self) -> BridgeResult<usize> {
        self.0.with(|engine, array| engine.array_len(array))
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> BridgeResult<bool> {
        self.len().map(|len| len == 0)
    }

    /// Element at `index`, converted without a target type.
    pub fn get(&self, index: usize) -> BridgeResult<HostValue> {
        let bridge = self.0.bridge()?;
        let item = self.0.with(|engine, array| engine.array_get(array, index))?;
        translator::script_result_to_host(&bridge, item, &Value::Undefined)
    }
}

impl ScriptObject {
    /// Property `key`, converted without a target type.
    pub fn get(&self, key: &str) -> BridgeResult<HostValue> {
        let bridge = self.0.bridge()?;
        let item = self.0.with(|engine, object| engine.get(object, key))?;
        translator::script_result_to_host(&bridge, item, &Value::Undefined)
    }

    /// Writes property `key`.
    pub fn set(&self, key: &str, value: impl Into<HostValue>) -> BridgeResult<()> {
        let bridge = self.0.bridge()?;
        let engine = bridge.engine();
        let _access = engine.lock();
        let value = translator::to_script(&bridge, value.into())?;
        let stored = self.0.with(|engine, object| engine.set(object, key, &value));
        engine.release(&value);
        stored
    }

    /// Own enumerable property names.
    pub fn keys(&self) -> BridgeResult<Vec<String>> {
        self.0.with(|engine, object| engine.keys(object))
    }
}

// ============================================================================
// Deferred release
// ============================================================================

/// Work handed to a [`GcExecutor`].
pub type GcJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs release jobs for script handles dropped on the host side.
///
/// Jobs acquire exclusive engine access themselves, so an executor may run
/// them on any thread.
///
/// # Examples
///
/// ```
/// use host_bridge::{GcJob, Runtime};
///
/// let runtime = Runtime::new();
/// runtime.set_gc_executor(|job: GcJob| {
///     std::thread::spawn(job);
/// });
/// assert!(runtime.has_gc_executor());
/// ```
pub trait GcExecutor: Send + Sync + 'static {
    /// Schedules `job`.
    fn execute(&self, job: GcJob);
}

impl<F> GcExecutor for F
where
    F: Fn(GcJob) + Send + Sync + 'static,
{
    fn execute(&self, job: GcJob) {
        self(job)
    }
}

/// Runs every job immediately on the dropping thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl GcExecutor for InlineExecutor {
    fn execute(&self, job: GcJob) {
        job()
    }
}
