//! The runtime façade.
//!
//! A [`Runtime`] owns one engine and all bridge state for it. It is the
//! entry point for embedding code: classes and objects are injected through
//! it, scripts run through it, and its drop releases every script resource
//! host code still holds.

use crate::bridge::Bridge;
use crate::callback::{GcExecutor, ScriptObject};
use crate::class::{self, ClassDescriptor, HostClass};
use crate::config::RuntimeConfig;
use crate::convert::{FromHost, IntoHostArgs};
use crate::error::{BridgeError, BridgeResult};
use crate::interceptor::{ClassInterceptor, Erased, ErasedInterceptor};
use crate::translator;
use crate::types::{ClassKey, HostObject, HostValue, ScriptHandle};
use core_types::{JsError, JsResult, Value};
use script_engine::Engine;
use std::fmt;
use std::sync::Arc;

/// A script engine with host objects bridged into it.
///
/// `Runtime` is `Send + Sync`. Every operation takes exclusive engine
/// access, so threads sharing a runtime are serialized.
///
/// # Examples
///
/// ```
/// use core_types::Value;
/// use host_bridge::{ClassBuilder, HostClass, Runtime};
///
/// struct Greeter;
///
/// impl HostClass for Greeter {
///     fn describe(class: &mut ClassBuilder<Self>) {
///         class
///             .constructor(|(): ()| Greeter)
///             .method("greet", |_: &Greeter, (name,): (String,)| format!("Hello, {}", name));
///     }
/// }
///
/// let runtime = Runtime::new();
/// runtime.inject_class::<Greeter>().unwrap();
///
/// let greeting = runtime
///     .execute_string(|engine| {
///         let greeter = engine.new_instance("Greeter", &[])?;
///         let result = engine.call_method(&greeter, "greet", &[Value::from("world")]);
///         engine.release(&greeter);
///         result
///     })
///     .unwrap();
/// assert_eq!(greeting, "Hello, world");
/// ```
pub struct Runtime {
    bridge: Arc<Bridge>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("engine", self.bridge.engine())
            .field("objects", &self.registered_objects())
            .field("resources", &self.tracked_resources())
            .finish()
    }
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    pub fn new() -> Self {
        Runtime {
            bridge: Bridge::new(RuntimeConfig::default()),
        }
    }

    /// Creates a runtime with a custom configuration.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] when the configuration is invalid.
    pub fn with_config(config: RuntimeConfig) -> BridgeResult<Self> {
        config.validate()?;
        Ok(Runtime {
            bridge: Bridge::new(config),
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        self.bridge.config()
    }

    /// The engine. Take [`Engine::lock`] or use [`Runtime::run`] for
    /// multi-step work.
    pub fn engine(&self) -> &Engine {
        self.bridge.engine()
    }

    // ========================================================================
    // Injection
    // ========================================================================

    /// The descriptor of `T`, built on first use.
    pub fn class_descriptor<T: HostClass>(&self) -> Arc<ClassDescriptor> {
        self.bridge.descriptor_for(ClassKey::of::<T>())
    }

    /// Registers `T`'s constructor as a global under its class name.
    ///
    /// Injecting the same class twice under the same name does nothing.
    pub fn inject_class<T: HostClass>(&self) -> BridgeResult<()> {
        let descriptor = self.bridge.descriptor_for(ClassKey::of::<T>());
        let name = descriptor.name().to_string();
        self.inject_constructor(&descriptor, None, &name)
    }

    /// Registers `T`'s constructor as a global under `name`.
    pub fn inject_class_as<T: HostClass>(&self, name: &str) -> BridgeResult<()> {
        let descriptor = self.bridge.descriptor_for(ClassKey::of::<T>());
        self.inject_constructor(&descriptor, None, name)
    }

    /// Registers `T` with an interceptor, then injects its constructor.
    ///
    /// The interceptor only takes effect if `T` was not used with this
    /// runtime before.
    pub fn inject_class_with<T, I>(&self, interceptor: I) -> BridgeResult<()>
    where
        T: HostClass,
        I: ClassInterceptor<T>,
    {
        let erased: Arc<dyn ErasedInterceptor> = Arc::new(Erased::<T, I>::new(interceptor));
        let descriptor = self.bridge.register_class(ClassKey::of::<T>(), Some(erased));
        let name = descriptor.name().to_string();
        self.inject_constructor(&descriptor, None, &name)
    }

    /// Registers `T`'s constructor as a property of `root`.
    pub fn inject_class_into<T: HostClass>(&self, root: &Value) -> BridgeResult<()> {
        let descriptor = self.bridge.descriptor_for(ClassKey::of::<T>());
        let name = descriptor.name().to_string();
        self.inject_constructor(&descriptor, Some(root), &name)
    }

    fn inject_constructor(
        &self,
        descriptor: &Arc<ClassDescriptor>,
        root: Option<&Value>,
        name: &str,
    ) -> BridgeResult<()> {
        let engine = self.engine();
        let _access = engine.lock();
        let global = root.is_none().then(|| engine.global());
        let Some(root) = root.or(global.as_ref()) else {
            return Ok(());
        };
        let outcome = engine
            .downgrade(root)
            .map_err(BridgeError::from)
            .and_then(|weak| {
                if self.bridge.mark_injected(descriptor.key(), weak, name) {
                    class::register_constructor(&self.bridge, descriptor, root, name)
                } else {
                    Ok(())
                }
            });
        if let Some(global) = &global {
            engine.release(global);
        }
        outcome
    }

    /// Makes a host object available to script and returns its handle
    /// identifier.
    ///
    /// The object is bound to the global `name`, or to a generated
    /// `TEMP<ulid>` name when `name` is `None`. The class constructor is
    /// injected first. If the class interceptor overrides injection, its
    /// replacement value is bound instead and the bound name is returned.
    pub fn inject_object<T: HostClass>(&self, name: Option<&str>, object: Arc<T>) -> BridgeResult<String> {
        let engine = self.engine();
        let _access = engine.lock();
        self.bridge.drain_release_queue();
        let descriptor = self.bridge.descriptor_for(ClassKey::of::<T>());
        let class_name = descriptor.name().to_string();
        self.inject_constructor(&descriptor, None, &class_name)?;

        let host = HostObject::new(object);
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| self.bridge.temp_name());

        if let Some(replacement) = descriptor
            .interceptor()
            .and_then(|interceptor| interceptor.injection_override(&host))
        {
            let value = translator::to_script(&self.bridge, replacement)?;
            let bound = engine.set_global(&name, &value);
            engine.release(&value);
            bound?;
            tracing::debug!(class = %class_name, %name, "injection overridden");
            return Ok(name);
        }

        let fresh = engine.new_object();
        let injected = descriptor
            .interceptor()
            .map(|interceptor| interceptor.script_body(engine, &fresh))
            .transpose()
            .map_err(BridgeError::from)
            .and_then(|_| class::attach(&self.bridge, &descriptor, host, &fresh))
            .and_then(|identifier| {
                engine.set_global(&name, &fresh)?;
                Ok(identifier)
            });
        engine.release(&fresh);
        if let Ok(identifier) = &injected {
            tracing::debug!(class = %class_name, %name, id = %identifier, "object injected");
        }
        injected
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Runs `work` under exclusive engine access.
    ///
    /// Handles queued for release are released first.
    pub fn run<R, F>(&self, work: F) -> R
    where
        F: FnOnce(&Engine) -> R,
    {
        let engine = self.engine();
        let _access = engine.lock();
        self.bridge.drain_release_queue();
        work(engine)
    }

    /// Runs a script and converts its result without a target type.
    ///
    /// Bridged objects come back as their host objects, functions as
    /// listener callbacks and other heap values as [`ScriptHandle`]s.
    pub fn execute<F>(&self, script: F) -> BridgeResult<HostValue>
    where
        F: FnOnce(&Engine) -> JsResult<Value>,
    {
        self.run(|engine| {
            let value = engine.execute(script)?;
            translator::script_result_to_host(&self.bridge, value, &Value::Undefined)
        })
    }

    fn execute_as<T, F>(&self, expected: &'static str, script: F) -> BridgeResult<T>
    where
        T: FromHost,
        F: FnOnce(&Engine) -> JsResult<Value>,
    {
        let value = self.execute(script)?;
        let actual = value.type_name();
        T::from_host(value).map_err(|_| BridgeError::ResultType { expected, actual })
    }

    /// Runs a script and discards its result.
    pub fn execute_void<F>(&self, script: F) -> BridgeResult<()>
    where
        F: FnOnce(&Engine) -> JsResult<Value>,
    {
        self.run(|engine| {
            let value = engine.execute(script)?;
            engine.release(&value);
            Ok(())
        })
    }

    /// Runs a script that returns a boolean.
    pub fn execute_boolean<F>(&self, script: F) -> BridgeResult<bool>
    where
        F: FnOnce(&Engine) -> JsResult<Value>,
    {
        self.execute_as("boolean", script)
    }

    /// Runs a script that returns an integer.
    pub fn execute_integer<F>(&self, script: F) -> BridgeResult<i32>
    where
        F: FnOnce(&Engine) -> JsResult<Value>,
    {
        self.execute_as("integer", script)
    }

    /// Runs a script that returns a number.
    pub fn execute_double<F>(&self, script: F) -> BridgeResult<f64>
    where
        F: FnOnce(&Engine) -> JsResult<Value>,
    {
        self.execute_as("double", script)
    }

    /// Runs a script that returns a string.
    pub fn execute_string<F>(&self, script: F) -> BridgeResult<String>
    where
        F: FnOnce(&Engine) -> JsResult<Value>,
    {
        self.execute_as("string", script)
    }

    /// Runs a script that returns a bridged host object.
    pub fn execute_object<F>(&self, script: F) -> BridgeResult<HostObject>
    where
        F: FnOnce(&Engine) -> JsResult<Value>,
    {
        match self.execute(script)? {
            HostValue::Object(object) => Ok(object),
            other => Err(BridgeError::ResultType {
                expected: "host object",
                actual: other.type_name(),
            }),
        }
    }

    /// Calls the global script function `name`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Script`] when `name` is not a function or the function
    /// throws; translation errors for the arguments.
    pub fn invoke_function(&self, name: &str, args: impl IntoHostArgs) -> BridgeResult<HostValue> {
        let args = args.into_host_args()?;
        self.run(|engine| {
            let function = engine.get_global(name)?;
            if !function.is_function() {
                engine.release(&function);
                args.into_iter().for_each(HostValue::discard);
                return Err(JsError::type_error(format!("{} is not a function", name)).into());
            }

            let mut argv = Vec::with_capacity(args.len());
            let mut failure = None;
            for arg in args {
                if failure.is_some() {
                    arg.discard();
                    continue;
                }
                match translator::to_script(&self.bridge, arg) {
                    Ok(value) => argv.push(value),
                    Err(error) => failure = Some(error),
                }
            }
            let outcome = match failure {
                Some(error) => Err(error),
                None => {
                    let global = engine.global();
                    let called = engine.call(&function, &global, &argv);
                    engine.release(&global);
                    called.map_err(BridgeError::from)
                }
            };
            argv.iter().for_each(|value| engine.release(value));
            engine.release(&function);
            translator::script_result_to_host(&self.bridge, outcome?, &Value::Undefined)
        })
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Sets the executor that releases script handles dropped on the host
    /// side. Callable from any thread.
    pub fn set_gc_executor(&self, executor: impl GcExecutor) {
        self.bridge.set_gc_executor(Some(Arc::new(executor)));
    }

    /// Removes the executor. Dropped handles then wait for the next unit of
    /// work on the runtime.
    pub fn remove_gc_executor(&self) {
        self.bridge.set_gc_executor(None);
    }

    /// Returns true if an executor is set.
    pub fn has_gc_executor(&self) -> bool {
        self.bridge.has_gc_executor()
    }

    /// Collects unreachable script objects and forgets host objects that
    /// were only reachable through them.
    ///
    /// Returns the number of registry entries removed. Their identifiers
    /// resolve as aged out afterwards.
    pub fn sweep(&self) -> usize {
        self.bridge.sweep()
    }

    /// Releases every script handle held by callbacks and clears the GC
    /// executor.
    ///
    /// Returns the number of handles released. Callbacks report themselves
    /// released and fail with [`BridgeError::ReleasedResource`] afterwards.
    pub fn release_resources(&self) -> usize {
        let released = self.bridge.release_tracked();
        if released > 0 {
            self.bridge.sweep();
        }
        self.bridge.set_gc_executor(None);
        tracing::debug!(released, "runtime resources released");
        released
    }

    /// The host object an identifier was issued for.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidHandle`] when the identifier is unknown or its
    /// object has been collected.
    pub fn resolve(&self, identifier: &str) -> BridgeResult<HostObject> {
        self.bridge
            .resolve(identifier)
            .map_err(|state| BridgeError::InvalidHandle {
                handle: identifier.to_string(),
                state,
            })
    }

    /// The host object an identifier was issued for, as a `T`.
    pub fn resolve_as<T: HostClass>(&self, identifier: &str) -> BridgeResult<Arc<T>> {
        let object = self.resolve(identifier)?;
        object.downcast::<T>().ok_or_else(|| BridgeError::ClassMismatch {
            expected: ClassKey::of::<T>().short_name().to_string(),
            actual: object.class().short_name().to_string(),
        })
    }

    /// The script object an identifier is bound to, if it is still alive.
    pub fn script_object(&self, identifier: &str) -> Option<ScriptObject> {
        let engine = self.engine();
        let _access = engine.lock();
        let weak = self.bridge.registry().script_object(identifier)?;
        let value = engine.upgrade(&weak)?;
        ScriptObject::from_host(HostValue::Script(ScriptHandle::new(&self.bridge, value))).ok()
    }

    /// Number of script handles held by callbacks.
    pub fn tracked_resources(&self) -> usize {
        self.bridge.tracked()
    }

    /// Number of host objects currently bridged.
    pub fn registered_objects(&self) -> usize {
        self.bridge.registry().len()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.release_resources();
    }
}
