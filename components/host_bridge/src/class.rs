//! Host classes and their script-side proxies.
//!
//! A host type becomes visible to script by implementing [`HostClass`] and
//! declaring its members on a [`ClassBuilder`]. The builder produces a
//! [`ClassDescriptor`], built once per type and runtime, which the bridge
//! uses to:
//!
//! - register a constructor function that creates host instances from
//!   script `new` calls;
//! - attach host instances to script objects, exposing methods and
//!   properties or handing the object to a class interceptor.
//!
//! # Member detection
//!
//! Members registered with [`ClassBuilder::method`] and
//! [`ClassBuilder::static_method`] are auto-detected: they are exposed unless
//! ignored or auto-detection is disabled. Auto-detected instance methods
//! following the bean naming convention also become properties: `getX()` and
//! `isX()` with no parameters are getters of `x`, and `setX(value)` is its
//! setter. The methods stay callable under their own names as well.
//!
//! Members registered with [`ClassBuilder::function`],
//! [`ClassBuilder::getter`], [`ClassBuilder::setter`] and
//! [`ClassBuilder::static_function`] are always exposed.

use crate::bridge::Bridge;
use crate::convert::{FromHost, HostArgs, IntoHost};
use crate::error::{BridgeError, BridgeResult, HostError, LifetimeError};
use crate::interceptor::{ErasedInterceptor, InterceptorContext};
use crate::method::{OverloadSet, Signature};
use crate::translator;
use crate::types::{ClassKey, HostObject, HostValue};
use core_types::{JsError, Value};
use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A Rust type that can be exposed to script.
///
/// # Examples
///
/// ```
/// use host_bridge::{ClassBuilder, HostClass};
/// use std::sync::atomic::{AtomicI32, Ordering};
///
/// struct Counter {
///     value: AtomicI32,
/// }
///
/// impl HostClass for Counter {
///     fn describe(class: &mut ClassBuilder<Self>) {
///         class
///             .constructor(|(start,): (i32,)| Counter { value: AtomicI32::new(start) })
///             .method("add", |counter: &Counter, (n,): (i32,)| {
///                 counter.value.fetch_add(n, Ordering::SeqCst) + n
///             })
///             .method("getValue", |counter: &Counter, (): ()| counter.value.load(Ordering::SeqCst));
///     }
/// }
/// ```
pub trait HostClass: Any + Send + Sync + Sized {
    /// Declares the members visible to script.
    fn describe(class: &mut ClassBuilder<Self>);

    /// Default script-visible class name.
    fn class_name() -> String {
        ClassKey::of::<Self>().short_name().to_string()
    }
}

/// Collects the members of a host class.
pub struct ClassBuilder<T> {
    name: String,
    constructors: OverloadSet,
    auto_methods: Vec<(String, Signature)>,
    auto_statics: Vec<(String, Signature)>,
    functions: Vec<(String, Signature)>,
    static_functions: Vec<(String, Signature)>,
    getters: Vec<(String, Signature)>,
    setters: Vec<(String, Signature)>,
    ignored: HashSet<String>,
    auto_detect: bool,
    _class: PhantomData<fn() -> T>,
}

impl<T: HostClass> ClassBuilder<T> {
    pub(crate) fn new() -> Self {
        let name = T::class_name();
        ClassBuilder {
            constructors: OverloadSet::new(name.clone()),
            name,
            auto_methods: Vec::new(),
            auto_statics: Vec::new(),
            functions: Vec::new(),
            static_functions: Vec::new(),
            getters: Vec::new(),
            setters: Vec::new(),
            ignored: HashSet::new(),
            auto_detect: true,
            _class: PhantomData,
        }
    }

    /// Sets the script-visible class name.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Adds a constructor overload.
    pub fn constructor<A, F>(&mut self, f: F) -> &mut Self
    where
        A: HostArgs,
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        let name = self.name.clone();
        self.constructors
            .add(Signature::free(&name, move |args: A| Arc::new(f(args))));
        self
    }

    /// Adds a fallible constructor overload.
    pub fn try_constructor<A, E, F>(&mut self, f: F) -> &mut Self
    where
        A: HostArgs,
        E: Into<HostError>,
        F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
    {
        let name = self.name.clone();
        self.constructors
            .add(Signature::free(&name, move |args: A| f(args).map(Arc::new)));
        self
    }

    /// Adds an auto-detected instance method overload.
    pub fn method<A, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: HostArgs,
        R: IntoHost,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        self.auto_methods
            .push((name.to_string(), Signature::instance(name, f)));
        self
    }

    /// Adds an auto-detected static method overload.
    pub fn static_method<A, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: HostArgs,
        R: IntoHost,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.auto_statics
            .push((name.to_string(), Signature::free(name, f)));
        self
    }

    /// Adds an instance method overload that is always exposed.
    pub fn function<A, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: HostArgs,
        R: IntoHost,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        self.functions
            .push((name.to_string(), Signature::instance(name, f)));
        self
    }

    /// Adds a static method overload that is always exposed.
    pub fn static_function<A, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: HostArgs,
        R: IntoHost,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.static_functions
            .push((name.to_string(), Signature::free(name, f)));
        self
    }

    /// Adds a property getter.
    pub fn getter<R, F>(&mut self, property: &str, f: F) -> &mut Self
    where
        R: IntoHost,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let signature = Signature::instance(property, move |this: &T, (): ()| f(this));
        self.getters.push((property.to_string(), signature));
        self
    }

    /// Adds a property setter.
    pub fn setter<V, F>(&mut self, property: &str, f: F) -> &mut Self
    where
        V: FromHost,
        F: Fn(&T, V) + Send + Sync + 'static,
    {
        let signature = Signature::instance(property, move |this: &T, (value,): (V,)| f(this, value));
        self.setters.push((property.to_string(), signature));
        self
    }

    /// Excludes an auto-detected member.
    pub fn ignore(&mut self, name: &str) -> &mut Self {
        self.ignored.insert(name.to_string());
        self
    }

    /// Stops exposing auto-detected members.
    pub fn disable_auto_detect(&mut self) -> &mut Self {
        self.auto_detect = false;
        self
    }

    pub(crate) fn finish(self) -> ClassDescriptor {
        let ClassBuilder {
            name,
            mut constructors,
            auto_methods,
            auto_statics,
            functions,
            static_functions,
            getters,
            setters,
            ignored,
            auto_detect,
            ..
        } = self;
        constructors.rename(name.clone());

        let mut methods = Tables::default();
        let mut statics = Tables::default();
        let mut getter_sets = Tables::default();
        let mut setter_sets = Tables::default();

        if auto_detect {
            for (member, signature) in auto_methods {
                if ignored.contains(&member) {
                    continue;
                }
                match bean_property(&member, signature.params().len()) {
                    Some(BeanAccessor::Getter(property)) => getter_sets.add(&property, signature.clone()),
                    Some(BeanAccessor::Setter(property)) => setter_sets.add(&property, signature.clone()),
                    None => {}
                }
                methods.add(&member, signature);
            }
            for (member, signature) in auto_statics {
                if !ignored.contains(&member) {
                    statics.add(&member, signature);
                }
            }
        }
        for (member, signature) in functions {
            methods.add(&member, signature);
        }
        for (member, signature) in static_functions {
            statics.add(&member, signature);
        }
        for (property, signature) in getters {
            getter_sets.add(&property, signature);
        }
        for (property, signature) in setters {
            setter_sets.add(&property, signature);
        }

        let mut properties: IndexMap<String, PropertyAccessors> = IndexMap::new();
        for (property, getter) in getter_sets.finish() {
            properties.entry(property).or_default().getter = Some(getter);
        }
        for (property, setter) in setter_sets.finish() {
            properties.entry(property).or_default().setter = Some(setter);
        }

        ClassDescriptor {
            key: ClassKey::of::<T>(),
            name,
            constructors: Arc::new(constructors),
            methods: methods.finish(),
            statics: statics.finish(),
            properties,
            auto_detect,
            interceptor: None,
        }
    }
}

#[derive(Default)]
struct Tables {
    sets: IndexMap<String, OverloadSet>,
}

impl Tables {
    fn add(&mut self, name: &str, signature: Signature) {
        self.sets
            .entry(name.to_string())
            .or_insert_with(|| OverloadSet::new(name))
            .add(signature);
    }

    fn finish(self) -> IndexMap<String, Arc<OverloadSet>> {
        self.sets
            .into_iter()
            .map(|(name, set)| (name, Arc::new(set)))
            .collect()
    }
}

enum BeanAccessor {
    Getter(String),
    Setter(String),
}

/// Property name for a bean-style accessor method.
fn bean_property(method: &str, arity: usize) -> Option<BeanAccessor> {
    let property = |rest: &str| -> Option<String> {
        let mut chars = rest.chars();
        let first = chars.next()?;
        if !first.is_uppercase() {
            return None;
        }
        Some(first.to_lowercase().chain(chars).collect())
    };
    if let Some(rest) = method.strip_prefix("get") {
        return (arity == 0).then(|| property(rest)).flatten().map(BeanAccessor::Getter);
    }
    if let Some(rest) = method.strip_prefix("is") {
        return (arity == 0).then(|| property(rest)).flatten().map(BeanAccessor::Getter);
    }
    if let Some(rest) = method.strip_prefix("set") {
        return (arity == 1).then(|| property(rest)).flatten().map(BeanAccessor::Setter);
    }
    None
}

/// Getter and setter of one property.
#[derive(Debug, Clone, Default)]
pub struct PropertyAccessors {
    /// Reads the property; without it reads yield undefined
    pub getter: Option<Arc<OverloadSet>>,
    /// Writes the property; without it writes are ignored
    pub setter: Option<Arc<OverloadSet>>,
}

/// Everything the bridge knows about a host class.
pub struct ClassDescriptor {
    key: ClassKey,
    name: String,
    constructors: Arc<OverloadSet>,
    methods: IndexMap<String, Arc<OverloadSet>>,
    statics: IndexMap<String, Arc<OverloadSet>>,
    properties: IndexMap<String, PropertyAccessors>,
    auto_detect: bool,
    interceptor: Option<Arc<dyn ErasedInterceptor>>,
}

impl ClassDescriptor {
    /// The class identity.
    pub fn key(&self) -> ClassKey {
        self.key
    }

    /// Default script-visible name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Constructor overloads.
    pub fn constructors(&self) -> &OverloadSet {
        &self.constructors
    }

    /// Instance methods in registration order.
    pub fn methods(&self) -> impl Iterator<Item = (&str, &OverloadSet)> {
        self.methods.iter().map(|(name, set)| (name.as_str(), set.as_ref()))
    }

    /// Instance method overloads registered under `name`.
    pub fn method(&self, name: &str) -> Option<&OverloadSet> {
        self.methods.get(name).map(Arc::as_ref)
    }

    /// Static methods in registration order.
    pub fn statics(&self) -> impl Iterator<Item = (&str, &OverloadSet)> {
        self.statics.iter().map(|(name, set)| (name.as_str(), set.as_ref()))
    }

    /// Properties with their accessors.
    pub fn properties(&self) -> &IndexMap<String, PropertyAccessors> {
        &self.properties
    }

    /// Returns true unless auto-detection was disabled.
    pub fn auto_detect(&self) -> bool {
        self.auto_detect
    }

    /// Returns true if instances are handed to an interceptor.
    pub fn has_interceptor(&self) -> bool {
        self.interceptor.is_some()
    }

    pub(crate) fn interceptor(&self) -> Option<&Arc<dyn ErasedInterceptor>> {
        self.interceptor.as_ref()
    }

    pub(crate) fn with_interceptor(mut self, interceptor: Option<Arc<dyn ErasedInterceptor>>) -> Self {
        self.interceptor = interceptor;
        self
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("constructors", &self.constructors.signatures().len())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("statics", &self.statics.keys().collect::<Vec<_>>())
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}

pub(crate) fn build_descriptor<T: HostClass>() -> ClassDescriptor {
    let mut builder = ClassBuilder::<T>::new();
    T::describe(&mut builder);
    builder.finish()
}

// ============================================================================
// Script-side proxies
// ============================================================================

/// Creates a native function dispatching to `overloads`.
fn proxy_function(
    bridge: &Arc<Bridge>,
    name: &str,
    overloads: Arc<OverloadSet>,
    this: Option<HostObject>,
) -> Value {
    let weak = Arc::downgrade(bridge);
    bridge.engine().new_function(name, move |_engine, receiver, args| {
        let bridge = weak
            .upgrade()
            .ok_or_else(|| JsError::from(BridgeError::RuntimeDropped))?;
        overloads
            .invoke(&bridge, this.as_ref(), receiver, args)
            .map_err(JsError::from)
    })
}

/// Registers the constructor function of a class on `root` under `name`.
///
/// Static methods become properties of the constructor function unless the
/// class has an interceptor.
pub(crate) fn register_constructor(
    bridge: &Arc<Bridge>,
    descriptor: &Arc<ClassDescriptor>,
    root: &Value,
    name: &str,
) -> BridgeResult<()> {
    let engine = bridge.engine();
    let _access = engine.lock();
    let weak = Arc::downgrade(bridge);
    let class = descriptor.clone();
    let constructor = engine.new_function(name, move |_engine, receiver, args| {
        let bridge = weak
            .upgrade()
            .ok_or_else(|| JsError::from(BridgeError::RuntimeDropped))?;
        construct(&bridge, &class, receiver, args)
            .map(|_| Value::Undefined)
            .map_err(JsError::from)
    });

    let mut outcome = Ok(());
    if descriptor.interceptor().is_none() {
        for (static_name, overloads) in &descriptor.statics {
            let function = proxy_function(bridge, static_name, overloads.clone(), None);
            outcome = engine.set(&constructor, static_name, &function);
            engine.release(&function);
            if outcome.is_err() {
                break;
            }
        }
    }
    let outcome = outcome.and_then(|_| engine.set(root, name, &constructor));
    engine.release(&constructor);
    outcome?;
    tracing::debug!(class = descriptor.name(), name, "constructor registered");
    Ok(())
}

/// Handles a script construction call: creates the host instance and
/// attaches it to `receiver`.
fn construct(
    bridge: &Arc<Bridge>,
    descriptor: &Arc<ClassDescriptor>,
    receiver: &Value,
    args: &[Value],
) -> BridgeResult<String> {
    let created = descriptor
        .constructors()
        .invoke_host(bridge, None, receiver, args)?;
    let HostValue::Object(object) = created else {
        return Err(BridgeError::ResultType {
            expected: "host object",
            actual: created.type_name(),
        });
    };
    if let Some(interceptor) = descriptor.interceptor() {
        interceptor.script_body(bridge.engine(), receiver)?;
    }
    attach(bridge, descriptor, object, receiver)
}

/// Binds a host object to a script object and returns its identifier.
///
/// Classes without an interceptor get their methods and properties defined
/// on the script object; classes with one get an interceptor context and
/// their inject hooks run.
pub(crate) fn attach(
    bridge: &Arc<Bridge>,
    descriptor: &Arc<ClassDescriptor>,
    object: HostObject,
    script: &Value,
) -> BridgeResult<String> {
    if object.class() != descriptor.key() {
        return Err(BridgeError::ClassMismatch {
            expected: descriptor.key().short_name().to_string(),
            actual: object.class().short_name().to_string(),
        });
    }
    let engine = bridge.engine();
    let _access = engine.lock();
    let config = bridge.config();

    let weak = engine.downgrade(script)?;
    let identifier = bridge.registry().attach(&object, weak);
    engine.set(
        script,
        &config.object_handle_property,
        &Value::String(identifier.clone()),
    )?;
    engine.set_internal(script, object.as_any())?;

    if descriptor.interceptor().is_some() {
        let created = bridge.registry().create_context(&identifier);
        let (context_id, _context) = created.ok_or_else(|| BridgeError::InvalidHandle {
            handle: identifier.clone(),
            state: LifetimeError::Collected,
        })?;
        engine.set(script, &config.context_handle_property, &Value::String(context_id))?;
        write_injected_interceptor(bridge, script);
    } else {
        bind_members(bridge, descriptor, &object, script)?;
    }

    tracing::trace!(class = descriptor.name(), id = %identifier, "host object attached");
    Ok(identifier)
}

fn bind_members(
    bridge: &Arc<Bridge>,
    descriptor: &ClassDescriptor,
    object: &HostObject,
    script: &Value,
) -> BridgeResult<()> {
    let engine = bridge.engine();
    for (name, overloads) in &descriptor.methods {
        let function = proxy_function(bridge, name, overloads.clone(), Some(object.clone()));
        let stored = engine.set(script, name, &function);
        engine.release(&function);
        stored?;
    }
    for (property, accessors) in &descriptor.properties {
        let getter = accessors
            .getter
            .as_ref()
            .map(|set| proxy_function(bridge, property, set.clone(), Some(object.clone())));
        let setter = accessors
            .setter
            .as_ref()
            .map(|set| proxy_function(bridge, property, set.clone(), Some(object.clone())));
        let defined = engine.define_accessor(script, property, getter.as_ref(), setter.as_ref());
        getter.iter().chain(setter.iter()).for_each(|f| engine.release(f));
        defined?;
    }
    Ok(())
}

// ============================================================================
// Interceptor hooks
// ============================================================================

struct Intercepted {
    object: HostObject,
    context: Arc<InterceptorContext>,
    interceptor: Arc<dyn ErasedInterceptor>,
}

/// Looks up the host object, context and interceptor of a script object.
///
/// Returns `None` without logging for objects that carry no context, and
/// with a warning when the handle or context no longer resolves.
fn intercepted(bridge: &Arc<Bridge>, script: &Value) -> Option<Intercepted> {
    let engine = bridge.engine();
    let config = bridge.config();
    let context_id = match engine.get(script, &config.context_handle_property) {
        Ok(Value::String(id)) => id,
        Ok(other) => {
            engine.release(&other);
            return None;
        }
        Err(_) => return None,
    };
    let identifier = match engine.get(script, &config.object_handle_property) {
        Ok(Value::String(id)) => id,
        Ok(other) => {
            engine.release(&other);
            return None;
        }
        Err(_) => return None,
    };

    let (object, context) = {
        let registry = bridge.registry();
        (registry.resolve(&identifier), registry.context(&context_id))
    };
    let (object, context) = match (object, context) {
        (Ok(object), Some(context)) => (object, context),
        (object, context) => {
            tracing::warn!(
                id = %identifier,
                context = %context_id,
                object = ?object.err(),
                context_found = context.is_some(),
                "interceptor state unavailable"
            );
            return None;
        }
    };
    let descriptor = bridge.descriptor_for(object.class());
    let interceptor = descriptor.interceptor()?.clone();
    Some(Intercepted {
        object,
        context,
        interceptor,
    })
}

fn script_hook(bridge: &Arc<Bridge>, script: &Value, hook: &str) -> Option<Value> {
    let engine = bridge.engine();
    match engine.get(script, hook) {
        Ok(function) if function.is_function() => Some(function),
        Ok(other) => {
            engine.release(&other);
            None
        }
        Err(_) => None,
    }
}

fn call_hook(
    bridge: &Arc<Bridge>,
    script: &Value,
    function: &Value,
    context: Arc<InterceptorContext>,
) -> BridgeResult<()> {
    let engine = bridge.engine();
    let argument = translator::to_script(bridge, HostValue::Object(HostObject::new(context)))?;
    let result = engine.call(function, script, std::slice::from_ref(&argument));
    engine.release(&argument);
    engine.release(&result?);
    Ok(())
}

/// Runs the interceptor's `on_inject`, then the script inject hook.
///
/// Does nothing for script objects without an interceptor context or
/// without an inject hook function. Failures are logged, not raised.
pub(crate) fn write_injected_interceptor(bridge: &Arc<Bridge>, script: &Value) {
    let engine = bridge.engine();
    let _access = engine.lock();
    let Some(state) = intercepted(bridge, script) else {
        return;
    };
    let Some(hook) = script_hook(bridge, script, &bridge.config().inject_hook) else {
        return;
    };
    state.interceptor.on_inject(&state.context, &state.object);
    if let Err(error) = call_hook(bridge, script, &hook, state.context) {
        tracing::warn!(%error, "inject hook failed");
    }
    engine.release(&hook);
}

/// Runs the script extract hook, then the interceptor's `on_extract`.
///
/// Does nothing for script objects without an interceptor context or
/// without an extract hook function. Failures are logged, not raised.
pub(crate) fn read_injected_interceptor(bridge: &Arc<Bridge>, script: &Value) {
    let engine = bridge.engine();
    let _access = engine.lock();
    let Some(state) = intercepted(bridge, script) else {
        return;
    };
    let Some(hook) = script_hook(bridge, script, &bridge.config().extract_hook) else {
        return;
    };
    let called = call_hook(bridge, script, &hook, state.context.clone());
    engine.release(&hook);
    match called {
        Ok(()) => state.interceptor.on_extract(&state.context, &state.object),
        Err(error) => tracing::warn!(%error, "extract hook failed"),
    }
}
