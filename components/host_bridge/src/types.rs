//! Host-side type descriptions and values.
//!
//! [`HostType`] describes what a host parameter or result expects, and the
//! translator converts script values against it. [`HostValue`] is the
//! dynamically typed form a value takes between translation and the typed
//! host closure that finally consumes it.

use crate::bridge::Bridge;
use crate::callback::CallbackAdapter;
use crate::class::{build_descriptor, ClassDescriptor, HostClass};
use crate::error::{BridgeError, BridgeResult};
use core_types::{JsResult, Value};
use indexmap::IndexMap;
use script_engine::Engine;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// Primitive host types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `bool`
    Bool,
    /// `i16`
    Short,
    /// `i32`
    Int,
    /// `i64`
    Long,
    /// `f32`
    Float,
    /// `f64`
    Double,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Primitive::Bool => "boolean",
            Primitive::Short => "short",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
        };
        f.write_str(name)
    }
}

/// Lifetime policy of a script function wrapped for host code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackMode {
    /// Released right after the first invocation
    CallBack,
    /// Stays usable until released explicitly or dropped
    Listener,
}

/// Identity of a host class.
///
/// Equality and hashing use the `TypeId` only.
#[derive(Clone, Copy)]
pub struct ClassKey {
    id: TypeId,
    type_name: &'static str,
    build: fn() -> ClassDescriptor,
}

impl ClassKey {
    /// The key of a host class.
    pub fn of<T: HostClass>() -> Self {
        ClassKey {
            id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            build: build_descriptor::<T>,
        }
    }

    /// Full Rust type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name without its module path.
    pub fn short_name(&self) -> &'static str {
        let base = self.type_name.split('<').next().unwrap_or(self.type_name);
        base.rsplit("::").next().unwrap_or(base)
    }

    pub(crate) fn build(&self) -> ClassDescriptor {
        (self.build)()
    }
}

impl PartialEq for ClassKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClassKey {}

impl Hash for ClassKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClassKey").field(&self.type_name).finish()
    }
}

/// What a host parameter, field or result expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostType {
    /// A primitive number or boolean
    Primitive(Primitive),
    /// An optional value; null and undefined become `None`
    Optional(Box<HostType>),
    /// A string
    String,
    /// Anything, translated by its script kind
    Any,
    /// No value; whatever the script produced is discarded
    Void,
    /// An instance of a host class
    Class(ClassKey),
    /// A fixed array with the given element type
    Array(Box<HostType>),
    /// A list, with an optional element type
    List(Option<Box<HostType>>),
    /// A string-keyed map, with an optional value type
    Map(Option<Box<HostType>>),
    /// A script function wrapped as a host callable
    Callback(CallbackMode),
    /// A raw script function
    ScriptFunction,
    /// A raw script array
    ScriptArray,
    /// A raw script object
    ScriptObject,
}

impl HostType {
    /// Returns true if null and undefined translate to this type.
    pub fn accepts_null(&self) -> bool {
        matches!(self, HostType::Any | HostType::Optional(_) | HostType::Void)
    }

    /// The element type of an array, list or map.
    pub fn element(&self) -> HostType {
        match self {
            HostType::Array(elem) => (**elem).clone(),
            HostType::List(Some(elem)) | HostType::Map(Some(elem)) => (**elem).clone(),
            _ => HostType::Any,
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Primitive(p) => write!(f, "{}", p),
            HostType::Optional(inner) => write!(f, "Option<{}>", inner),
            HostType::String => write!(f, "string"),
            HostType::Any => write!(f, "any"),
            HostType::Void => write!(f, "void"),
            HostType::Class(key) => write!(f, "{}", key.short_name()),
            HostType::Array(elem) => write!(f, "{}[]", elem),
            HostType::List(Some(elem)) => write!(f, "list<{}>", elem),
            HostType::List(None) => write!(f, "list"),
            HostType::Map(Some(elem)) => write!(f, "map<string, {}>", elem),
            HostType::Map(None) => write!(f, "map"),
            HostType::Callback(CallbackMode::CallBack) => write!(f, "callback"),
            HostType::Callback(CallbackMode::Listener) => write!(f, "listener"),
            HostType::ScriptFunction => write!(f, "script function"),
            HostType::ScriptArray => write!(f, "script array"),
            HostType::ScriptObject => write!(f, "script object"),
        }
    }
}

/// A shared host object together with its class.
#[derive(Clone)]
pub struct HostObject {
    inner: Arc<dyn Any + Send + Sync>,
    class: ClassKey,
}

impl HostObject {
    /// Wraps a host class instance.
    pub fn new<T: HostClass>(object: Arc<T>) -> Self {
        HostObject {
            inner: object,
            class: ClassKey::of::<T>(),
        }
    }

    /// The class of the wrapped object.
    pub fn class(&self) -> ClassKey {
        self.class
    }

    /// Returns the object as `Arc<T>` if it is a `T`.
    pub fn downcast<T: HostClass>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    /// Borrows the object as `T` if it is a `T`.
    pub fn downcast_ref<T: HostClass>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Returns true if both wrap the same allocation.
    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        self.addr() == other.addr()
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub(crate) fn as_any(&self) -> Arc<dyn Any + Send + Sync> {
        self.inner.clone()
    }

    pub(crate) fn downgrade(&self) -> WeakHostObject {
        WeakHostObject {
            inner: Arc::downgrade(&self.inner),
            class: self.class,
        }
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({}@{:#x})", self.class.short_name(), self.addr())
    }
}

/// Weak counterpart of [`HostObject`].
#[derive(Clone)]
pub(crate) struct WeakHostObject {
    inner: Weak<dyn Any + Send + Sync>,
    class: ClassKey,
}

impl WeakHostObject {
    pub(crate) fn upgrade(&self) -> Option<HostObject> {
        self.inner.upgrade().map(|inner| HostObject {
            inner,
            class: self.class,
        })
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

/// A host array, unboxed when its element type is primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum HostArray {
    /// `bool[]`
    Bool(Vec<bool>),
    /// `i16[]`
    Short(Vec<i16>),
    /// `i32[]`
    Int(Vec<i32>),
    /// `i64[]`
    Long(Vec<i64>),
    /// `f32[]`
    Float(Vec<f32>),
    /// `f64[]`
    Double(Vec<f64>),
    /// Any other element type
    Boxed(Vec<HostValue>),
}

macro_rules! pack_primitive {
    ($items:expr, $variant:ident, $expected:expr) => {
        $items
            .into_iter()
            .map(|item| match item {
                HostValue::$variant(v) => Ok(v),
                other => Err(BridgeError::incompatible($expected, other.type_name())),
            })
            .collect::<BridgeResult<Vec<_>>>()
            .map(HostArray::$variant)
    };
}

impl HostArray {
    /// Builds an array for `elem` from translated elements.
    ///
    /// Primitive element types produce unboxed vectors; every element must
    /// already be of that exact primitive.
    pub fn pack(elem: &HostType, items: Vec<HostValue>) -> BridgeResult<HostArray> {
        match elem {
            HostType::Primitive(Primitive::Bool) => pack_primitive!(items, Bool, elem),
            HostType::Primitive(Primitive::Short) => pack_primitive!(items, Short, elem),
            HostType::Primitive(Primitive::Int) => pack_primitive!(items, Int, elem),
            HostType::Primitive(Primitive::Long) => pack_primitive!(items, Long, elem),
            HostType::Primitive(Primitive::Float) => pack_primitive!(items, Float, elem),
            HostType::Primitive(Primitive::Double) => pack_primitive!(items, Double, elem),
            _ => Ok(HostArray::Boxed(items)),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            HostArray::Bool(v) => v.len(),
            HostArray::Short(v) => v.len(),
            HostArray::Int(v) => v.len(),
            HostArray::Long(v) => v.len(),
            HostArray::Float(v) => v.len(),
            HostArray::Double(v) => v.len(),
            HostArray::Boxed(v) => v.len(),
        }
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Boxes every element.
    pub fn into_values(self) -> Vec<HostValue> {
        match self {
            HostArray::Bool(v) => v.into_iter().map(HostValue::Bool).collect(),
            HostArray::Short(v) => v.into_iter().map(HostValue::Short).collect(),
            HostArray::Int(v) => v.into_iter().map(HostValue::Int).collect(),
            HostArray::Long(v) => v.into_iter().map(HostValue::Long).collect(),
            HostArray::Float(v) => v.into_iter().map(HostValue::Float).collect(),
            HostArray::Double(v) => v.into_iter().map(HostValue::Double).collect(),
            HostArray::Boxed(v) => v,
        }
    }
}

/// A dynamically typed host value.
#[derive(Debug, Clone)]
pub enum HostValue {
    /// Null, or an absent optional
    Null,
    /// No value (unit)
    Undefined,
    /// `bool`
    Bool(bool),
    /// `i16`
    Short(i16),
    /// `i32`
    Int(i32),
    /// `i64`
    Long(i64),
    /// `f32`
    Float(f32),
    /// `f64`
    Double(f64),
    /// `String`
    String(String),
    /// A fixed array
    Array(HostArray),
    /// A list
    List(Vec<HostValue>),
    /// A string-keyed map in insertion order
    Map(IndexMap<String, HostValue>),
    /// A host class instance
    Object(HostObject),
    /// A script function wrapped as a host callable
    Callback(Arc<CallbackAdapter>),
    /// A raw script value owned by host code
    Script(ScriptHandle),
}

impl HostValue {
    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            HostValue::Null => "null".to_string(),
            HostValue::Undefined => "undefined".to_string(),
            HostValue::Bool(_) => Primitive::Bool.to_string(),
            HostValue::Short(_) => Primitive::Short.to_string(),
            HostValue::Int(_) => Primitive::Int.to_string(),
            HostValue::Long(_) => Primitive::Long.to_string(),
            HostValue::Float(_) => Primitive::Float.to_string(),
            HostValue::Double(_) => Primitive::Double.to_string(),
            HostValue::String(_) => "string".to_string(),
            HostValue::Array(_) => "array".to_string(),
            HostValue::List(_) => "list".to_string(),
            HostValue::Map(_) => "map".to_string(),
            HostValue::Object(object) => object.class().short_name().to_string(),
            HostValue::Callback(adapter) => match adapter.mode() {
                CallbackMode::CallBack => "callback".to_string(),
                CallbackMode::Listener => "listener".to_string(),
            },
            HostValue::Script(handle) => format!("script {}", handle.value().kind_name()),
        }
    }

    /// Returns true for `Null` and `Undefined`.
    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null | HostValue::Undefined)
    }

    /// Returns the host object, if this is one.
    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Drops a value produced by a translation that is being abandoned.
    ///
    /// Callback adapters created for it are released right away instead of
    /// waiting for their last reference to drop.
    pub(crate) fn discard(self) {
        match self {
            HostValue::Callback(adapter) => adapter.release(),
            HostValue::List(items) | HostValue::Array(HostArray::Boxed(items)) => {
                items.into_iter().for_each(HostValue::discard)
            }
            HostValue::Map(entries) => entries.into_values().for_each(HostValue::discard),
            _ => {}
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Null, HostValue::Null) => true,
            (HostValue::Undefined, HostValue::Undefined) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Short(a), HostValue::Short(b)) => a == b,
            (HostValue::Int(a), HostValue::Int(b)) => a == b,
            (HostValue::Long(a), HostValue::Long(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::Double(a), HostValue::Double(b)) => a == b,
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Array(a), HostValue::Array(b)) => a == b,
            (HostValue::List(a), HostValue::List(b)) => a == b,
            (HostValue::Map(a), HostValue::Map(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => a.ptr_eq(b),
            (HostValue::Callback(a), HostValue::Callback(b)) => Arc::ptr_eq(a, b),
            (HostValue::Script(a), HostValue::Script(b)) => a.same_value(b),
            _ => false,
        }
    }
}

macro_rules! host_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    HostValue::$variant(value)
                }
            }
        )*
    };
}

host_value_from! {
    bool => Bool,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl<T: HostClass> From<Arc<T>> for HostValue {
    fn from(value: Arc<T>) -> Self {
        HostValue::Object(HostObject::new(value))
    }
}

/// A script heap value held by host code.
///
/// Owns one engine handle. Dropping it queues the handle for release on the
/// owning runtime; cloning duplicates the handle.
pub struct ScriptHandle {
    value: Value,
    bridge: Weak<Bridge>,
    armed: bool,
}

impl ScriptHandle {
    /// Takes ownership of `value`, which must be a handle owned by the caller.
    pub(crate) fn new(bridge: &Arc<Bridge>, value: Value) -> Self {
        ScriptHandle {
            value,
            bridge: Arc::downgrade(bridge),
            armed: true,
        }
    }

    /// The engine value. Valid while this handle lives.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Runs `f` against the value under exclusive engine access.
    pub fn with<R, F>(&self, f: F) -> BridgeResult<R>
    where
        F: FnOnce(&Engine, &Value) -> JsResult<R>,
    {
        let bridge = self.bridge.upgrade().ok_or(BridgeError::RuntimeDropped)?;
        let engine = bridge.engine();
        let _access = engine.lock();
        if engine.is_released(&self.value) {
            return Err(BridgeError::ReleasedResource);
        }
        Ok(f(engine, &self.value)?)
    }

    /// The runtime this handle belongs to.
    pub(crate) fn bridge(&self) -> BridgeResult<Arc<Bridge>> {
        self.bridge.upgrade().ok_or(BridgeError::RuntimeDropped)
    }

    /// Gives up ownership of the handle, returning the raw value.
    pub(crate) fn into_value(mut self) -> Value {
        self.armed = false;
        std::mem::replace(&mut self.value, Value::Undefined)
    }

    pub(crate) fn belongs_to(&self, bridge: &Arc<Bridge>) -> bool {
        std::ptr::eq(self.bridge.as_ptr(), Arc::as_ptr(bridge))
    }

    fn same_value(&self, other: &ScriptHandle) -> bool {
        match self.bridge.upgrade() {
            Some(bridge) if other.belongs_to(&bridge) => {
                bridge.engine().strict_equals(&self.value, &other.value)
            }
            _ => false,
        }
    }
}

impl Clone for ScriptHandle {
    fn clone(&self) -> Self {
        let duplicate = self
            .bridge
            .upgrade()
            .and_then(|bridge| bridge.engine().duplicate(&self.value).ok());
        match duplicate {
            Some(value) => ScriptHandle {
                value,
                bridge: self.bridge.clone(),
                armed: true,
            },
            None => ScriptHandle {
                value: Value::Undefined,
                bridge: self.bridge.clone(),
                armed: false,
            },
        }
    }
}

impl Drop for ScriptHandle {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.defer_release(vec![std::mem::replace(&mut self.value, Value::Undefined)]);
        }
    }
}

impl fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("value", &self.value)
            .field("armed", &self.armed)
            .finish()
    }
}
