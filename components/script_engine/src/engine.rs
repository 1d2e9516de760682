//! The engine: heap access, native calls and exclusive access.

use crate::gc;
use crate::heap::{released, Cell, CellId, CellKind, Heap, Property, Slot};
use crate::NativeFn;
use core_types::{ErrorKind, JsError, JsResult, Value};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Guard proving exclusive access to an engine.
pub type EngineGuard<'a> = ReentrantMutexGuard<'a, ()>;

/// Weak reference to a heap cell.
///
/// Does not keep the cell alive. [`Engine::upgrade`] returns a fresh handle
/// while the cell survives collections, and `None` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakRef {
    id: CellId,
}

/// Maximum nesting rendered by [`Engine::display`].
const DISPLAY_DEPTH: usize = 8;

/// How far past its length an index write may grow an array.
const MAX_ARRAY_GAP: usize = 1 << 16;

/// A single-threaded object engine.
///
/// All state lives behind an internal lock, and every public operation
/// takes the engine's reentrant access lock, so an `Engine` can be shared
/// between threads while only one of them is inside at any time. A thread
/// that holds [`Engine::lock`] can call back into the engine freely, which
/// is how native functions call script functions.
///
/// Heap values handed out by the engine are handles that must be released
/// with [`Engine::release`] once no longer needed. Handles passed to a
/// native function for its receiver and arguments are released by the
/// engine when the native returns; a native that keeps one must
/// [`Engine::duplicate`] it. A value returned from a native is owned by the
/// engine afterwards.
///
/// # Examples
///
/// ```
/// use core_types::Value;
/// use script_engine::Engine;
///
/// let engine = Engine::new();
/// let result = engine.execute(|engine| {
///     let obj = engine.new_object();
///     engine.set(&obj, "answer", &Value::Smi(42))?;
///     engine.get(&obj, "answer")
/// }).unwrap();
///
/// assert_eq!(result, Value::Smi(42));
/// ```
pub struct Engine {
    heap: Mutex<Heap>,
    access: ReentrantMutex<()>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heap = self.heap.lock();
        f.debug_struct("Engine")
            .field("cells", &heap.live_cells())
            .field("handles", &heap.handles.len())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with an empty global object.
    pub fn new() -> Self {
        Engine {
            heap: Mutex::new(Heap::new()),
            access: ReentrantMutex::new(()),
        }
    }

    /// Acquires exclusive access, blocking while another thread holds it.
    ///
    /// Reentrant: the holding thread may lock again.
    pub fn lock(&self) -> EngineGuard<'_> {
        self.access.lock()
    }

    /// Runs a script under exclusive access.
    ///
    /// Scripts are closures driving the engine API.
    pub fn execute<F>(&self, script: F) -> JsResult<Value>
    where
        F: FnOnce(&Engine) -> JsResult<Value>,
    {
        let _access = self.lock();
        script(self)
    }

    /// Returns a handle to the global object.
    pub fn global(&self) -> Value {
        let _access = self.lock();
        let mut heap = self.heap.lock();
        let global = heap.global;
        heap.mint(global)
    }

    /// Reads a property of the global object.
    pub fn get_global(&self, name: &str) -> JsResult<Value> {
        let global = self.global();
        let result = self.get(&global, name);
        self.release(&global);
        result
    }

    /// Writes a property of the global object.
    pub fn set_global(&self, name: &str, value: &Value) -> JsResult<()> {
        let global = self.global();
        let result = self.set(&global, name, value);
        self.release(&global);
        result
    }

    /// Creates an empty object.
    pub fn new_object(&self) -> Value {
        self.alloc(CellKind::Object)
    }

    /// Creates an empty array.
    pub fn new_array(&self) -> Value {
        self.alloc(CellKind::Array(Vec::new()))
    }

    /// Creates an array holding the given elements.
    pub fn new_array_from(&self, items: &[Value]) -> JsResult<Value> {
        let _access = self.lock();
        let mut heap = self.heap.lock();
        let slots = items
            .iter()
            .map(|item| heap.resolve(item))
            .collect::<JsResult<Vec<_>>>()?;
        let id = heap.alloc(CellKind::Array(slots));
        Ok(heap.mint(id))
    }

    /// Creates a function backed by a native closure.
    ///
    /// The closure receives the engine, the receiver (`this`) and the
    /// call arguments.
    pub fn new_function<F>(&self, name: &str, native: F) -> Value
    where
        F: Fn(&Engine, &Value, &[Value]) -> JsResult<Value> + Send + Sync + 'static,
    {
        let native: NativeFn = Arc::new(native);
        self.alloc(CellKind::Function {
            name: name.to_string(),
            native,
        })
    }

    /// Creates a native function and stores it as a property of `target`.
    pub fn register_function<F>(&self, target: &Value, name: &str, native: F) -> JsResult<()>
    where
        F: Fn(&Engine, &Value, &[Value]) -> JsResult<Value> + Send + Sync + 'static,
    {
        let function = self.new_function(name, native);
        let result = self.set(target, name, &function);
        self.release(&function);
        result
    }

    fn alloc(&self, kind: CellKind) -> Value {
        let _access = self.lock();
        let mut heap = self.heap.lock();
        let id = heap.alloc(kind);
        heap.mint(id)
    }

    fn target(heap: &Heap, target: &Value, key: &str) -> JsResult<CellId> {
        match target.handle() {
            Some(handle) => heap.lookup(handle),
            None => Err(JsError::type_error(format!(
                "Cannot access property '{}' of {}",
                key, target
            ))),
        }
    }

    /// Reads a property, running its getter if it is an accessor.
    ///
    /// Arrays expose `length` and their indices. Missing properties read as
    /// undefined.
    pub fn get(&self, target: &Value, key: &str) -> JsResult<Value> {
        let _access = self.lock();
        let (getter, this) = {
            let mut heap = self.heap.lock();
            let id = Self::target(&heap, target, key)?;
            let cell = heap.cell(id)?;
            if let CellKind::Array(items) = &cell.kind {
                if key == "length" {
                    return Ok(Value::Smi(items.len() as i32));
                }
                if let Ok(index) = key.parse::<usize>() {
                    let slot = items.get(index).cloned().unwrap_or(Slot::Undefined);
                    return Ok(heap.to_value(&slot));
                }
            }
            match cell.properties.get(key).cloned() {
                None | Some(Property::Accessor { getter: None, .. }) => return Ok(Value::Undefined),
                Some(Property::Data { value, .. }) => return Ok(heap.to_value(&value)),
                Some(Property::Accessor {
                    getter: Some(getter),
                    ..
                }) => (heap.mint(getter), heap.mint(id)),
            }
        };
        let result = self.call(&getter, &this, &[]);
        self.release(&getter);
        self.release(&this);
        result
    }

    /// Writes a property, running its setter if it is an accessor.
    ///
    /// Writing an accessor that has no setter is silently ignored.
    pub fn set(&self, target: &Value, key: &str, value: &Value) -> JsResult<()> {
        let _access = self.lock();
        let (setter, this) = {
            let mut heap = self.heap.lock();
            let id = Self::target(&heap, target, key)?;
            let slot = heap.resolve(value)?;
            let cell = heap.cell_mut(id)?;
            if let CellKind::Array(items) = &mut cell.kind {
                if let Ok(index) = key.parse::<usize>() {
                    if index > items.len() + MAX_ARRAY_GAP {
                        return Err(JsError::new(
                            ErrorKind::RangeError,
                            format!("Array index {} out of range (length {})", index, items.len()),
                        ));
                    }
                    if index >= items.len() {
                        items.resize(index + 1, Slot::Undefined);
                    }
                    items[index] = slot;
                    return Ok(());
                }
            }
            match cell.properties.get(key) {
                Some(Property::Accessor { setter: None, .. }) => return Ok(()),
                Some(Property::Accessor {
                    setter: Some(setter),
                    ..
                }) => {
                    let setter = *setter;
                    (heap.mint(setter), heap.mint(id))
                }
                _ => {
                    cell.properties.insert(
                        key.to_string(),
                        Property::Data {
                            value: slot,
                            enumerable: true,
                        },
                    );
                    return Ok(());
                }
            }
        };
        let result = self.call(&setter, &this, std::slice::from_ref(value));
        self.release(&setter);
        self.release(&this);
        result.map(|returned| self.release(&returned))
    }

    /// Defines a non-enumerable accessor property.
    ///
    /// `getter` and `setter` must be functions when present.
    pub fn define_accessor(
        &self,
        target: &Value,
        key: &str,
        getter: Option<&Value>,
        setter: Option<&Value>,
    ) -> JsResult<()> {
        let _access = self.lock();
        let mut heap = self.heap.lock();
        let id = Self::target(&heap, target, key)?;
        let function_cell = |value: Option<&Value>| -> JsResult<Option<CellId>> {
            match value {
                None => Ok(None),
                Some(Value::Function(handle)) => heap.lookup(*handle).map(Some),
                Some(other) => Err(JsError::type_error(format!(
                    "Accessor for '{}' must be a function, got {}",
                    key,
                    other.kind_name()
                ))),
            }
        };
        let getter = function_cell(getter)?;
        let setter = function_cell(setter)?;
        heap.cell_mut(id)?
            .properties
            .insert(key.to_string(), Property::Accessor { getter, setter });
        Ok(())
    }

    /// Returns true if `target` has an own property named `key`.
    pub fn contains(&self, target: &Value, key: &str) -> JsResult<bool> {
        let _access = self.lock();
        let heap = self.heap.lock();
        let id = Self::target(&heap, target, key)?;
        let cell = heap.cell(id)?;
        if let CellKind::Array(items) = &cell.kind {
            if key == "length" {
                return Ok(true);
            }
            if let Ok(index) = key.parse::<usize>() {
                return Ok(index < items.len());
            }
        }
        Ok(cell.properties.contains_key(key))
    }

    /// Own enumerable keys in insertion order; array indices first.
    pub fn keys(&self, target: &Value) -> JsResult<Vec<String>> {
        let _access = self.lock();
        let heap = self.heap.lock();
        let id = Self::target(&heap, target, "keys")?;
        let cell = heap.cell(id)?;
        let mut keys = Vec::new();
        if let CellKind::Array(items) = &cell.kind {
            keys.extend((0..items.len()).map(|i| i.to_string()));
        }
        keys.extend(cell.properties.iter().filter_map(|(key, property)| match property {
            Property::Data {
                enumerable: true, ..
            } => Some(key.clone()),
            _ => None,
        }));
        Ok(keys)
    }

    /// Removes an own property, returning whether it existed.
    pub fn delete(&self, target: &Value, key: &str) -> JsResult<bool> {
        let _access = self.lock();
        let mut heap = self.heap.lock();
        let id = Self::target(&heap, target, key)?;
        Ok(heap.cell_mut(id)?.properties.shift_remove(key).is_some())
    }

    fn array_cell<'h>(heap: &'h mut Heap, array: &Value) -> JsResult<&'h mut Vec<Slot>> {
        let id = match array {
            Value::Array(handle) => heap.lookup(*handle)?,
            other => {
                return Err(JsError::type_error(format!(
                    "{} is not an array",
                    other.kind_name()
                )))
            }
        };
        match &mut heap.cell_mut(id)?.kind {
            CellKind::Array(items) => Ok(items),
            _ => Err(released()),
        }
    }

    /// Number of elements in an array.
    pub fn array_len(&self, array: &Value) -> JsResult<usize> {
        let _access = self.lock();
        let mut heap = self.heap.lock();
        Ok(Self::array_cell(&mut heap, array)?.len())
    }

    /// Element at `index`, or undefined when out of bounds.
    pub fn array_get(&self, array: &Value, index: usize) -> JsResult<Value> {
        let _access = self.lock();
        let mut heap = self.heap.lock();
        let slot = Self::array_cell(&mut heap, array)?
            .get(index)
            .cloned()
            .unwrap_or(Slot::Undefined);
        Ok(heap.to_value(&slot))
    }

    /// Appends an element to an array.
    pub fn array_push(&self, array: &Value, value: &Value) -> JsResult<()> {
        let _access = self.lock();
        let mut heap = self.heap.lock();
        let slot = heap.resolve(value)?;
        Self::array_cell(&mut heap, array)?.push(slot);
        Ok(())
    }

    /// Calls `function` with `receiver` as `this`.
    ///
    /// The caller keeps ownership of `receiver` and `args`; the result is a
    /// new value owned by the caller.
    pub fn call(&self, function: &Value, receiver: &Value, args: &[Value]) -> JsResult<Value> {
        let _access = self.lock();
        let (native, this, argv) = {
            let mut heap = self.heap.lock();
            let native = match function.handle().map(|h| heap.lookup(h)) {
                Some(Ok(id)) => match &heap.cell(id)?.kind {
                    CellKind::Function { native, .. } => Some(native.clone()),
                    _ => None,
                },
                Some(Err(e)) => return Err(e),
                None => None,
            };
            let Some(native) = native else {
                return Err(JsError::type_error(format!(
                    "{} is not a function",
                    Self::display_slot(&heap, &heap.resolve(function)?, 0)
                )));
            };
            let this = heap.resolve(receiver)?;
            let slots = args
                .iter()
                .map(|arg| heap.resolve(arg))
                .collect::<JsResult<Vec<_>>>()?;
            let this = heap.to_value(&this);
            let argv: Vec<Value> = slots.iter().map(|slot| heap.to_value(slot)).collect();
            (native, this, argv)
        };

        let outcome = native(self, &this, &argv);

        let mut heap = self.heap.lock();
        let temps: Vec<_> = std::iter::once(&this)
            .chain(argv.iter())
            .filter_map(Value::handle)
            .collect();
        let result = outcome.and_then(|returned| {
            let slot = heap.resolve(&returned)?;
            let fresh = heap.to_value(&slot);
            if let Some(handle) = returned.handle() {
                if !temps.contains(&handle) {
                    heap.release(handle);
                }
            }
            Ok(fresh)
        });
        for handle in temps {
            heap.release(handle);
        }
        result
    }

    /// Reads `name` from `target` and calls it with `target` as `this`.
    pub fn call_method(&self, target: &Value, name: &str, args: &[Value]) -> JsResult<Value> {
        let _access = self.lock();
        let function = self.get(target, name)?;
        if !function.is_function() {
            self.release(&function);
            return Err(JsError::type_error(format!("{} is not a function", name)));
        }
        let result = self.call(&function, target, args);
        self.release(&function);
        result
    }

    /// Calls `constructor` on a fresh object, as `new` does.
    ///
    /// If the constructor returns a heap value that value is the result,
    /// otherwise the fresh object is.
    pub fn construct(&self, constructor: &Value, args: &[Value]) -> JsResult<Value> {
        let _access = self.lock();
        if !constructor.is_function() {
            return Err(JsError::type_error(format!(
                "{} is not a constructor",
                self.display(constructor)
            )));
        }
        let object = self.new_object();
        match self.call(constructor, &object, args) {
            Ok(returned) if returned.handle().is_some() => {
                self.release(&object);
                Ok(returned)
            }
            Ok(_) => Ok(object),
            Err(e) => {
                self.release(&object);
                Err(e)
            }
        }
    }

    /// Constructs an instance of the global constructor `name`.
    pub fn new_instance(&self, name: &str, args: &[Value]) -> JsResult<Value> {
        let _access = self.lock();
        let constructor = self.get_global(name)?;
        if constructor.is_nullish() {
            return Err(JsError::reference_error(format!("{} is not defined", name)));
        }
        let result = self.construct(&constructor, args);
        self.release(&constructor);
        result
    }

    /// Returns a new, independently releasable handle to the same value.
    pub fn duplicate(&self, value: &Value) -> JsResult<Value> {
        let _access = self.lock();
        let mut heap = self.heap.lock();
        let slot = heap.resolve(value)?;
        Ok(heap.to_value(&slot))
    }

    /// Releases a handle. Primitives and already released handles are ignored.
    pub fn release(&self, value: &Value) {
        if let Some(handle) = value.handle() {
            let _access = self.lock();
            self.heap.lock().release(handle);
        }
    }

    /// Returns true if `value` is a handle that is no longer valid.
    pub fn is_released(&self, value: &Value) -> bool {
        match value.handle() {
            Some(handle) => {
                let _access = self.lock();
                self.heap.lock().lookup(handle).is_err()
            }
            None => false,
        }
    }

    /// Number of handles currently held by embedders.
    pub fn live_handles(&self) -> usize {
        let _access = self.lock();
        self.heap.lock().handles.len()
    }

    /// Number of live heap cells, including the global object.
    pub fn cell_count(&self) -> usize {
        let _access = self.lock();
        self.heap.lock().live_cells()
    }

    /// Returns true if both values are the same primitive or the same cell.
    pub fn strict_equals(&self, a: &Value, b: &Value) -> bool {
        let _access = self.lock();
        let heap = self.heap.lock();
        match (heap.resolve(a), heap.resolve(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Stores embedder data on a heap cell, replacing any previous data.
    ///
    /// The data lives as long as the cell.
    pub fn set_internal(&self, target: &Value, data: Arc<dyn Any + Send + Sync>) -> JsResult<()> {
        let _access = self.lock();
        let previous = {
            let mut heap = self.heap.lock();
            let id = Self::target(&heap, target, "internal")?;
            heap.cell_mut(id)?.internal.replace(data)
        };
        drop(previous);
        Ok(())
    }

    /// Embedder data stored on a heap cell.
    pub fn internal(&self, target: &Value) -> Option<Arc<dyn Any + Send + Sync>> {
        let _access = self.lock();
        let heap = self.heap.lock();
        let id = target.handle().and_then(|h| heap.lookup(h).ok())?;
        heap.cell(id).ok()?.internal.clone()
    }

    /// Creates a weak reference to a heap value.
    pub fn downgrade(&self, value: &Value) -> JsResult<WeakRef> {
        let _access = self.lock();
        let heap = self.heap.lock();
        let id = Self::target(&heap, value, "weak")?;
        Ok(WeakRef { id })
    }

    /// Returns a new handle if the referenced cell is still alive.
    pub fn upgrade(&self, weak: &WeakRef) -> Option<Value> {
        let _access = self.lock();
        let mut heap = self.heap.lock();
        if heap.is_live(weak.id) {
            Some(heap.mint(weak.id))
        } else {
            None
        }
    }

    /// Runs a full collection and returns the number of freed cells.
    pub fn collect_garbage(&self) -> usize {
        let _access = self.lock();
        let freed: Vec<Cell> = {
            let mut heap = self.heap.lock();
            gc::collect(&mut heap)
        };
        let count = freed.len();
        tracing::debug!(freed = count, "engine collection finished");
        // Dropping runs embedder destructors; the heap lock is already released.
        drop(freed);
        count
    }

    /// String conversion of a value.
    ///
    /// Arrays join their elements with commas, functions render their name
    /// and plain objects render as `[object Object]`. Getters are not run.
    pub fn display(&self, value: &Value) -> String {
        let _access = self.lock();
        let heap = self.heap.lock();
        match heap.resolve(value) {
            Ok(slot) => Self::display_slot(&heap, &slot, 0),
            Err(_) => "[released]".to_string(),
        }
    }

    fn display_slot(heap: &Heap, slot: &Slot, depth: usize) -> String {
        match slot {
            Slot::Undefined => "undefined".to_string(),
            Slot::Null => "null".to_string(),
            Slot::Boolean(b) => b.to_string(),
            Slot::Smi(n) => n.to_string(),
            Slot::Double(n) => Value::Double(*n).to_string(),
            Slot::String(s) => s.clone(),
            Slot::Cell(id) => match heap.cell(*id).map(|c| &c.kind) {
                Ok(CellKind::Object) => "[object Object]".to_string(),
                Ok(CellKind::Function { name, .. }) => {
                    format!("function {}() {{ [native code] }}", name)
                }
                Ok(CellKind::Array(items)) if depth < DISPLAY_DEPTH => items
                    .iter()
                    .map(|item| match item {
                        Slot::Undefined | Slot::Null => String::new(),
                        other => Self::display_slot(heap, other, depth + 1),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                Ok(CellKind::Array(_)) => "...".to_string(),
                Err(_) => "[released]".to_string(),
            },
        }
    }
}
