//! Value translation between script values and host values.
//!
//! [`to_script`] turns a host value into a script value, bridging host
//! objects on demand. [`to_host`] converts a script value against a target
//! [`HostType`]; every failure is a typed [`BridgeError`] that overload
//! resolution can recover from.

use crate::bridge::Bridge;
use crate::callback::CallbackAdapter;
use crate::class;
use crate::error::{BridgeError, BridgeResult};
use crate::types::{CallbackMode, HostArray, HostObject, HostType, HostValue, Primitive, ScriptHandle};
use core_types::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// Returns true if a script number of kind `from` converts to `to`.
///
/// Conversions only ever widen: `short` reaches every numeric type, `int`
/// reaches `int`, `long`, `float` and `double`, and so on down to `double`,
/// which only reaches itself. Booleans only convert to booleans.
///
/// # Examples
///
/// ```
/// use host_bridge::{widen_number, Primitive};
///
/// assert!(widen_number(Primitive::Int, Primitive::Double));
/// assert!(!widen_number(Primitive::Double, Primitive::Int));
/// assert!(!widen_number(Primitive::Int, Primitive::Short));
/// ```
pub fn widen_number(from: Primitive, to: Primitive) -> bool {
    use Primitive::*;
    match from {
        Bool => to == Bool,
        Short => matches!(to, Short | Int | Long | Float | Double),
        Int => matches!(to, Int | Long | Float | Double),
        Long => matches!(to, Long | Float | Double),
        Float => matches!(to, Float | Double),
        Double => to == Double,
    }
}

fn incompatible<T>(bridge: &Bridge, target: &HostType, value: &Value) -> BridgeResult<T> {
    Err(BridgeError::incompatible(
        target,
        format!("{} ({})", value.kind_name(), bridge.engine().display(value)),
    ))
}

// ============================================================================
// Host to script
// ============================================================================

/// Converts a host value to a script value owned by the caller.
pub(crate) fn to_script(bridge: &Arc<Bridge>, value: HostValue) -> BridgeResult<Value> {
    let engine = bridge.engine();
    let _access = engine.lock();
    Ok(match value {
        HostValue::Null => Value::Null,
        HostValue::Undefined => Value::Undefined,
        HostValue::Bool(b) => Value::Boolean(b),
        HostValue::Short(n) => Value::Smi(n as i32),
        HostValue::Int(n) => Value::Smi(n),
        HostValue::Long(n) => Value::number(n as f64),
        HostValue::Float(n) => Value::number(n as f64),
        HostValue::Double(n) => Value::number(n),
        HostValue::String(s) => Value::String(s),
        HostValue::Array(array) => sequence_to_script(bridge, array.into_values())?,
        HostValue::List(items) => sequence_to_script(bridge, items)?,
        HostValue::Map(entries) => {
            let object = engine.new_object();
            for (key, item) in entries {
                let stored = to_script(bridge, item).and_then(|item| {
                    let stored = engine.set(&object, &key, &item);
                    engine.release(&item);
                    stored.map_err(BridgeError::from)
                });
                if let Err(error) = stored {
                    engine.release(&object);
                    return Err(error);
                }
            }
            object
        }
        HostValue::Object(object) => object_to_script(bridge, &object)?,
        HostValue::Callback(adapter) => adapter.function_value()?,
        HostValue::Script(handle) if handle.belongs_to(bridge) => handle.into_value(),
        HostValue::Script(_) => {
            return Err(BridgeError::incompatible(
                "script value of this runtime",
                "script value of another runtime",
            ))
        }
    })
}

fn sequence_to_script(bridge: &Arc<Bridge>, items: Vec<HostValue>) -> BridgeResult<Value> {
    let engine = bridge.engine();
    let mut converted = Vec::with_capacity(items.len());
    let mut failure = None;
    for item in items {
        match to_script(bridge, item) {
            Ok(value) => converted.push(value),
            Err(error) => {
                failure = Some(error);
                break;
            }
        }
    }
    let array = match failure {
        Some(error) => Err(error),
        None => engine.new_array_from(&converted).map_err(BridgeError::from),
    };
    converted.iter().for_each(|value| engine.release(value));
    array
}

/// Returns the script object bridged to `object`, injecting it if needed.
pub(crate) fn object_to_script(bridge: &Arc<Bridge>, object: &HostObject) -> BridgeResult<Value> {
    let engine = bridge.engine();
    let _access = engine.lock();
    let known = bridge.registry().identifier_of(object);
    if let Some((_, weak)) = known {
        if let Some(existing) = engine.upgrade(&weak) {
            class::write_injected_interceptor(bridge, &existing);
            return Ok(existing);
        }
    }

    let descriptor = bridge.descriptor_for(object.class());
    let fresh = engine.new_object();
    let attached = descriptor
        .interceptor()
        .map(|interceptor| interceptor.script_body(engine, &fresh))
        .transpose()
        .map_err(BridgeError::from)
        .and_then(|_| class::attach(bridge, &descriptor, object.clone(), &fresh));
    match attached {
        Ok(_) => Ok(fresh),
        Err(error) => {
            tracing::debug!(class = descriptor.name(), %error, "host object injection failed");
            engine.release(&fresh);
            Err(error)
        }
    }
}

// ============================================================================
// Script to host
// ============================================================================

/// Converts a script value to `target`.
///
/// `receiver` is the `this` of the call being translated; script functions
/// wrapped as callbacks are invoked against it. The caller keeps ownership
/// of `value`.
pub(crate) fn to_host(
    bridge: &Arc<Bridge>,
    target: &HostType,
    value: &Value,
    receiver: &Value,
) -> BridgeResult<HostValue> {
    match target {
        HostType::Void => return Ok(HostValue::Undefined),
        HostType::Optional(inner) if !value.is_nullish() => {
            return to_host(bridge, inner, value, receiver)
        }
        _ => {}
    }
    if value.is_nullish() {
        return if target.accepts_null() {
            Ok(HostValue::Null)
        } else {
            incompatible(bridge, target, value)
        };
    }

    let engine = bridge.engine();
    match value {
        Value::Function(_) => match target {
            HostType::Callback(mode) => {
                CallbackAdapter::new(bridge, receiver, value, *mode).map(HostValue::Callback)
            }
            HostType::ScriptFunction => script_handle(bridge, value),
            HostType::Any if bridge.has_gc_executor() => {
                CallbackAdapter::new(bridge, receiver, value, CallbackMode::Listener)
                    .map(HostValue::Callback)
            }
            _ => incompatible(bridge, target, value),
        },
        Value::Array(_) => match target {
            HostType::Array(elem) => {
                let items = array_to_host(bridge, elem, value, receiver)?;
                HostArray::pack(elem, items).map(HostValue::Array)
            }
            HostType::List(_) | HostType::Any => {
                array_to_host(bridge, &target.element(), value, receiver).map(HostValue::List)
            }
            HostType::ScriptArray => script_handle(bridge, value),
            _ => incompatible(bridge, target, value),
        },
        Value::Object(_) => {
            let handle = engine.get(value, &bridge.config().object_handle_property)?;
            match handle {
                Value::String(identifier) => bridged_to_host(bridge, target, value, &identifier),
                other => {
                    engine.release(&other);
                    match target {
                        HostType::ScriptObject => script_handle(bridge, value),
                        HostType::Map(_) | HostType::Any => {
                            object_to_map(bridge, &target.element(), value, receiver)
                        }
                        _ => incompatible(bridge, target, value),
                    }
                }
            }
        }
        Value::Boolean(b) => match target {
            HostType::Primitive(Primitive::Bool) | HostType::Any => Ok(HostValue::Bool(*b)),
            _ => incompatible(bridge, target, value),
        },
        Value::String(s) => match target {
            HostType::String | HostType::Any => Ok(HostValue::String(s.clone())),
            _ => incompatible(bridge, target, value),
        },
        Value::Smi(n) => match target {
            HostType::Any => Ok(HostValue::Int(*n)),
            HostType::Primitive(to) if widen_number(Primitive::Int, *to) => {
                Ok(number_as(*to, *n as f64))
            }
            _ => incompatible(bridge, target, value),
        },
        Value::Double(n) => match target {
            HostType::Any | HostType::Primitive(Primitive::Double) => Ok(HostValue::Double(*n)),
            _ => incompatible(bridge, target, value),
        },
        Value::Undefined | Value::Null => incompatible(bridge, target, value),
    }
}

fn number_as(to: Primitive, n: f64) -> HostValue {
    match to {
        Primitive::Bool => HostValue::Bool(n != 0.0),
        Primitive::Short => HostValue::Short(n as i16),
        Primitive::Int => HostValue::Int(n as i32),
        Primitive::Long => HostValue::Long(n as i64),
        Primitive::Float => HostValue::Float(n as f32),
        Primitive::Double => HostValue::Double(n),
    }
}

fn script_handle(bridge: &Arc<Bridge>, value: &Value) -> BridgeResult<HostValue> {
    let owned = bridge.engine().duplicate(value)?;
    Ok(HostValue::Script(ScriptHandle::new(bridge, owned)))
}

fn bridged_to_host(
    bridge: &Arc<Bridge>,
    target: &HostType,
    value: &Value,
    identifier: &str,
) -> BridgeResult<HostValue> {
    let object = bridge
        .resolve(identifier)
        .map_err(|state| BridgeError::InvalidHandle {
            handle: identifier.to_string(),
            state,
        })?;
    let accepted = match target {
        HostType::Any => true,
        HostType::Class(key) => *key == object.class(),
        _ => false,
    };
    if !accepted {
        return Err(BridgeError::incompatible(
            target,
            format!("{} ({})", object.class().short_name(), identifier),
        ));
    }
    class::read_injected_interceptor(bridge, value);
    Ok(HostValue::Object(object))
}

fn array_to_host(
    bridge: &Arc<Bridge>,
    elem: &HostType,
    array: &Value,
    receiver: &Value,
) -> BridgeResult<Vec<HostValue>> {
    let engine = bridge.engine();
    let length = engine.array_len(array)?;
    let mut items = Vec::with_capacity(length);
    for index in 0..length {
        let item = engine.array_get(array, index)?;
        let converted = to_host(bridge, elem, &item, receiver);
        engine.release(&item);
        match converted {
            Ok(converted) => items.push(converted),
            Err(error) => {
                items.into_iter().for_each(HostValue::discard);
                return Err(error);
            }
        }
    }
    Ok(items)
}

fn object_to_map(
    bridge: &Arc<Bridge>,
    elem: &HostType,
    object: &Value,
    receiver: &Value,
) -> BridgeResult<HostValue> {
    let engine = bridge.engine();
    let mut entries = IndexMap::new();
    for key in engine.keys(object)? {
        let item = engine.get(object, &key)?;
        let converted = to_host(bridge, elem, &item, receiver);
        engine.release(&item);
        match converted {
            Ok(converted) => {
                entries.insert(key, converted);
            }
            Err(error) => {
                entries.into_values().for_each(HostValue::discard);
                return Err(error);
            }
        }
    }
    Ok(HostValue::Map(entries))
}

/// Translates call arguments for one signature.
///
/// With a variadic signature, every argument from the last parameter on is
/// collected into an array of the last parameter's element type; otherwise
/// the argument count must equal the parameter count.
pub(crate) fn to_host_args(
    bridge: &Arc<Bridge>,
    params: &[HostType],
    varargs: bool,
    args: &[Value],
    receiver: &Value,
) -> BridgeResult<Vec<HostValue>> {
    let spread = varargs && !params.is_empty() && args.len() + 1 >= params.len();
    if !spread && args.len() != params.len() {
        return Err(BridgeError::incompatible(
            format!("{} arguments", params.len()),
            format!("{} arguments", args.len()),
        ));
    }

    let fixed = if spread { params.len() - 1 } else { params.len() };
    let mut values = Vec::with_capacity(params.len());
    let mut outcome = Ok(());
    for (param, arg) in params.iter().zip(args).take(fixed) {
        match to_host(bridge, param, arg, receiver) {
            Ok(value) => values.push(value),
            Err(error) => {
                outcome = Err(error);
                break;
            }
        }
    }
    if outcome.is_ok() && spread {
        let elem = params[fixed].element();
        let mut rest = Vec::with_capacity(args.len() - fixed);
        for arg in &args[fixed..] {
            match to_host(bridge, &elem, arg, receiver) {
                Ok(value) => rest.push(value),
                Err(error) => {
                    outcome = Err(error);
                    break;
                }
            }
        }
        if outcome.is_ok() {
            match HostArray::pack(&elem, rest) {
                Ok(array) => values.push(HostValue::Array(array)),
                Err(error) => outcome = Err(error),
            }
        } else {
            rest.into_iter().for_each(HostValue::discard);
        }
    }
    match outcome {
        Ok(()) => Ok(values),
        Err(error) => {
            values.into_iter().for_each(HostValue::discard);
            Err(error)
        }
    }
}

/// Converts a value produced by script for host code that asked for no
/// particular type.
///
/// Bridged objects become their host objects and functions become listener
/// callbacks. Other heap values are handed over as owned script handles.
/// Takes ownership of `value`.
pub(crate) fn script_result_to_host(
    bridge: &Arc<Bridge>,
    value: Value,
    receiver: &Value,
) -> BridgeResult<HostValue> {
    let engine = bridge.engine();
    let _access = engine.lock();
    match value {
        Value::Undefined => Ok(HostValue::Undefined),
        Value::Null => Ok(HostValue::Null),
        Value::Boolean(b) => Ok(HostValue::Bool(b)),
        Value::Smi(n) => Ok(HostValue::Int(n)),
        Value::Double(n) => Ok(HostValue::Double(n)),
        Value::String(s) => Ok(HostValue::String(s)),
        Value::Array(_) => Ok(HostValue::Script(ScriptHandle::new(bridge, value))),
        Value::Function(_) => {
            let adapter = CallbackAdapter::new(bridge, receiver, &value, CallbackMode::Listener);
            engine.release(&value);
            adapter.map(HostValue::Callback)
        }
        Value::Object(_) => match engine.get(&value, &bridge.config().object_handle_property) {
            Ok(Value::String(identifier)) => {
                let object = bridged_to_host(bridge, &HostType::Any, &value, &identifier);
                engine.release(&value);
                object
            }
            Ok(other) => {
                engine.release(&other);
                Ok(HostValue::Script(ScriptHandle::new(bridge, value)))
            }
            Err(error) => {
                engine.release(&value);
                Err(error.into())
            }
        },
    }
}
