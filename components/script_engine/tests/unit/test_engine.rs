//! Unit tests for the engine

use core_types::{ErrorKind, JsError, Value};
use script_engine::Engine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Object Tests
// ============================================================================

#[test]
fn test_engine_creation() {
    let engine = Engine::new();
    assert_eq!(engine.live_handles(), 0);
    assert_eq!(engine.cell_count(), 1); // global object
}

#[test]
fn test_object_get_set() {
    let engine = Engine::new();
    let obj = engine.new_object();
    engine.set(&obj, "x", &Value::Smi(1)).unwrap();
    assert_eq!(engine.get(&obj, "x").unwrap(), Value::Smi(1));
    assert_eq!(engine.get(&obj, "missing").unwrap(), Value::Undefined);
}

#[test]
fn test_get_on_primitive_is_type_error() {
    let engine = Engine::new();
    let err = engine.get(&Value::Null, "x").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn test_keys_in_insertion_order() {
    let engine = Engine::new();
    let obj = engine.new_object();
    engine.set(&obj, "b", &Value::Smi(1)).unwrap();
    engine.set(&obj, "a", &Value::Smi(2)).unwrap();
    engine.set(&obj, "c", &Value::Smi(3)).unwrap();
    assert_eq!(engine.keys(&obj).unwrap(), vec!["b", "a", "c"]);
}

#[test]
fn test_contains_and_delete() {
    let engine = Engine::new();
    let obj = engine.new_object();
    engine.set(&obj, "x", &Value::Boolean(true)).unwrap();
    assert!(engine.contains(&obj, "x").unwrap());
    assert!(engine.delete(&obj, "x").unwrap());
    assert!(!engine.contains(&obj, "x").unwrap());
    assert!(!engine.delete(&obj, "x").unwrap());
}

#[test]
fn test_nested_object_values_get_fresh_handles() {
    let engine = Engine::new();
    let outer = engine.new_object();
    let inner = engine.new_object();
    engine.set(&outer, "inner", &inner).unwrap();

    let read = engine.get(&outer, "inner").unwrap();
    assert_ne!(read.handle(), inner.handle());
    assert!(engine.strict_equals(&read, &inner));
}

// ============================================================================
// Array Tests
// ============================================================================

#[test]
fn test_array_push_and_get() {
    let engine = Engine::new();
    let array = engine.new_array();
    engine.array_push(&array, &Value::Smi(10)).unwrap();
    engine.array_push(&array, &Value::from("x")).unwrap();

    assert_eq!(engine.array_len(&array).unwrap(), 2);
    assert_eq!(engine.array_get(&array, 0).unwrap(), Value::Smi(10));
    assert_eq!(engine.array_get(&array, 5).unwrap(), Value::Undefined);
    assert_eq!(engine.get(&array, "length").unwrap(), Value::Smi(2));
    assert_eq!(engine.get(&array, "1").unwrap(), Value::from("x"));
}

#[test]
fn test_array_from_and_keys() {
    let engine = Engine::new();
    let array = engine
        .new_array_from(&[Value::Smi(1), Value::Smi(2)])
        .unwrap();
    assert_eq!(engine.keys(&array).unwrap(), vec!["0", "1"]);
}

#[test]
fn test_array_index_write_grows_array() {
    let engine = Engine::new();
    let array = engine.new_array();
    engine.set(&array, "3", &Value::Smi(7)).unwrap();
    assert_eq!(engine.array_len(&array).unwrap(), 4);
    assert_eq!(engine.array_get(&array, 1).unwrap(), Value::Undefined);
    assert_eq!(engine.array_get(&array, 3).unwrap(), Value::Smi(7));
}

#[test]
fn test_array_index_far_past_length_is_range_error() {
    let engine = Engine::new();
    let array = engine.new_array();
    let err = engine.set(&array, "4294967294", &Value::Smi(1)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RangeError);
    assert_eq!(engine.array_len(&array).unwrap(), 0);
}

#[test]
fn test_array_ops_reject_objects() {
    let engine = Engine::new();
    let obj = engine.new_object();
    assert!(engine.array_len(&obj).is_err());
}

#[test]
fn test_display_values() {
    let engine = Engine::new();
    let inner = engine.new_array_from(&[Value::Smi(10), Value::Smi(15)]).unwrap();
    let outer = engine
        .new_array_from(&[inner.clone(), Value::Double(2.5), Value::Null])
        .unwrap();
    assert_eq!(engine.display(&outer), "10,15,2.5,");
    assert_eq!(engine.display(&engine.new_object()), "[object Object]");
    let f = engine.new_function("baz", |_, _, _| Ok(Value::Undefined));
    assert_eq!(engine.display(&f), "function baz() { [native code] }");
}

// ============================================================================
// Function Tests
// ============================================================================

#[test]
fn test_call_native_function() {
    let engine = Engine::new();
    let add = engine.new_function("add", |_, _, args| {
        let a = args[0].as_number().unwrap_or(0.0);
        let b = args[1].as_number().unwrap_or(0.0);
        Ok(Value::number(a + b))
    });
    let result = engine
        .call(&add, &Value::Undefined, &[Value::Smi(3000), Value::Smi(344)])
        .unwrap();
    assert_eq!(result, Value::Smi(3344));
}

#[test]
fn test_call_non_function_is_type_error() {
    let engine = Engine::new();
    let err = engine.call(&Value::Smi(1), &Value::Undefined, &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "1 is not a function");
}

#[test]
fn test_native_receives_receiver() {
    let engine = Engine::new();
    let obj = engine.new_object();
    engine.set(&obj, "i", &Value::Smi(3300)).unwrap();
    engine
        .register_function(&obj, "doInstance", |engine, this, args| {
            let i = engine.get(this, "i")?.as_number().unwrap_or(0.0);
            Ok(Value::number(i + args[0].as_number().unwrap_or(0.0)))
        })
        .unwrap();
    let result = engine.call_method(&obj, "doInstance", &[Value::Smi(44)]).unwrap();
    assert_eq!(result, Value::Smi(3344));
}

#[test]
fn test_temporary_handles_released_after_call() {
    let engine = Engine::new();
    let obj = engine.new_object();
    let f = engine.new_function("id", |_, _, args| Ok(args[0].clone()));
    let before = engine.live_handles();

    let result = engine.call(&f, &obj, &[obj.clone()]).unwrap();

    // only the returned handle is new
    assert_eq!(engine.live_handles(), before + 1);
    assert!(engine.strict_equals(&result, &obj));
}

#[test]
fn test_native_error_propagates() {
    let engine = Engine::new();
    let f = engine.new_function("boom", |_, _, _| Err(JsError::error("boom")));
    let err = engine.call(&f, &Value::Undefined, &[]).unwrap_err();
    assert_eq!(err.message, "boom");
}

#[test]
fn test_construct_uses_fresh_receiver() {
    let engine = Engine::new();
    let ctor = engine.new_function("Foo", |engine, this, args| {
        engine.set(this, "i", &args[0])?;
        Ok(Value::Undefined)
    });
    engine.set_global("Foo", &ctor).unwrap();

    let instance = engine.new_instance("Foo", &[Value::Smi(3300)]).unwrap();
    assert_eq!(engine.get(&instance, "i").unwrap(), Value::Smi(3300));
}

#[test]
fn test_new_instance_of_unknown_is_reference_error() {
    let engine = Engine::new();
    let err = engine.new_instance("Nope", &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferenceError);
}

// ============================================================================
// Accessor Tests
// ============================================================================

#[test]
fn test_accessor_getter_and_setter() {
    let engine = Engine::new();
    let obj = engine.new_object();
    let getter = engine.new_function("get", |engine, this, _| engine.get(this, "_j"));
    let setter = engine.new_function("set", |engine, this, args| {
        let doubled = args[0].as_number().unwrap_or(0.0) * 2.0;
        engine.set(this, "_j", &Value::number(doubled))?;
        Ok(Value::Undefined)
    });
    engine
        .define_accessor(&obj, "j", Some(&getter), Some(&setter))
        .unwrap();

    engine.set(&obj, "j", &Value::Smi(3344)).unwrap();
    assert_eq!(engine.get(&obj, "j").unwrap(), Value::Smi(6688));
    assert!(!engine.keys(&obj).unwrap().contains(&"j".to_string()));
}

#[test]
fn test_getter_only_ignores_assignment() {
    let engine = Engine::new();
    let obj = engine.new_object();
    let getter = engine.new_function("get", |_, _, _| Ok(Value::Smi(7)));
    engine.define_accessor(&obj, "i", Some(&getter), None).unwrap();

    engine.set(&obj, "i", &Value::Smi(100)).unwrap();
    assert_eq!(engine.get(&obj, "i").unwrap(), Value::Smi(7));
}

#[test]
fn test_setter_only_reads_undefined() {
    let engine = Engine::new();
    let obj = engine.new_object();
    let setter = engine.new_function("set", |_, _, _| Ok(Value::Undefined));
    engine.define_accessor(&obj, "j", None, Some(&setter)).unwrap();
    assert_eq!(engine.get(&obj, "j").unwrap(), Value::Undefined);
}

// ============================================================================
// Handle Tests
// ============================================================================

#[test]
fn test_duplicate_and_release() {
    let engine = Engine::new();
    let obj = engine.new_object();
    let twin = engine.duplicate(&obj).unwrap();
    engine.release(&obj);

    assert!(engine.is_released(&obj));
    assert!(!engine.is_released(&twin));
    assert_eq!(engine.get(&obj, "x").unwrap_err().message, "Object released");
    engine.release(&obj); // second release is a no-op
}

#[test]
fn test_primitives_are_never_released() {
    let engine = Engine::new();
    assert!(!engine.is_released(&Value::Smi(1)));
    engine.release(&Value::Smi(1));
}

#[test]
fn test_internal_slot() {
    let engine = Engine::new();
    let obj = engine.new_object();
    engine.set_internal(&obj, Arc::new(42u32)).unwrap();
    let data = engine.internal(&obj).unwrap();
    assert_eq!(data.downcast_ref::<u32>(), Some(&42));
}

// ============================================================================
// Collection Tests
// ============================================================================

#[test]
fn test_collect_frees_unreachable_cells() {
    let engine = Engine::new();
    let obj = engine.new_object();
    let weak = engine.downgrade(&obj).unwrap();
    engine.release(&obj);

    assert_eq!(engine.collect_garbage(), 1);
    assert!(engine.upgrade(&weak).is_none());
}

#[test]
fn test_collect_keeps_handles_and_global_reachable() {
    let engine = Engine::new();
    let held = engine.new_object();
    let child = engine.new_object();
    engine.set(&held, "child", &child).unwrap();
    engine.set_global("g", &engine.new_array()).unwrap();
    let weak_child = engine.downgrade(&child).unwrap();
    engine.release(&child);

    engine.collect_garbage();

    assert!(engine.upgrade(&weak_child).is_some());
    assert!(engine.get_global("g").unwrap().handle().is_some());
}

#[test]
fn test_collect_traces_accessors() {
    let engine = Engine::new();
    let obj = engine.new_object();
    let getter = engine.new_function("get", |_, _, _| Ok(Value::Smi(1)));
    engine.define_accessor(&obj, "x", Some(&getter), None).unwrap();
    engine.release(&getter);

    engine.collect_garbage();
    assert_eq!(engine.get(&obj, "x").unwrap(), Value::Smi(1));
}

#[test]
fn test_freed_cell_drops_internal_data() {
    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new();
    let obj = engine.new_object();
    engine
        .set_internal(&obj, Arc::new(Tracked(drops.clone())))
        .unwrap();
    engine.release(&obj);

    engine.collect_garbage();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_slot_reuse_does_not_revive_weak_refs() {
    let engine = Engine::new();
    let first = engine.new_object();
    let weak = engine.downgrade(&first).unwrap();
    engine.release(&first);
    engine.collect_garbage();

    let _second = engine.new_object();
    assert!(engine.upgrade(&weak).is_none());
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_engine_is_shared_across_threads() {
    let engine = Arc::new(Engine::new());
    let counter = engine.new_object();
    engine.set(&counter, "n", &Value::Smi(0)).unwrap();
    engine.set_global("counter", &counter).unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    engine
                        .execute(|engine| {
                            let counter = engine.get_global("counter")?;
                            let n = engine.get(&counter, "n")?.as_number().unwrap_or(0.0);
                            engine.set(&counter, "n", &Value::number(n + 1.0))?;
                            engine.release(&counter);
                            Ok(Value::Undefined)
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(engine.get(&counter, "n").unwrap(), Value::Smi(400));
}
