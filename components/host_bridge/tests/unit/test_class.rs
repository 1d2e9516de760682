//! Unit tests for class registration, construction and member binding

use crate::test_utils::{bridge_error, construct_and_call, runtime, Foo};
use core_types::{ErrorKind, Value};
use host_bridge::{BridgeError, ClassBuilder, HostClass};
use std::sync::atomic::{AtomicI32, Ordering};

// ============================================================================
// Construction and overloads
// ============================================================================

#[test]
fn test_constructed_state_reaches_methods() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let result = runtime
        .execute_integer(|engine| {
            construct_and_call(engine, "Foo", &[Value::Smi(3300)], "doInstance", &[Value::Smi(44)])
        })
        .unwrap();

    assert_eq!(result, 3344);
}

#[test]
fn test_overloads_route_by_arity() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let result = runtime
        .execute_integer(|engine| {
            construct_and_call(
                engine,
                "Foo",
                &[Value::Smi(3000)],
                "doInstance",
                &[Value::Smi(3000), Value::Smi(2)],
            )
        })
        .unwrap();

    assert_eq!(result, 9000);
}

#[test]
fn test_constructor_overloads() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let result = runtime
        .execute_integer(|engine| construct_and_call(engine, "Foo", &[], "getI", &[]))
        .unwrap();

    assert_eq!(result, 0);
}

#[test]
fn test_varargs_collect_trailing_arguments() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let args = [Value::Smi(10), Value::Smi(20), Value::Smi(30), Value::Smi(40)];
    let result = runtime
        .execute_integer(|engine| construct_and_call(engine, "Foo", &[], "doVarargs", &args))
        .unwrap();

    assert_eq!(result, 100);
}

#[test]
fn test_varargs_may_be_empty() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let args = [Value::Smi(10), Value::Smi(20)];
    let result = runtime
        .execute_integer(|engine| construct_and_call(engine, "Foo", &[], "doVarargs", &args))
        .unwrap();

    assert_eq!(result, 30);
}

#[test]
fn test_varargs_need_fixed_arguments() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let err = runtime
        .execute_integer(|engine| construct_and_call(engine, "Foo", &[], "doVarargs", &[Value::Smi(10)]))
        .unwrap_err();

    assert!(matches!(bridge_error(&err), BridgeError::NoMatchingSignature { .. }));
}

#[test]
fn test_no_matching_constructor_message() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let err = runtime
        .execute_void(|engine| engine.new_instance("Foo", &[Value::from("x")]))
        .unwrap_err();

    let BridgeError::Script(script) = &err else {
        panic!("expected script error, got {:?}", err);
    };
    assert_eq!(script.kind, ErrorKind::TypeError);
    assert_eq!(
        bridge_error(&err).to_string(),
        "No signature exists for Foo with parameters [x, ]."
    );
}

#[test]
fn test_no_matching_method_keeps_last_mismatch() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let err = runtime
        .execute_void(|engine| {
            construct_and_call(engine, "Foo", &[], "doInstance", &[Value::from("a"), Value::Smi(2)])
        })
        .unwrap_err();

    match bridge_error(&err) {
        BridgeError::NoMatchingSignature {
            name,
            arguments,
            last_mismatch,
        } => {
            assert_eq!(name, "doInstance");
            assert_eq!(arguments, "a, 2, ");
            assert!(matches!(
                last_mismatch.as_deref(),
                Some(BridgeError::ArgumentIncompatible { .. })
            ));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_bean_property_through_setter_method() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let result = runtime
        .execute_integer(|engine| {
            let foo = engine.new_instance("Foo", &[])?;
            let set = engine.call_method(&foo, "setJ", &[Value::Smi(3344)]);
            let j = set.and_then(|_| engine.get(&foo, "j"));
            engine.release(&foo);
            j
        })
        .unwrap();

    assert_eq!(result, 6688);
}

#[test]
fn test_bean_property_assignment() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let result = runtime
        .execute_integer(|engine| {
            let foo = engine.new_instance("Foo", &[])?;
            let j = engine
                .set(&foo, "j", &Value::Smi(3344))
                .and_then(|_| engine.call_method(&foo, "getJ", &[]));
            engine.release(&foo);
            j
        })
        .unwrap();

    assert_eq!(result, 6688);
}

#[test]
fn test_getter_only_property_ignores_assignment() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let result = runtime
        .execute_integer(|engine| {
            let foo = engine.new_instance("Foo", &[Value::Smi(7)])?;
            let i = engine.set(&foo, "i", &Value::Smi(99)).and_then(|_| engine.get(&foo, "i"));
            engine.release(&foo);
            i
        })
        .unwrap();

    assert_eq!(result, 7);
}

struct Sink {
    last: AtomicI32,
}

impl HostClass for Sink {
    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .constructor(|(): ()| Sink {
                last: AtomicI32::new(0),
            })
            .setter("value", |sink: &Sink, value: i32| sink.last.store(value, Ordering::SeqCst))
            .function("last", |sink: &Sink, (): ()| sink.last.load(Ordering::SeqCst));
    }
}

#[test]
fn test_setter_only_property_reads_undefined() {
    let runtime = runtime();
    runtime.inject_class::<Sink>().unwrap();

    let (read, last) = runtime
        .run(|engine| -> core_types::JsResult<(Value, Value)> {
            let sink = engine.new_instance("Sink", &[])?;
            engine.set(&sink, "value", &Value::Smi(5))?;
            let read = engine.get(&sink, "value")?;
            let last = engine.call_method(&sink, "last", &[])?;
            engine.release(&sink);
            Ok((read, last))
        })
        .unwrap();

    assert_eq!(read, Value::Undefined);
    assert_eq!(last, Value::Smi(5));
}

// ============================================================================
// Member detection
// ============================================================================

struct Quiet;

impl HostClass for Quiet {
    fn class_name() -> String {
        "QuietThing".to_string()
    }

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .disable_auto_detect()
            .constructor(|(): ()| Quiet)
            .method("hidden", |_: &Quiet, (): ()| 1)
            .method("getHidden", |_: &Quiet, (): ()| 1)
            .static_method("hiddenStatic", |(): ()| 1)
            .function("visible", |_: &Quiet, (): ()| 2)
            .getter("value", |_: &Quiet| 3)
            .static_function("create", |(): ()| std::sync::Arc::new(Quiet));
    }
}

struct Partial;

impl HostClass for Partial {
    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .name("Whole")
            .method("getSecret", |_: &Partial, (): ()| "s3cret")
            .method("getName", |_: &Partial, (): ()| "partial")
            .method("get", |_: &Partial, (): ()| 0)
            .method("isReady", |_: &Partial, (): ()| true)
            .method("island", |_: &Partial, (): ()| "no")
            .ignore("getSecret");
    }
}

#[test]
fn test_disabled_auto_detect_keeps_tagged_members() {
    let runtime = runtime();
    let descriptor = runtime.class_descriptor::<Quiet>();

    assert_eq!(descriptor.name(), "QuietThing");
    assert!(!descriptor.auto_detect());
    assert!(descriptor.method("hidden").is_none());
    assert!(descriptor.method("getHidden").is_none());
    assert!(descriptor.method("visible").is_some());
    assert!(descriptor.properties().contains_key("value"));
    assert!(!descriptor.properties().contains_key("hidden"));

    let statics: Vec<&str> = descriptor.statics().map(|(name, _)| name).collect();
    assert_eq!(statics, vec!["create"]);
}

#[test]
fn test_bean_naming_convention() {
    let runtime = runtime();
    let descriptor = runtime.class_descriptor::<Partial>();

    assert_eq!(descriptor.name(), "Whole");
    assert!(descriptor.method("getSecret").is_none());
    assert!(!descriptor.properties().contains_key("secret"));

    let name = &descriptor.properties()["name"];
    assert!(name.getter.is_some());
    assert!(name.setter.is_none());
    assert!(descriptor.properties().contains_key("ready"));
    assert!(descriptor.method("getName").is_some());
    assert!(descriptor.method("get").is_some());
    assert!(descriptor.method("island").is_some());
    assert_eq!(descriptor.properties().len(), 2);
}

#[test]
fn test_class_without_constructor_cannot_be_constructed() {
    let runtime = runtime();
    runtime.inject_class::<Partial>().unwrap();

    let err = runtime
        .execute_void(|engine| engine.new_instance("Whole", &[]))
        .unwrap_err();

    assert_eq!(
        bridge_error(&err).to_string(),
        "No signature exists for Whole with parameters []."
    );
}

// ============================================================================
// Static methods and injection targets
// ============================================================================

#[test]
fn test_static_method_on_constructor() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();

    let result = runtime
        .execute_integer(|engine| {
            let foo = engine.get_global("Foo")?;
            let sum = engine.call_method(&foo, "add", &[Value::Smi(1), Value::Smi(2)]);
            engine.release(&foo);
            sum
        })
        .unwrap();

    assert_eq!(result, 3);
}

#[test]
fn test_static_function_returns_bridged_instance() {
    let runtime = runtime();
    runtime.inject_class::<Quiet>().unwrap();

    let object = runtime
        .execute_object(|engine| {
            let class = engine.get_global("QuietThing")?;
            let created = engine.call_method(&class, "create", &[]);
            engine.release(&class);
            created
        })
        .unwrap();

    assert!(object.downcast::<Quiet>().is_some());
}

#[test]
fn test_inject_class_is_idempotent() {
    let runtime = runtime();
    runtime.inject_class::<Foo>().unwrap();
    runtime.inject_class::<Foo>().unwrap();
    runtime.inject_class_as::<Foo>("Bar").unwrap();

    let result = runtime
        .execute_integer(|engine| construct_and_call(engine, "Bar", &[Value::Smi(1)], "getI", &[]))
        .unwrap();

    assert_eq!(result, 1);
}

#[test]
fn test_inject_class_into_namespace() {
    let runtime = runtime();

    let result = runtime
        .run(|engine| -> Result<Value, host_bridge::BridgeError> {
            let namespace = engine.new_object();
            engine.set_global("lib", &namespace)?;
            runtime.inject_class_into::<Foo>(&namespace)?;
            let constructor = engine.get(&namespace, "Foo")?;
            let foo = engine.construct(&constructor, &[Value::Smi(5)])?;
            let i = engine.get(&foo, "i")?;
            for value in [&namespace, &constructor, &foo] {
                engine.release(value);
            }
            Ok(i)
        })
        .unwrap();

    assert_eq!(result, Value::Smi(5));
    let global_foo = runtime.run(|engine| engine.get_global("Foo")).unwrap();
    assert_eq!(global_foo, Value::Undefined);
}

// ============================================================================
// Host failures
// ============================================================================

#[derive(Debug)]
struct Positive(i32);

impl HostClass for Positive {
    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .try_constructor(|(n,): (i32,)| {
                if n > 0 {
                    Ok(Positive(n))
                } else {
                    Err(format!("{} is not positive", n))
                }
            })
            .function("value", |p: &Positive, (): ()| p.0);
    }
}

#[test]
fn test_failing_constructor_reports_host_error() {
    let runtime = runtime();
    runtime.inject_class::<Positive>().unwrap();

    let err = runtime
        .execute_void(|engine| engine.new_instance("Positive", &[Value::Smi(-1)]))
        .unwrap_err();

    match bridge_error(&err) {
        BridgeError::HostMethod { method, source } => {
            assert_eq!(method, "Positive");
            assert_eq!(source.to_string(), "-1 is not positive");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let value = runtime
        .execute_integer(|engine| construct_and_call(engine, "Positive", &[Value::Smi(4)], "value", &[]))
        .unwrap();
    assert_eq!(value, 4);
}
