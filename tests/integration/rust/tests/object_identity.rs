//! Object Identity Integration Tests
//!
//! Host objects crossing into script and back keep their identity, and
//! objects script no longer references age out of the registry.

use core_types::Value;
use host_bridge::{BridgeError, HostValue, LifetimeError};
use integration_tests::{call_global, runtime, Foo};
use std::sync::Arc;

fn delete_global(runtime: &host_bridge::Runtime, name: &str) {
    runtime
        .run(|engine| {
            let global = engine.global();
            let deleted = engine.delete(&global, name);
            engine.release(&global);
            deleted
        })
        .expect("delete global");
}

/// Test: an injected object comes back as the same allocation
#[test]
fn test_round_trip_identity() {
    let runtime = runtime();
    let foo = Arc::new(Foo::new(5));
    let id = runtime
        .inject_object(Some("foo"), foo.clone())
        .expect("inject failed");

    let back = runtime
        .execute_object(|engine| engine.get_global("foo"))
        .expect("Execution failed");

    assert!(Arc::ptr_eq(&back.downcast::<Foo>().expect("a Foo"), &foo));
    assert!(Arc::ptr_eq(&runtime.resolve_as::<Foo>(&id).expect("resolve"), &foo));
}

/// Test: script passes an injected object back into a host method
#[test]
fn test_script_passes_object_back() {
    let runtime = runtime();
    runtime
        .inject_object(Some("first"), Arc::new(Foo::new(1)))
        .expect("inject failed");
    runtime
        .inject_object(Some("second"), Arc::new(Foo::new(2)))
        .expect("inject failed");

    let (same, other) = runtime
        .run(|engine| -> core_types::JsResult<(Value, Value)> {
            let first = engine.get_global("first")?;
            let second = engine.get_global("second")?;
            let same = call_global(engine, "first", "same", std::slice::from_ref(&first));
            let other = call_global(engine, "first", "same", std::slice::from_ref(&second));
            engine.release(&first);
            engine.release(&second);
            Ok((same?, other?))
        })
        .expect("Execution failed");

    assert_eq!(same, Value::Boolean(true));
    assert_eq!(other, Value::Boolean(false));
}

/// Test: passing a bridged host object to script reuses its script object
#[test]
fn test_known_object_keeps_script_object() {
    let runtime = runtime();
    let foo = Arc::new(Foo::new(3));
    runtime.inject_object(Some("foo"), foo.clone()).expect("inject failed");
    runtime
        .run(|engine| {
            let global = engine.global();
            let registered = engine.register_function(&global, "isFoo", |engine, _, args| {
                let bound = engine.get_global("foo")?;
                let same = engine.strict_equals(&bound, &args[0]);
                engine.release(&bound);
                Ok(Value::Boolean(same))
            });
            engine.release(&global);
            registered
        })
        .expect("register failed");

    let same = runtime
        .invoke_function("isFoo", (foo,))
        .expect("Execution failed");
    let fresh = runtime
        .invoke_function("isFoo", (Arc::new(Foo::new(3)),))
        .expect("Execution failed");

    assert_eq!(same, HostValue::Bool(true));
    assert_eq!(fresh, HostValue::Bool(false));
}

/// Test: dropping the last script reference ages the handle out
#[test]
fn test_lifetime_sweep() {
    let runtime = runtime();
    let id = runtime
        .inject_object(Some("foo"), Arc::new(Foo::new(1)))
        .expect("inject failed");
    assert_eq!(runtime.sweep(), 0);

    delete_global(&runtime, "foo");

    assert_eq!(runtime.sweep(), 1);
    match runtime.resolve(&id) {
        Err(BridgeError::InvalidHandle { state, .. }) => assert_eq!(state, LifetimeError::Collected),
        Err(other) => panic!("Expected an invalid handle, got {:?}", other),
        Ok(_) => panic!("Expected the handle to be aged out"),
    }
}

/// Test: a stale handle in an argument is rejected as a translation failure
#[test]
fn test_stale_handle_argument() {
    let runtime = runtime();
    let stale = runtime
        .inject_object(Some("gone"), Arc::new(Foo::new(1)))
        .expect("inject failed");
    runtime
        .inject_object(Some("kept"), Arc::new(Foo::new(2)))
        .expect("inject failed");
    delete_global(&runtime, "gone");
    runtime.sweep();

    let err = runtime
        .execute_void(|engine| {
            let forged = engine.new_object();
            engine.set(
                &forged,
                &runtime.config().object_handle_property,
                &Value::from(stale.as_str()),
            )?;
            let result = call_global(engine, "kept", "same", std::slice::from_ref(&forged));
            engine.release(&forged);
            result
        })
        .unwrap_err();

    match err.as_bridge() {
        Some(BridgeError::NoMatchingSignature { last_mismatch, .. }) => {
            assert!(matches!(
                last_mismatch.as_deref(),
                Some(BridgeError::InvalidHandle { .. })
            ));
        }
        other => panic!("Expected no matching signature, got {:?}", other),
    }
}

/// Test: an identifier from another runtime never existed here
#[test]
fn test_foreign_identifier() {
    let first = runtime();
    let second = runtime();
    let id = first
        .inject_object(None, Arc::new(Foo::new(1)))
        .expect("inject failed");

    assert!(matches!(
        second.resolve(&id),
        Err(BridgeError::InvalidHandle {
            state: LifetimeError::NeverExisted,
            ..
        })
    ));
}
