//! Unit tests for class interceptors and interceptor contexts

use crate::test_utils::runtime;
use core_types::{JsResult, Value};
use host_bridge::{
    ClassBuilder, ClassInterceptor, HostClass, HostValue, InterceptorContext, Runtime,
};
use script_engine::Engine;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

struct Point {
    x: AtomicI32,
}

impl Point {
    fn x(&self) -> i32 {
        self.x.load(Ordering::SeqCst)
    }
}

impl HostClass for Point {
    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .constructor(|(x,): (i32,)| Point { x: AtomicI32::new(x) })
            .method("getX", |p: &Point, (): ()| p.x())
            .static_method("origin", |(): ()| Arc::new(Point { x: AtomicI32::new(0) }));
    }
}

/// Mirrors `x` through the context; the script side keeps it in `this.x`.
#[derive(Default)]
struct PointInterceptor {
    injected: Arc<AtomicUsize>,
    extracted: Arc<AtomicUsize>,
}

fn copy_property(engine: &Engine, from: &Value, to: &Value, key: &str) -> JsResult<()> {
    let value = engine.call_method(from, "get", &[Value::from(key)])?;
    let stored = engine.set(to, key, &value);
    engine.release(&value);
    stored
}

impl ClassInterceptor<Point> for PointInterceptor {
    fn script_body(&self, engine: &Engine, receiver: &Value) -> JsResult<()> {
        engine.register_function(receiver, "onHostInject", |engine, this, args| {
            copy_property(engine, &args[0], this, "x")?;
            Ok(Value::Undefined)
        })?;
        engine.register_function(receiver, "onHostExtract", |engine, this, args| {
            let x = engine.get(this, "x")?;
            let stored = engine.call_method(&args[0], "set", &[Value::from("x"), x.clone()]);
            engine.release(&x);
            stored
        })
    }

    fn on_inject(&self, context: &InterceptorContext, point: &Point) {
        self.injected.fetch_add(1, Ordering::SeqCst);
        context.set("x", point.x());
    }

    fn on_extract(&self, context: &InterceptorContext, point: &Point) {
        self.extracted.fetch_add(1, Ordering::SeqCst);
        if let Ok(Some(x)) = context.get_as::<i32>("x") {
            point.x.store(x, Ordering::SeqCst);
        }
    }
}

struct Inspector;

impl HostClass for Inspector {
    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .constructor(|(): ()| Inspector)
            .function("xOf", |_: &Inspector, (point,): (Arc<Point>,)| point.x())
            .function("echo", |_: &Inspector, (point,): (Arc<Point>,)| point);
    }
}

fn intercepted_runtime() -> (Runtime, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let runtime = runtime();
    let interceptor = PointInterceptor::default();
    let injected = interceptor.injected.clone();
    let extracted = interceptor.extracted.clone();
    runtime.inject_class_with::<Point, _>(interceptor).unwrap();
    runtime.inject_class::<Inspector>().unwrap();
    (runtime, injected, extracted)
}

#[test]
fn test_inject_copies_state_to_script() {
    let (runtime, injected, _) = intercepted_runtime();
    let point = Arc::new(Point { x: AtomicI32::new(12) });
    runtime.inject_object(Some("point"), point).unwrap();

    let x = runtime
        .execute_integer(|engine| {
            let point = engine.get_global("point")?;
            let x = engine.get(&point, "x");
            engine.release(&point);
            x
        })
        .unwrap();

    assert_eq!(x, 12);
    assert_eq!(injected.load(Ordering::SeqCst), 1);
}

#[test]
fn test_extract_copies_state_to_host() {
    let (runtime, _, extracted) = intercepted_runtime();
    let point = Arc::new(Point { x: AtomicI32::new(1) });
    runtime.inject_object(Some("point"), point.clone()).unwrap();

    let seen = runtime
        .execute_integer(|engine| {
            let target = engine.get_global("point")?;
            engine.set(&target, "x", &Value::Smi(99))?;
            let inspector = engine.new_instance("Inspector", &[])?;
            let seen = engine.call_method(&inspector, "xOf", std::slice::from_ref(&target));
            engine.release(&inspector);
            engine.release(&target);
            seen
        })
        .unwrap();

    assert_eq!(seen, 99);
    assert_eq!(point.x(), 99);
    assert_eq!(extracted.load(Ordering::SeqCst), 1);
}

#[test]
fn test_returning_known_object_reinjects() {
    let (runtime, injected, _) = intercepted_runtime();
    let point = Arc::new(Point { x: AtomicI32::new(5) });
    runtime.inject_object(Some("point"), point.clone()).unwrap();

    let same = runtime
        .execute_boolean(|engine| {
            let target = engine.get_global("point")?;
            let inspector = engine.new_instance("Inspector", &[])?;
            let echoed = engine.call_method(&inspector, "echo", std::slice::from_ref(&target))?;
            let same = engine.strict_equals(&target, &echoed);
            for value in [&target, &inspector, &echoed] {
                engine.release(value);
            }
            Ok(Value::Boolean(same))
        })
        .unwrap();

    assert!(same);
    assert_eq!(injected.load(Ordering::SeqCst), 2);
}

/// Log output collected by a test subscriber.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_second_interceptor_is_ignored_with_warning() {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let runtime = Runtime::new();
    let first = PointInterceptor::default();
    let first_injected = first.injected.clone();
    let second = PointInterceptor::default();
    let second_injected = second.injected.clone();
    tracing::subscriber::with_default(subscriber, || {
        runtime.inject_class_with::<Point, _>(first).unwrap();
        runtime.inject_class_with::<Point, _>(second).unwrap();
    });
    runtime
        .inject_object(Some("p"), Arc::new(Point { x: AtomicI32::new(4) }))
        .unwrap();

    assert_eq!(first_injected.load(Ordering::SeqCst), 1);
    assert_eq!(second_injected.load(Ordering::SeqCst), 0);
    assert_eq!(log.text().matches("interceptor ignored").count(), 1);
}

#[test]
fn test_intercepted_class_exposes_no_members() {
    let (runtime, _, _) = intercepted_runtime();

    let (method, origin) = runtime
        .run(|engine| -> JsResult<(Value, Value)> {
            let point = engine.new_instance("Point", &[Value::Smi(3)])?;
            let method = engine.get(&point, "getX")?;
            let class = engine.get_global("Point")?;
            let origin = engine.get(&class, "origin")?;
            engine.release(&class);
            engine.release(&point);
            Ok((method, origin))
        })
        .unwrap();

    assert_eq!(method, Value::Undefined);
    assert_eq!(origin, Value::Undefined);
}

#[test]
fn test_construction_runs_script_body_and_hooks() {
    let (runtime, injected, _) = intercepted_runtime();

    let x = runtime
        .execute_integer(|engine| {
            let point = engine.new_instance("Point", &[Value::Smi(8)])?;
            let x = engine.get(&point, "x");
            engine.release(&point);
            x
        })
        .unwrap();

    assert_eq!(x, 8);
    assert_eq!(injected.load(Ordering::SeqCst), 1);
}

#[test]
fn test_object_without_hooks_is_left_alone() {
    let runtime = runtime();
    let interceptor = PointInterceptor::default();
    let injected = interceptor.injected.clone();
    runtime.inject_class_with::<Point, _>(NoScript(interceptor)).unwrap();

    runtime.inject_object(Some("point"), Arc::new(Point { x: AtomicI32::new(4) })).unwrap();

    assert_eq!(injected.load(Ordering::SeqCst), 0);
}

/// Wraps an interceptor without defining script hooks.
struct NoScript(PointInterceptor);

impl ClassInterceptor<Point> for NoScript {
    fn on_inject(&self, context: &InterceptorContext, point: &Point) {
        self.0.on_inject(context, point)
    }

    fn on_extract(&self, context: &InterceptorContext, point: &Point) {
        self.0.on_extract(context, point)
    }
}

// ============================================================================
// Injection override
// ============================================================================

struct Settings {
    name: String,
}

impl HostClass for Settings {
    fn describe(class: &mut ClassBuilder<Self>) {
        class.function("name", |s: &Settings, (): ()| s.name.clone());
    }
}

struct SettingsAsString;

impl ClassInterceptor<Settings> for SettingsAsString {
    fn on_inject(&self, _context: &InterceptorContext, _settings: &Settings) {}

    fn on_extract(&self, _context: &InterceptorContext, _settings: &Settings) {}

    fn injection_override(&self, settings: &Settings) -> Option<HostValue> {
        Some(HostValue::String(settings.name.clone()))
    }
}

#[test]
fn test_injection_override_binds_replacement() {
    let runtime = runtime();
    runtime.inject_class_with::<Settings, _>(SettingsAsString).unwrap();

    let settings = Arc::new(Settings {
        name: "production".to_string(),
    });
    let id = runtime.inject_object(Some("settings"), settings).unwrap();

    assert_eq!(id, "settings");
    assert_eq!(runtime.registered_objects(), 0);
    let bound = runtime
        .execute_string(|engine| engine.get_global("settings"))
        .unwrap();
    assert_eq!(bound, "production");
}

#[test]
fn test_injection_override_with_generated_name() {
    let runtime = runtime();
    runtime.inject_class_with::<Settings, _>(SettingsAsString).unwrap();

    let name = runtime
        .inject_object(None, Arc::new(Settings { name: "x".to_string() }))
        .unwrap();

    assert!(name.starts_with("TEMP"));
    let bound = runtime.execute_string(|engine| engine.get_global(&name)).unwrap();
    assert_eq!(bound, "x");
}

// ============================================================================
// Context
// ============================================================================

#[test]
fn test_context_store() {
    let context = InterceptorContext::default();
    context.set("b", 2);
    context.set("a", "one");

    assert!(context.has("a"));
    assert_eq!(context.keys(), vec!["b", "a"]);
    assert_eq!(context.get_as::<i32>("b").unwrap(), Some(2));
    assert_eq!(context.get("a"), Some(HostValue::String("one".to_string())));
    assert!(context.get_as::<i32>("a").is_err());
    assert_eq!(context.get_as::<i32>("missing").unwrap(), None);

    assert_eq!(context.remove("b"), Some(HostValue::Int(2)));
    assert!(!context.has("b"));
}
