//! Integration test suite for the host bridge
//!
//! Fixtures shared by the scenario tests: host classes the way embedding
//! applications write them, and small helpers for driving the engine.

use core_types::{JsResult, Value};
use host_bridge::{
    CallBack, ClassBuilder, ClassInterceptor, HostClass, InterceptorContext, Listener, Runtime,
    VarArgs,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use script_engine::Engine;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

/// Re-export components for test convenience
pub mod components {
    pub use core_types;
    pub use host_bridge;
    pub use script_engine;
}

static INIT: Once = Once::new();

/// A runtime with a test subscriber honoring `RUST_LOG`.
pub fn runtime() -> Runtime {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
    Runtime::new()
}

/// Calls `method` on the global `name`.
pub fn call_global(engine: &Engine, name: &str, method: &str, args: &[Value]) -> JsResult<Value> {
    let target = engine.get_global(name)?;
    let result = engine.call_method(&target, method, args);
    engine.release(&target);
    result
}

/// Releases every value in `values`.
pub fn release_all(engine: &Engine, values: &[Value]) {
    values.iter().for_each(|value| engine.release(value));
}

// ============================================================================
// Foo
// ============================================================================

/// Integer holder exercising overloads, varargs, beans and containers.
#[derive(Debug, Default)]
pub struct Foo {
    i: AtomicI32,
    j: AtomicI32,
}

impl Foo {
    /// Creates a holder for `i`.
    pub fn new(i: i32) -> Self {
        Foo {
            i: AtomicI32::new(i),
            j: AtomicI32::new(0),
        }
    }

    /// Current `i`.
    pub fn i(&self) -> i32 {
        self.i.load(Ordering::SeqCst)
    }

    /// Current `j`.
    pub fn j(&self) -> i32 {
        self.j.load(Ordering::SeqCst)
    }
}

impl HostClass for Foo {
    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .constructor(|(i,): (i32,)| Foo::new(i))
            .constructor(|(): ()| Foo::default())
            .method("doInstance", |foo: &Foo, (n,): (i32,)| foo.i() + n)
            .method("doInstance", |foo: &Foo, (a, b): (i32, i32)| foo.i() + a * b)
            .method("doVarargs", |_: &Foo, (a, b, rest): (i32, i32, VarArgs<i32>)| {
                a + b + rest.iter().sum::<i32>()
            })
            .method("getJ", |foo: &Foo, (): ()| foo.j())
            .method("setJ", |foo: &Foo, (j,): (i32,)| foo.j.store(j * 2, Ordering::SeqCst))
            .method("sum", |_: &Foo, (items,): (Box<[i32]>,)| items.iter().sum::<i32>())
            .method("join", |_: &Foo, (parts,): (Vec<String>,)| parts.join("-"))
            .method("total", |_: &Foo, (prices,): (IndexMap<String, f64>,)| {
                prices.values().sum::<f64>()
            })
            .method("describe", |_: &Foo, (label,): (Option<String>,)| {
                label.unwrap_or_else(|| "unnamed".to_string())
            })
            .method("same", |foo: &Foo, (other,): (Arc<Foo>,)| std::ptr::eq(foo, other.as_ref()))
            .method("twin", |foo: &Foo, (): ()| Arc::new(Foo::new(foo.i())))
            .static_method("add", |(a, b): (i32, i32)| a + b);
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Holds persistent listeners and single-shot requests registered by script.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener<(String,), i32>>>,
    requests: Mutex<Vec<CallBack<(i32,), i32>>>,
}

impl EventBus {
    /// Delivers `event` to every listener and sums their replies.
    pub fn emit(&self, event: &str) -> host_bridge::BridgeResult<i32> {
        let listeners = self.listeners.lock().clone();
        listeners
            .iter()
            .map(|listener| listener.call((event.to_string(),)))
            .sum()
    }

    /// Answers every pending request with `value` and returns the replies.
    pub fn answer(&self, value: i32) -> Vec<host_bridge::BridgeResult<i32>> {
        let requests = self.requests.lock().clone();
        requests.iter().map(|request| request.call((value,))).collect()
    }

    /// Drops every listener and request.
    pub fn clear(&self) {
        self.listeners.lock().clear();
        self.requests.lock().clear();
    }

    /// The listener registered at `index`.
    pub fn listener(&self, index: usize) -> Option<Listener<(String,), i32>> {
        self.listeners.lock().get(index).cloned()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl HostClass for EventBus {
    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .constructor(|(): ()| EventBus::default())
            .function("on", |bus: &EventBus, (listener,): (Listener<(String,), i32>,)| {
                bus.listeners.lock().push(listener)
            })
            .function("request", |bus: &EventBus, (callback,): (CallBack<(i32,), i32>,)| {
                bus.requests.lock().push(callback)
            })
            .function("emit", |bus: &EventBus, (event,): (String,)| bus.emit(&event));
    }
}

// ============================================================================
// Document
// ============================================================================

/// A titled document whose script view mirrors the title as a data property.
#[derive(Debug)]
pub struct Document {
    title: Mutex<String>,
}

impl Document {
    /// Creates a document.
    pub fn new(title: &str) -> Self {
        Document {
            title: Mutex::new(title.to_string()),
        }
    }

    /// Current title.
    pub fn title(&self) -> String {
        self.title.lock().clone()
    }

    /// Replaces the title.
    pub fn set_title(&self, title: &str) {
        *self.title.lock() = title.to_string();
    }
}

impl HostClass for Document {
    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .constructor(|(title,): (String,)| Document::new(&title))
            .getter("title", |doc: &Document| doc.title());
    }
}

/// Copies `title` between the document and its script object.
pub struct TitleInterceptor;

impl ClassInterceptor<Document> for TitleInterceptor {
    fn script_body(&self, engine: &Engine, receiver: &Value) -> JsResult<()> {
        engine.register_function(receiver, "onHostInject", |engine, this, args| {
            let title = engine.call_method(&args[0], "get", &[Value::from("title")])?;
            let stored = engine.set(this, "title", &title);
            engine.release(&title);
            stored.map(|_| Value::Undefined)
        })?;
        engine.register_function(receiver, "onHostExtract", |engine, this, args| {
            let title = engine.get(this, "title")?;
            let stored = engine.call_method(&args[0], "set", &[Value::from("title"), title.clone()]);
            engine.release(&title);
            stored
        })
    }

    fn on_inject(&self, context: &InterceptorContext, document: &Document) {
        context.set("title", document.title());
    }

    fn on_extract(&self, context: &InterceptorContext, document: &Document) {
        if let Ok(Some(title)) = context.get_as::<String>("title") {
            document.set_title(&title);
        }
    }
}

/// Keeps documents handed over by script.
#[derive(Default)]
pub struct Library {
    documents: Mutex<Vec<Arc<Document>>>,
}

impl Library {
    /// Titles of the stored documents.
    pub fn titles(&self) -> Vec<String> {
        self.documents.lock().iter().map(|doc| doc.title()).collect()
    }
}

impl HostClass for Library {
    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .constructor(|(): ()| Library::default())
            .function("add", |library: &Library, (doc,): (Arc<Document>,)| {
                library.documents.lock().push(doc)
            })
            .function("get", |library: &Library, (index,): (i32,)| {
                usize::try_from(index)
                    .ok()
                    .and_then(|index| library.documents.lock().get(index).cloned())
            })
            .function("titles", |library: &Library, (): ()| library.titles());
    }
}
