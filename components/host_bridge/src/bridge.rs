//! Per-runtime bridge state.
//!
//! One [`Bridge`] exists per [`Runtime`](crate::Runtime). Everything that
//! outlives a single call lives here: the engine, the identity registry,
//! the tracked callback handles, the release queue and the GC executor.
//! Host-side values that must reach back into the engine (callbacks,
//! script handles, proxy functions) hold a `Weak<Bridge>`.
//!
//! Lock order: engine access first, then at most one of the inner mutexes.
//! Inner mutexes are never held across engine calls or user code.

use crate::callback::GcExecutor;
use crate::class::ClassDescriptor;
use crate::config::RuntimeConfig;
use crate::error::LifetimeError;
use crate::interceptor::ErasedInterceptor;
use crate::registry::Registry;
use crate::types::{ClassKey, HostObject};
use core_types::{Handle, Value};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard, RwLock};
use script_engine::{Engine, WeakRef};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use ulid::Ulid;

pub(crate) struct Bridge {
    engine: Engine,
    config: RuntimeConfig,
    registry: Mutex<Registry>,
    resources: Mutex<HashMap<Handle, Value>>,
    gc_executor: RwLock<Option<Arc<dyn GcExecutor>>>,
    release_tx: Sender<Value>,
    release_rx: Receiver<Value>,
    injected: Mutex<HashSet<(ClassKey, WeakRef, String)>>,
}

impl Bridge {
    pub(crate) fn new(config: RuntimeConfig) -> Arc<Self> {
        let (release_tx, release_rx) = channel::unbounded();
        let registry = Registry::new(&config.object_handle_prefix, &config.context_handle_prefix);
        Arc::new(Bridge {
            engine: Engine::new(),
            config,
            registry: Mutex::new(registry),
            resources: Mutex::new(HashMap::new()),
            gc_executor: RwLock::new(None),
            release_tx,
            release_rx,
            injected: Mutex::new(HashSet::new()),
        })
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock()
    }

    pub(crate) fn resolve(&self, identifier: &str) -> Result<HostObject, LifetimeError> {
        self.registry().resolve(identifier)
    }

    // ===== Classes =====

    /// The descriptor of a class, built on first use.
    pub(crate) fn descriptor_for(&self, key: ClassKey) -> Arc<ClassDescriptor> {
        self.register_class(key, None)
    }

    /// Builds and caches the descriptor of a class.
    ///
    /// The builder runs without the registry lock. When two threads race,
    /// or the class was already registered, the first cached descriptor
    /// wins and a different `interceptor` is ignored with a warning.
    pub(crate) fn register_class(
        &self,
        key: ClassKey,
        interceptor: Option<Arc<dyn ErasedInterceptor>>,
    ) -> Arc<ClassDescriptor> {
        let requested = interceptor.clone();
        let known = self.registry().descriptor(&key);
        let registered = match known {
            Some(known) => known,
            None => {
                let built = key.build().with_interceptor(interceptor);
                tracing::debug!(
                    class = built.name(),
                    methods = built.methods().count(),
                    properties = built.properties().len(),
                    interceptor = built.has_interceptor(),
                    "class registered"
                );
                self.registry().insert_descriptor(built)
            }
        };
        if let Some(requested) = requested {
            let kept = registered
                .interceptor()
                .is_some_and(|kept| Arc::ptr_eq(kept, &requested));
            if !kept {
                tracing::warn!(
                    class = registered.name(),
                    has_interceptor = registered.has_interceptor(),
                    "class already registered, interceptor ignored"
                );
            }
        }
        registered
    }

    /// Records a constructor registration. Returns false if the class was
    /// already registered on `root` under `name`.
    pub(crate) fn mark_injected(&self, key: ClassKey, root: WeakRef, name: &str) -> bool {
        self.injected.lock().insert((key, root, name.to_string()))
    }

    /// A fresh global name for an anonymous injected object.
    pub(crate) fn temp_name(&self) -> String {
        format!("{}{}", self.config.temp_name_prefix, Ulid::new())
    }

    // ===== Resources =====

    pub(crate) fn track(&self, values: &[&Value]) {
        let mut resources = self.resources.lock();
        for value in values {
            if let Some(handle) = value.handle() {
                resources.insert(handle, (*value).clone());
            }
        }
    }

    /// Stops tracking `values`, returning the ones that were still tracked.
    pub(crate) fn untrack(&self, values: &[&Value]) -> Vec<Value> {
        let mut resources = self.resources.lock();
        values
            .iter()
            .filter_map(|value| value.handle())
            .filter_map(|handle| resources.remove(&handle))
            .collect()
    }

    pub(crate) fn tracked(&self) -> usize {
        self.resources.lock().len()
    }

    /// Releases every tracked handle and returns how many were released.
    pub(crate) fn release_tracked(&self) -> usize {
        let _access = self.engine.lock();
        self.drain_release_queue();
        let owned: Vec<Value> = self.resources.lock().drain().map(|(_, value)| value).collect();
        owned.iter().for_each(|value| self.engine.release(value));
        owned.len()
    }

    // ===== Release queue =====

    /// Queues handles dropped on the host side for release.
    ///
    /// Safe to call from any thread. When a GC executor is set it is handed
    /// a job that drains the queue.
    pub(crate) fn defer_release(self: &Arc<Self>, values: Vec<Value>) {
        for value in values.into_iter().filter(|value| value.handle().is_some()) {
            // The receiver lives in `self`, so the channel is never disconnected.
            let _ = self.release_tx.send(value);
        }
        let executor = self.gc_executor.read().clone();
        if let Some(executor) = executor {
            let bridge: Weak<Bridge> = Arc::downgrade(self);
            executor.execute(Box::new(move || {
                if let Some(bridge) = bridge.upgrade() {
                    bridge.drain_release_queue();
                }
            }));
        }
    }

    /// Releases every queued handle and returns how many were queued.
    pub(crate) fn drain_release_queue(&self) -> usize {
        let _access = self.engine.lock();
        let mut drained = 0;
        while let Ok(value) = self.release_rx.try_recv() {
            if let Some(handle) = value.handle() {
                self.resources.lock().remove(&handle);
            }
            self.engine.release(&value);
            drained += 1;
        }
        if drained > 0 {
            tracing::trace!(drained, "release queue drained");
        }
        drained
    }

    // ===== GC executor =====

    pub(crate) fn set_gc_executor(&self, executor: Option<Arc<dyn GcExecutor>>) {
        *self.gc_executor.write() = executor;
    }

    pub(crate) fn has_gc_executor(&self) -> bool {
        self.gc_executor.read().is_some()
    }

    // ===== Collection =====

    /// Collects unreachable script objects, then drops registry entries
    /// whose host objects went with them.
    ///
    /// Returns the number of registry entries removed.
    pub(crate) fn sweep(&self) -> usize {
        let _access = self.engine.lock();
        self.drain_release_queue();
        let freed = self.engine.collect_garbage();
        let (removed, contexts) = self.registry().sweep();
        drop(contexts);
        if removed > 0 && self.config.collect_after_sweep {
            self.engine.collect_garbage();
        }
        tracing::debug!(freed, removed, "registry swept");
        removed
    }
}
