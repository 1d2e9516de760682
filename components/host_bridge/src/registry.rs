//! Identity registry.
//!
//! Maps object handle identifiers to weak host references and weak script
//! object references, host object addresses back to identifiers, classes to
//! their descriptors, and interceptor context ids to contexts.
//!
//! Identifiers have the form `<prefix><serial>_<slot>_<generation>`. The
//! serial is unique per registry within the process, and a slot's generation
//! is bumped whenever its entry is swept, so an identifier never resolves to
//! a different object than the one it was issued for.

use crate::class::ClassDescriptor;
use crate::error::LifetimeError;
use crate::interceptor::InterceptorContext;
use crate::types::{ClassKey, HostObject, WeakHostObject};
use script_engine::WeakRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use ulid::Ulid;

static NEXT_SERIAL: AtomicU32 = AtomicU32::new(1);

struct Entry {
    host: WeakHostObject,
    script: WeakRef,
    context: Option<String>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Identifier parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ObjectId {
    serial: u32,
    index: u32,
    generation: u32,
}

/// Per-runtime identity tables.
pub(crate) struct Registry {
    serial: u32,
    prefix: String,
    context_prefix: String,
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_address: HashMap<usize, (WeakHostObject, String)>,
    contexts: HashMap<String, Arc<InterceptorContext>>,
    classes: HashMap<ClassKey, Arc<ClassDescriptor>>,
}

impl Registry {
    pub(crate) fn new(prefix: &str, context_prefix: &str) -> Self {
        Registry {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            prefix: prefix.to_string(),
            context_prefix: context_prefix.to_string(),
            slots: Vec::new(),
            free: Vec::new(),
            by_address: HashMap::new(),
            contexts: HashMap::new(),
            classes: HashMap::new(),
        }
    }

    // ===== Classes =====

    pub(crate) fn descriptor(&self, key: &ClassKey) -> Option<Arc<ClassDescriptor>> {
        self.classes.get(key).cloned()
    }

    /// Caches a descriptor. The first descriptor cached for a class wins.
    pub(crate) fn insert_descriptor(&mut self, descriptor: ClassDescriptor) -> Arc<ClassDescriptor> {
        self.classes
            .entry(descriptor.key())
            .or_insert_with(|| Arc::new(descriptor))
            .clone()
    }

    // ===== Objects =====

    fn format(&self, id: ObjectId) -> String {
        format!("{}{}_{}_{}", self.prefix, id.serial, id.index, id.generation)
    }

    fn parse(&self, identifier: &str) -> Option<ObjectId> {
        let mut parts = identifier.strip_prefix(&self.prefix)?.split('_');
        let serial = parts.next()?.parse().ok()?;
        let index = parts.next()?.parse().ok()?;
        let generation = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(ObjectId {
            serial,
            index,
            generation,
        })
    }

    /// Records `host` as bridged to `script` and returns the new identifier.
    ///
    /// The address mapping is overwritten; identifiers issued earlier for the
    /// same object stay valid.
    pub(crate) fn attach(&mut self, host: &HostObject, script: WeakRef) -> String {
        let entry = Entry {
            host: host.downgrade(),
            script,
            context: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };
        let identifier = self.format(ObjectId {
            serial: self.serial,
            index,
            generation: self.slots[index as usize].generation,
        });
        self.by_address
            .insert(host.addr(), (host.downgrade(), identifier.clone()));
        identifier
    }

    fn entry(&self, identifier: &str) -> Result<&Entry, LifetimeError> {
        let id = self.parse(identifier).ok_or(LifetimeError::NeverExisted)?;
        if id.serial != self.serial {
            return Err(LifetimeError::NeverExisted);
        }
        let slot = self
            .slots
            .get(id.index as usize)
            .ok_or(LifetimeError::NeverExisted)?;
        if id.generation > slot.generation {
            return Err(LifetimeError::NeverExisted);
        }
        if id.generation < slot.generation {
            return Err(LifetimeError::Collected);
        }
        slot.entry.as_ref().ok_or(LifetimeError::Collected)
    }

    /// Looks up the host object an identifier was issued for.
    pub(crate) fn resolve(&self, identifier: &str) -> Result<HostObject, LifetimeError> {
        self.entry(identifier)?
            .host
            .upgrade()
            .ok_or(LifetimeError::Collected)
    }

    /// The current identifier of a host object and its script object.
    pub(crate) fn identifier_of(&mut self, host: &HostObject) -> Option<(String, WeakRef)> {
        let (weak, identifier) = self.by_address.get(&host.addr())?.clone();
        let same = weak.upgrade().map(|known| known.ptr_eq(host)).unwrap_or(false);
        if !same {
            self.by_address.remove(&host.addr());
            return None;
        }
        let script = self.entry(&identifier).ok()?.script;
        Some((identifier, script))
    }

    /// Weak reference to the script object an identifier is bound to.
    pub(crate) fn script_object(&self, identifier: &str) -> Option<WeakRef> {
        self.entry(identifier).ok().map(|entry| entry.script)
    }

    // ===== Interceptor contexts =====

    /// Creates the interceptor context of `owner` and returns its id.
    pub(crate) fn create_context(&mut self, owner: &str) -> Option<(String, Arc<InterceptorContext>)> {
        let id = self.parse(owner)?;
        if id.serial != self.serial {
            return None;
        }
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.as_mut()?;
        let context_id = format!("{}{}", self.context_prefix, Ulid::new());
        let context = Arc::new(InterceptorContext::new());
        if let Some(previous) = entry.context.replace(context_id.clone()) {
            self.contexts.remove(&previous);
        }
        self.contexts.insert(context_id.clone(), context.clone());
        Some((context_id, context))
    }

    pub(crate) fn context(&self, id: &str) -> Option<Arc<InterceptorContext>> {
        self.contexts.get(id).cloned()
    }

    // ===== Maintenance =====

    /// Removes entries whose host object has been dropped.
    ///
    /// Returns the number removed and their contexts, which the caller drops
    /// once the registry lock is released.
    pub(crate) fn sweep(&mut self) -> (usize, Vec<Arc<InterceptorContext>>) {
        let mut removed = 0;
        let mut contexts = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let dead = slot
                .entry
                .as_ref()
                .map(|entry| entry.host.is_dead())
                .unwrap_or(false);
            if !dead {
                continue;
            }
            if let Some(entry) = slot.entry.take() {
                if let Some(context) = entry.context.and_then(|id| self.contexts.remove(&id)) {
                    contexts.push(context);
                }
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            removed += 1;
        }
        self.by_address.retain(|_, (weak, _)| !weak.is_dead());
        (removed, contexts)
    }

    /// Number of live entries.
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
