//! Heap cells and the handle table.
//!
//! Cells are stored in a generational slab. Values stored inside the heap
//! (property values, array elements) refer to other cells by [`CellId`];
//! only values handed out to embedders go through the handle table.

use crate::gc::MarkColor;
use crate::NativeFn;
use core_types::{Handle, JsError, JsResult, Value};
use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Generational index of a heap cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CellId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// A value as stored inside the heap.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Undefined,
    Null,
    Boolean(bool),
    Smi(i32),
    Double(f64),
    String(String),
    Cell(CellId),
}

pub(crate) enum CellKind {
    Object,
    Array(Vec<Slot>),
    Function { name: String, native: NativeFn },
}

#[derive(Debug, Clone)]
pub(crate) enum Property {
    Data {
        value: Slot,
        enumerable: bool,
    },
    Accessor {
        getter: Option<CellId>,
        setter: Option<CellId>,
    },
}

pub(crate) struct Cell {
    pub(crate) kind: CellKind,
    pub(crate) properties: IndexMap<String, Property>,
    pub(crate) internal: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) mark: MarkColor,
}

impl Cell {
    fn new(kind: CellKind) -> Self {
        Cell {
            kind,
            properties: IndexMap::new(),
            internal: None,
            mark: MarkColor::White,
        }
    }

    /// Cells referenced directly from this one.
    pub(crate) fn children(&self) -> Vec<CellId> {
        let mut out = Vec::new();
        if let CellKind::Array(items) = &self.kind {
            out.extend(items.iter().filter_map(Slot::cell));
        }
        for property in self.properties.values() {
            match property {
                Property::Data { value, .. } => out.extend(value.cell()),
                Property::Accessor { getter, setter } => {
                    out.extend(getter.iter().copied());
                    out.extend(setter.iter().copied());
                }
            }
        }
        out
    }
}

impl Slot {
    pub(crate) fn cell(&self) -> Option<CellId> {
        match self {
            Slot::Cell(id) => Some(*id),
            _ => None,
        }
    }
}

pub(crate) struct Entry {
    pub(crate) generation: u32,
    pub(crate) cell: Option<Cell>,
}

pub(crate) struct Heap {
    pub(crate) entries: Vec<Entry>,
    pub(crate) free: Vec<u32>,
    pub(crate) handles: HashMap<u64, CellId>,
    next_handle: u64,
    pub(crate) global: CellId,
}

pub(crate) fn released() -> JsError {
    JsError::error("Object released")
}

impl Heap {
    pub(crate) fn new() -> Self {
        let mut heap = Heap {
            entries: Vec::new(),
            free: Vec::new(),
            handles: HashMap::new(),
            next_handle: 1,
            global: CellId {
                index: 0,
                generation: 0,
            },
        };
        heap.global = heap.alloc(CellKind::Object);
        heap
    }

    pub(crate) fn alloc(&mut self, kind: CellKind) -> CellId {
        let cell = Cell::new(kind);
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.cell = Some(cell);
                CellId {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    generation: 0,
                    cell: Some(cell),
                });
                CellId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn is_live(&self, id: CellId) -> bool {
        self.entries
            .get(id.index as usize)
            .map(|e| e.generation == id.generation && e.cell.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn cell(&self, id: CellId) -> JsResult<&Cell> {
        match self.entries.get(id.index as usize) {
            Some(Entry {
                generation,
                cell: Some(cell),
            }) if *generation == id.generation => Ok(cell),
            _ => Err(released()),
        }
    }

    pub(crate) fn cell_mut(&mut self, id: CellId) -> JsResult<&mut Cell> {
        match self.entries.get_mut(id.index as usize) {
            Some(Entry {
                generation,
                cell: Some(cell),
            }) if *generation == id.generation => Ok(cell),
            _ => Err(released()),
        }
    }

    /// Creates a new handle for a cell.
    pub(crate) fn mint(&mut self, id: CellId) -> Value {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(raw, id);
        let handle = Handle::from_raw(raw);
        match self.cell(id).map(|c| &c.kind) {
            Ok(CellKind::Array(_)) => Value::Array(handle),
            Ok(CellKind::Function { .. }) => Value::Function(handle),
            _ => Value::Object(handle),
        }
    }

    pub(crate) fn release(&mut self, handle: Handle) -> bool {
        self.handles.remove(&handle.raw()).is_some()
    }

    pub(crate) fn lookup(&self, handle: Handle) -> JsResult<CellId> {
        match self.handles.get(&handle.raw()) {
            Some(id) if self.is_live(*id) => Ok(*id),
            _ => Err(released()),
        }
    }

    /// Converts an embedder value into its stored form.
    pub(crate) fn resolve(&self, value: &Value) -> JsResult<Slot> {
        Ok(match value {
            Value::Undefined => Slot::Undefined,
            Value::Null => Slot::Null,
            Value::Boolean(b) => Slot::Boolean(*b),
            Value::Smi(n) => Slot::Smi(*n),
            Value::Double(n) => Slot::Double(*n),
            Value::String(s) => Slot::String(s.clone()),
            Value::Object(h) | Value::Array(h) | Value::Function(h) => Slot::Cell(self.lookup(*h)?),
        })
    }

    /// Converts a stored value into an embedder value, minting a handle for cells.
    pub(crate) fn to_value(&mut self, slot: &Slot) -> Value {
        match slot {
            Slot::Undefined => Value::Undefined,
            Slot::Null => Value::Null,
            Slot::Boolean(b) => Value::Boolean(*b),
            Slot::Smi(n) => Value::Smi(*n),
            Slot::Double(n) => Value::number(*n),
            Slot::String(s) => Value::String(s.clone()),
            Slot::Cell(id) => self.mint(*id),
        }
    }

    pub(crate) fn live_cells(&self) -> usize {
        self.entries.iter().filter(|e| e.cell.is_some()).count()
    }
}
