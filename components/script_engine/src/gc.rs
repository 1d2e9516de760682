//! Mark-sweep collection of heap cells.
//!
//! Roots are the global object and every cell with at least one live
//! handle. Marking is tri-color with an explicit gray worklist; sweeping
//! frees white cells and bumps their slot generation so stale weak
//! references stop resolving.

use crate::heap::{Cell, CellId, Heap};

/// Mark colors for tri-color marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarkColor {
    /// Unmarked (not yet visited)
    White = 0,
    /// In process (reachable, needs scanning)
    Gray = 1,
    /// Fully processed (reachable, all references scanned)
    Black = 2,
}

/// Runs a full collection and returns the freed cells.
///
/// The caller drops the returned cells after releasing the heap lock:
/// dropping a cell may drop native closures and embedder data, which can run
/// arbitrary embedder code.
pub(crate) fn collect(heap: &mut Heap) -> Vec<Cell> {
    let mut gray: Vec<CellId> = Vec::new();
    gray.push(heap.global);
    gray.extend(heap.handles.values().copied());

    for id in gray.clone() {
        if let Ok(cell) = heap.cell_mut(id) {
            cell.mark = MarkColor::Gray;
        }
    }

    while let Some(id) = gray.pop() {
        let children = match heap.cell_mut(id) {
            Ok(cell) if cell.mark != MarkColor::Black => {
                cell.mark = MarkColor::Black;
                cell.children()
            }
            _ => continue,
        };
        for child in children {
            if let Ok(cell) = heap.cell_mut(child) {
                if cell.mark == MarkColor::White {
                    cell.mark = MarkColor::Gray;
                    gray.push(child);
                }
            }
        }
    }

    let mut freed = Vec::new();
    for (index, entry) in heap.entries.iter_mut().enumerate() {
        let Some(cell) = entry.cell.as_mut() else {
            continue;
        };
        if cell.mark == MarkColor::White {
            if let Some(cell) = entry.cell.take() {
                freed.push(cell);
            }
            entry.generation = entry.generation.wrapping_add(1);
            heap.free.push(index as u32);
        } else {
            cell.mark = MarkColor::White;
        }
    }
    freed
}
