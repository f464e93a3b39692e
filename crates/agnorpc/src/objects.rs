//! # Object Reference Table
//!
//! The server side of remote object references. Objects handed to a client are
//! parked here under an `Int64` handle until the client lets go of them.
//!
//! ## Invariants
//!
//! - Handles come from a counter that starts at 0 and never repeats. `-1` is null.
//! - Identity is by allocation, never by value. While a cell is alive it keeps its
//!   object alive, so an address can not be recycled under a live handle.
//! - `store` creates a cell with count 1 and leaves existing cells alone. Only
//!   `incref` raises the count, and the cell goes away when `decref` reaches zero.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use agnopack::ObjectRef;
use agnopack::Serializer;

struct Cell {
    object: ObjectRef,
    refcount: u64,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    cells: HashMap<i64, Cell>,
    by_addr: HashMap<usize, i64>,
}

#[derive(Default)]
pub struct ObjectTable {
    inner: Mutex<Inner>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the handle for `obj`, registering it on first sight.
    pub fn store(&self, obj: Option<&ObjectRef>) -> i64 {
        let Some(obj) = obj else { return -1 };
        let mut inner = self.lock();
        if let Some(&id) = inner.by_addr.get(&obj.addr()) {
            return id;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.by_addr.insert(obj.addr(), id);
        inner.cells.insert(id, Cell { object: obj.clone(), refcount: 1 });
        tracing::trace!(id, "object stored");
        id
    }

    /// Resolves a handle. `None` for `-1`, an error for anything never issued or already released.
    pub fn load(&self, id: i64) -> agnopack::Result<Option<ObjectRef>> {
        if id == -1 {
            return Ok(None);
        }
        self.lock()
            .cells
            .get(&id)
            .map(|cell| Some(cell.object.clone()))
            .ok_or(agnopack::Error::UnknownHandle(id))
    }

    /// Extends the lease on a handle. Unknown handles are ignored.
    pub fn incref(&self, id: i64) {
        if let Some(cell) = self.lock().cells.get_mut(&id) {
            cell.refcount += 1;
        }
    }

    /// Shortens the lease on a handle, evicting it at zero. Unknown handles are ignored.
    pub fn decref(&self, id: i64) {
        let mut inner = self.lock();
        let Some(cell) = inner.cells.get_mut(&id) else { return };
        cell.refcount = cell.refcount.saturating_sub(1);
        if cell.refcount == 0 {
            if let Some(cell) = inner.cells.remove(&id) {
                inner.by_addr.remove(&cell.object.addr());
            }
            tracing::trace!(id, "object released");
        }
    }

    pub fn refcount(&self, id: i64) -> Option<u64> {
        self.lock().cells.get(&id).map(|cell| cell.refcount)
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.lock().cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serializer for ObjectTable {
    fn store(&self, obj: Option<&ObjectRef>) -> agnopack::Result<i64> {
        Ok(ObjectTable::store(self, obj))
    }

    fn load(&self, id: i64) -> agnopack::Result<Option<ObjectRef>> {
        ObjectTable::load(self, id)
    }
}
