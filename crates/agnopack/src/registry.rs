//! # Packer Registry
//!
//! Resolves the packer ids found inside heterogeneous maps and exception replies.
//! Built-in ids always win; everything else must be registered.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::error::Result;
use crate::packer::Packer;
use crate::packer::ids;

/// Cheap to clone; clones share the table until one of them registers something new.
#[derive(Clone, Default)]
pub struct Registry {
    packers: Arc<HashMap<i32, Packer>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a packer under its own id, replacing any previous one.
    pub fn register(&mut self, packer: Packer) -> &mut Self {
        let id = packer.id();
        self.register_as(id, packer)
    }

    /// Registers a packer under an explicit id, e.g. an exception class id.
    pub fn register_as(&mut self, id: i32, packer: Packer) -> &mut Self {
        Arc::make_mut(&mut self.packers).insert(id, packer);
        self
    }

    pub fn with(mut self, packer: Packer) -> Self {
        self.register(packer);
        self
    }

    /// Registered packer for `id`, ignoring built-ins.
    pub fn get(&self, id: i32) -> Option<&Packer> {
        self.packers.get(&id)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.packers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.packers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packers.is_empty()
    }

    /// Resolves any id that may appear on the wire.
    ///
    /// A nested heterogeneous map resolves with this same registry, so custom ids
    /// keep working at any depth.
    pub fn resolve(&self, id: i32) -> Result<Packer> {
        if id == ids::HETERO_MAP {
            return Ok(Packer::HeteroMap(self.clone()));
        }
        Packer::builtin(id)
            .or_else(|| self.packers.get(&id).cloned())
            .ok_or(Error::UnknownPackerId(id))
    }
}
