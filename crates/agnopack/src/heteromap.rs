//! # Heterogeneous Maps
//!
//! A map whose keys and values each carry their own packer. It is the protocol's
//! self-describing container, used for service info and generic payloads.
//!
//! ## Invariants
//!
//! - Every key has exactly one value and exactly one pair of packers. Entries store
//!   all four together, so the two can never drift apart.
//! - Keys are unique under [`Value`] equality. Putting an existing key replaces it.

use crate::error::Error;
use crate::error::Result;
use crate::packer::Packer;
use crate::packer::ids;
use crate::registry::Registry;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Entry {
    pub key: Value,
    pub key_packer: Packer,
    pub value: Value,
    pub value_packer: Packer,
}

#[derive(Debug, Clone, Default)]
pub struct HeteroMap {
    entries: Vec<Entry>,
}

impl HeteroMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|e| &e.key == key)
    }

    /// Inserts with explicit packers. Returns the value previously stored under `key`.
    pub fn put(
        &mut self,
        key: impl Into<Value>,
        key_packer: Packer,
        value: impl Into<Value>,
        value_packer: Packer,
    ) -> Option<Value> {
        let entry = Entry { key: key.into(), key_packer, value: value.into(), value_packer };
        match self.position(&entry.key) {
            Some(idx) => Some(std::mem::replace(&mut self.entries[idx], entry).value),
            None => {
                self.entries.push(entry);
                None
            }
        }
    }

    /// Inserts, inferring built-in packers from the key and value kinds.
    pub fn insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        let value = value.into();
        let key_packer = infer_packer(&key)?;
        let value_packer = infer_packer(&value)?;
        Ok(self.put(key, key_packer, value, value_packer))
    }

    /// Inserts an empty nested map under `key` and returns it for filling in.
    pub fn new_map(&mut self, key: impl Into<Value>) -> Result<&mut HeteroMap> {
        let key = key.into();
        let key_packer = infer_packer(&key)?;
        self.put(key.clone(), key_packer, HeteroMap::new(), Packer::HeteroMap(Registry::default()));
        let idx = self.position(&key).ok_or_else(|| Error::Custom("nested map vanished".into()))?;
        match &mut self.entries[idx].value {
            Value::HeteroMap(map) => Ok(map),
            other => Err(Error::TypeMismatch { packer: ids::HETERO_MAP, found: other.kind() }),
        }
    }

    pub fn get(&self, key: impl Into<Value>) -> Option<&Value> {
        let key = key.into();
        self.entries.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    /// The key and value packers stored for `key`.
    pub fn packers(&self, key: impl Into<Value>) -> Option<(&Packer, &Packer)> {
        let key = key.into();
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| (&e.key_packer, &e.value_packer))
    }

    pub fn get_str(&self, key: impl Into<Value>) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i32(&self, key: impl Into<Value>) -> Option<i32> {
        self.get(key).and_then(Value::as_i32)
    }

    pub fn get_map(&self, key: impl Into<Value>) -> Option<&HeteroMap> {
        self.get(key).and_then(Value::as_hetero_map)
    }

    pub fn contains_key(&self, key: impl Into<Value>) -> bool {
        let key = key.into();
        self.position(&key).is_some()
    }

    /// Removes `key` together with both of its packers.
    pub fn remove(&mut self, key: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        self.position(&key).map(|idx| self.entries.remove(idx).value)
    }

    /// Copies every entry of `other`, packers included.
    pub fn put_all(&mut self, other: &HeteroMap) {
        for e in &other.entries {
            self.put(e.key.clone(), e.key_packer.clone(), e.value.clone(), e.value_packer.clone());
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|e| (&e.key, &e.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|e| &e.key)
    }
}

/// Order-insensitive. Packers compare by id.
impl PartialEq for HeteroMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.entries.iter().all(|mine| {
                other.entries.iter().any(|theirs| {
                    mine.key == theirs.key
                        && mine.value == theirs.value
                        && mine.key_packer.id() == theirs.key_packer.id()
                        && mine.value_packer.id() == theirs.value_packer.id()
                })
            })
    }
}

// ============================================================================
// Packer Inference
// ============================================================================

fn scalar_offset(value: &Value) -> Option<i32> {
    Some(match value {
        Value::Int8(_) => 0,
        Value::Bool(_) => 1,
        Value::Int16(_) => 2,
        Value::Int32(_) => 3,
        Value::Int64(_) => 4,
        Value::Float(_) => 5,
        Value::Buffer(_) => 6,
        Value::Date(_) => 7,
        Value::Str(_) => 8,
        _ => return None,
    })
}

/// Element offset shared by every item, if the sequence is non-empty and uniform.
fn uniform_offset(items: &[Value]) -> Option<i32> {
    let first = scalar_offset(items.first()?)?;
    items
        .iter()
        .all(|item| scalar_offset(item) == Some(first))
        .then_some(first)
}

/// Picks the built-in packer for a value, the way generated code does for literals.
pub fn infer_packer(value: &Value) -> Result<Packer> {
    let id = match value {
        Value::Null => ids::NULL,
        Value::HeteroMap(_) => ids::HETERO_MAP,
        Value::List(items) => uniform_offset(items)
            .map(|offset| ids::LIST_OF_INT8 + offset)
            .ok_or(Error::CannotInferPacker(value.kind()))?,
        Value::Set(items) => uniform_offset(items)
            .map(|offset| ids::SET_OF_INT8 + offset)
            .ok_or(Error::CannotInferPacker(value.kind()))?,
        Value::Map(entries) => {
            let first = entries.first().ok_or(Error::CannotInferPacker(value.kind()))?;
            let id = match (&first.0, &first.1) {
                (Value::Int32(_), Value::Int32(_)) => ids::MAP_OF_INT32_INT32,
                (Value::Int32(_), Value::Str(_)) => ids::MAP_OF_INT32_STR,
                (Value::Str(_), Value::Int32(_)) => ids::MAP_OF_STR_INT32,
                (Value::Str(_), Value::Str(_)) => ids::MAP_OF_STR_STR,
                _ => return Err(Error::CannotInferPacker(value.kind())),
            };
            let uniform = entries.iter().all(|(k, v)| {
                scalar_offset(k) == scalar_offset(&first.0) && scalar_offset(v) == scalar_offset(&first.1)
            });
            if !uniform {
                return Err(Error::CannotInferPacker(value.kind()));
            }
            id
        }
        scalar => match scalar_offset(scalar) {
            Some(offset) => ids::INT8 + offset,
            None => return Err(Error::CannotInferPacker(scalar.kind())),
        },
    };
    Packer::builtin(id).ok_or(Error::UnknownPackerId(id))
}
