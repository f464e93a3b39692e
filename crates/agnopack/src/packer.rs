//! # Packers
//!
//! A [`Packer`] is an id plus a reversible mapping between a [`Value`] and bytes.
//!
//! ## Null handling
//!
//! Null is representable everywhere, but not always distinguishable:
//!
//! - Scalar packers write the zero value (`0`, `false`, epoch).
//! - `Buffer` and `Str` write the length `-1`, which unpacks back to null.
//! - Containers write the count `0`, which unpacks to an empty container.
//! - Object references ask their serializer, which maps null to the handle `-1`.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::LazyLock;

use crate::date::Date;
use crate::error::Error;
use crate::error::Result;
use crate::heteromap::HeteroMap;
use crate::registry::Registry;
use crate::value::ObjectRef;
use crate::value::Value;

/// Packer ids shared by every implementation of the protocol.
pub mod ids {
    pub const INT8: i32 = 1;
    pub const BOOL: i32 = 2;
    pub const INT16: i32 = 3;
    pub const INT32: i32 = 4;
    pub const INT64: i32 = 5;
    pub const FLOAT: i32 = 6;
    pub const BUFFER: i32 = 7;
    pub const DATE: i32 = 8;
    pub const STR: i32 = 9;
    pub const NULL: i32 = 10;

    pub const LIST_OF_INT8: i32 = 800;
    pub const LIST_OF_BOOL: i32 = 801;
    pub const LIST_OF_INT16: i32 = 802;
    pub const LIST_OF_INT32: i32 = 803;
    pub const LIST_OF_INT64: i32 = 804;
    pub const LIST_OF_FLOAT: i32 = 805;
    pub const LIST_OF_BUFFER: i32 = 806;
    pub const LIST_OF_DATE: i32 = 807;
    pub const LIST_OF_STR: i32 = 808;

    pub const SET_OF_INT8: i32 = 820;
    pub const SET_OF_BOOL: i32 = 821;
    pub const SET_OF_INT16: i32 = 822;
    pub const SET_OF_INT32: i32 = 823;
    pub const SET_OF_INT64: i32 = 824;
    pub const SET_OF_FLOAT: i32 = 825;
    pub const SET_OF_BUFFER: i32 = 826;
    pub const SET_OF_DATE: i32 = 827;
    pub const SET_OF_STR: i32 = 828;

    pub const MAP_OF_INT32_INT32: i32 = 850;
    pub const MAP_OF_INT32_STR: i32 = 851;
    pub const MAP_OF_STR_INT32: i32 = 852;
    pub const MAP_OF_STR_STR: i32 = 853;

    pub const HETERO_MAP: i32 = 998;

    /// Ids below this are reserved for the protocol itself.
    pub const FIRST_CUSTOM: i32 = 2000;
}

// ============================================================================
// Seams
// ============================================================================

/// Translates between live objects and the `Int64` handles that represent them on the wire.
pub trait Serializer: Send + Sync {
    /// Returns the handle for `obj`, or `-1` for `None`.
    fn store(&self, obj: Option<&ObjectRef>) -> Result<i64>;

    /// Resolves a handle. `-1` resolves to `None`.
    fn load(&self, id: i64) -> Result<Option<ObjectRef>>;
}

/// A user-defined packer, usually emitted by the IDL compiler for records and exceptions.
pub trait CustomPacker: Send + Sync {
    fn id(&self) -> i32;
    fn pack(&self, value: &Value, w: &mut dyn Write) -> Result<()>;
    fn unpack(&self, r: &mut dyn Read) -> Result<Value>;
}

// ============================================================================
// Packer
// ============================================================================

#[derive(Clone)]
pub enum Packer {
    Int8,
    Bool,
    Int16,
    Int32,
    Int64,
    Float,
    Buffer,
    Date,
    Str,
    /// Writes nothing and reads back null.
    Null,
    ListOf { id: i32, elem: Arc<Packer> },
    SetOf { id: i32, elem: Arc<Packer> },
    MapOf { id: i32, key: Arc<Packer>, value: Arc<Packer> },
    ObjRef { id: i32, serializer: Arc<dyn Serializer> },
    /// Self-describing map. The registry resolves custom ids while unpacking.
    HeteroMap(Registry),
    Custom(Arc<dyn CustomPacker>),
}

static BUILTINS: LazyLock<HashMap<i32, Packer>> = LazyLock::new(|| {
    let scalars = [
        Packer::Int8,
        Packer::Bool,
        Packer::Int16,
        Packer::Int32,
        Packer::Int64,
        Packer::Float,
        Packer::Buffer,
        Packer::Date,
        Packer::Str,
    ];

    let mut table = HashMap::new();
    for (offset, scalar) in scalars.iter().enumerate() {
        let offset = offset as i32;
        table.insert(
            ids::LIST_OF_INT8 + offset,
            Packer::list_of(ids::LIST_OF_INT8 + offset, scalar.clone()),
        );
        table.insert(
            ids::SET_OF_INT8 + offset,
            Packer::set_of(ids::SET_OF_INT8 + offset, scalar.clone()),
        );
        table.insert(scalar.id(), scalar.clone());
    }
    table.insert(ids::NULL, Packer::Null);

    let maps = [
        (ids::MAP_OF_INT32_INT32, Packer::Int32, Packer::Int32),
        (ids::MAP_OF_INT32_STR, Packer::Int32, Packer::Str),
        (ids::MAP_OF_STR_INT32, Packer::Str, Packer::Int32),
        (ids::MAP_OF_STR_STR, Packer::Str, Packer::Str),
    ];
    for (id, key, value) in maps {
        table.insert(id, Packer::map_of(id, key, value));
    }
    table
});

impl Packer {
    pub fn list_of(id: i32, elem: Packer) -> Self {
        Packer::ListOf { id, elem: Arc::new(elem) }
    }

    pub fn set_of(id: i32, elem: Packer) -> Self {
        Packer::SetOf { id, elem: Arc::new(elem) }
    }

    pub fn map_of(id: i32, key: Packer, value: Packer) -> Self {
        Packer::MapOf { id, key: Arc::new(key), value: Arc::new(value) }
    }

    pub fn obj_ref(id: i32, serializer: Arc<dyn Serializer>) -> Self {
        Packer::ObjRef { id, serializer }
    }

    pub fn hetero_map(registry: Registry) -> Self {
        Packer::HeteroMap(registry)
    }

    pub fn custom(packer: impl CustomPacker + 'static) -> Self {
        Packer::Custom(Arc::new(packer))
    }

    /// Looks up a built-in packer. The heterogeneous map comes back with an empty registry.
    pub fn builtin(id: i32) -> Option<Packer> {
        if id == ids::HETERO_MAP {
            return Some(Packer::HeteroMap(Registry::default()));
        }
        BUILTINS.get(&id).cloned()
    }

    pub fn id(&self) -> i32 {
        match self {
            Packer::Int8 => ids::INT8,
            Packer::Bool => ids::BOOL,
            Packer::Int16 => ids::INT16,
            Packer::Int32 => ids::INT32,
            Packer::Int64 => ids::INT64,
            Packer::Float => ids::FLOAT,
            Packer::Buffer => ids::BUFFER,
            Packer::Date => ids::DATE,
            Packer::Str => ids::STR,
            Packer::Null => ids::NULL,
            Packer::ListOf { id, .. }
            | Packer::SetOf { id, .. }
            | Packer::MapOf { id, .. }
            | Packer::ObjRef { id, .. } => *id,
            Packer::HeteroMap(_) => ids::HETERO_MAP,
            Packer::Custom(p) => p.id(),
        }
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::TypeMismatch { packer: self.id(), found: value.kind() }
    }

    pub fn pack(&self, value: &Value, w: &mut dyn Write) -> Result<()> {
        match (self, value) {
            (Packer::Null, _) => Ok(()),
            (Packer::Custom(p), _) => p.pack(value, w),

            (Packer::Int8, Value::Int8(v)) => write_i8(w, *v),
            (Packer::Int8, Value::Null) => write_i8(w, 0),
            (Packer::Bool, Value::Bool(v)) => write_i8(w, *v as i8),
            (Packer::Bool, Value::Null) => write_i8(w, 0),
            (Packer::Int16, Value::Int16(v)) => write_i16(w, *v),
            (Packer::Int16, Value::Null) => write_i16(w, 0),
            (Packer::Int32, Value::Int32(v)) => write_i32(w, *v),
            (Packer::Int32, Value::Null) => write_i32(w, 0),
            (Packer::Int64, Value::Int64(v)) => write_i64(w, *v),
            (Packer::Int64, Value::Null) => write_i64(w, 0),
            (Packer::Float, Value::Float(v)) => write_i64(w, v.to_bits() as i64),
            (Packer::Float, Value::Null) => write_i64(w, 0),
            (Packer::Date, Value::Date(d)) => write_i64(w, d.as_micros()),
            (Packer::Date, Value::Null) => write_i64(w, 0),

            (Packer::Buffer, Value::Buffer(b)) => write_blob(w, Some(b.as_slice())),
            (Packer::Buffer, Value::Null) => write_blob(w, None),
            (Packer::Str, Value::Str(s)) => write_blob(w, Some(s.as_bytes())),
            (Packer::Str, Value::Null) => write_blob(w, None),

            (Packer::ListOf { elem, .. }, Value::List(items))
            | (Packer::SetOf { elem, .. }, Value::Set(items)) => {
                write_len(w, items.len())?;
                for item in items {
                    elem.pack(item, w)?;
                }
                Ok(())
            }
            (Packer::MapOf { key, value: val, .. }, Value::Map(entries)) => {
                write_len(w, entries.len())?;
                for (k, v) in entries {
                    key.pack(k, w)?;
                    val.pack(v, w)?;
                }
                Ok(())
            }
            (Packer::HeteroMap(_), Value::HeteroMap(map)) => {
                write_len(w, map.len())?;
                for entry in map.entries() {
                    write_i32(w, entry.key_packer.id())?;
                    entry.key_packer.pack(&entry.key, w)?;
                    write_i32(w, entry.value_packer.id())?;
                    entry.value_packer.pack(&entry.value, w)?;
                }
                Ok(())
            }
            (
                Packer::ListOf { .. }
                | Packer::SetOf { .. }
                | Packer::MapOf { .. }
                | Packer::HeteroMap(_),
                Value::Null,
            ) => write_i32(w, 0),

            (Packer::ObjRef { serializer, .. }, Value::Object(obj)) => {
                write_i64(w, serializer.store(Some(obj))?)
            }
            (Packer::ObjRef { serializer, .. }, Value::Null) => {
                write_i64(w, serializer.store(None)?)
            }

            (_, other) => Err(self.mismatch(other)),
        }
    }

    pub fn unpack(&self, r: &mut dyn Read) -> Result<Value> {
        let value = match self {
            Packer::Null => Value::Null,
            Packer::Custom(p) => p.unpack(r)?,
            Packer::Int8 => Value::Int8(read_i8(r)?),
            Packer::Bool => Value::Bool(read_i8(r)? != 0),
            Packer::Int16 => Value::Int16(read_i16(r)?),
            Packer::Int32 => Value::Int32(read_i32(r)?),
            Packer::Int64 => Value::Int64(read_i64(r)?),
            Packer::Float => Value::Float(f64::from_bits(read_i64(r)? as u64)),
            Packer::Date => Value::Date(Date::from_micros(read_i64(r)?)),
            Packer::Buffer => read_blob(r)?.map_or(Value::Null, Value::Buffer),
            Packer::Str => match read_blob(r)? {
                Some(bytes) => Value::Str(String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)?),
                None => Value::Null,
            },
            Packer::ListOf { elem, .. } => Value::List(unpack_seq(elem, r)?),
            Packer::SetOf { elem, .. } => Value::Set(unpack_seq(elem, r)?),
            Packer::MapOf { key, value, .. } => {
                let count = read_len(r)?;
                let mut entries = Vec::with_capacity(count.min(PREALLOC_LIMIT));
                for _ in 0..count {
                    let k = key.unpack(r)?;
                    let v = value.unpack(r)?;
                    entries.push((k, v));
                }
                Value::Map(entries)
            }
            Packer::ObjRef { serializer, .. } => {
                serializer.load(read_i64(r)?)?.map_or(Value::Null, Value::Object)
            }
            Packer::HeteroMap(registry) => {
                let count = read_len(r)?;
                let mut map = HeteroMap::new();
                for _ in 0..count {
                    let key_packer = registry.resolve(read_i32(r)?)?;
                    let key = key_packer.unpack(r)?;
                    let value_packer = registry.resolve(read_i32(r)?)?;
                    let value = value_packer.unpack(r)?;
                    map.put(key, key_packer, value, value_packer);
                }
                Value::HeteroMap(map)
            }
        };
        Ok(value)
    }

    /// Packs into a fresh buffer.
    pub fn pack_to_vec(&self, value: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.pack(value, &mut buf)?;
        Ok(buf)
    }

    /// Unpacks from a byte slice, ignoring anything past the value.
    pub fn unpack_from_slice(&self, mut bytes: &[u8]) -> Result<Value> {
        self.unpack(&mut bytes)
    }
}

impl fmt::Debug for Packer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packer::ListOf { id, elem } => write!(f, "ListOf({}, {:?})", id, elem),
            Packer::SetOf { id, elem } => write!(f, "SetOf({}, {:?})", id, elem),
            Packer::MapOf { id, key, value } => write!(f, "MapOf({}, {:?}, {:?})", id, key, value),
            Packer::ObjRef { id, .. } => write!(f, "ObjRef({})", id),
            Packer::HeteroMap(_) => write!(f, "HeteroMap"),
            Packer::Custom(p) => write!(f, "Custom({})", p.id()),
            scalar => write!(f, "Builtin({})", scalar.id()),
        }
    }
}

/// Cap on speculative allocation driven by a count read off the wire.
const PREALLOC_LIMIT: usize = 1024;

fn unpack_seq(elem: &Packer, r: &mut dyn Read) -> Result<Vec<Value>> {
    let count = read_len(r)?;
    let mut items = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    for _ in 0..count {
        items.push(elem.unpack(r)?);
    }
    Ok(items)
}

// ============================================================================
// Records
// ============================================================================

/// Packs a [`Value::Record`] as its fields in declaration order.
pub struct RecordPacker {
    id: i32,
    fields: Vec<Packer>,
}

impl RecordPacker {
    pub fn new(id: i32, fields: Vec<Packer>) -> Self {
        Self { id, fields }
    }
}

impl CustomPacker for RecordPacker {
    fn id(&self) -> i32 {
        self.id
    }

    fn pack(&self, value: &Value, w: &mut dyn Write) -> Result<()> {
        let values = match value {
            Value::Record(values) if values.len() == self.fields.len() => values,
            other => return Err(Error::TypeMismatch { packer: self.id, found: other.kind() }),
        };
        for (packer, value) in self.fields.iter().zip(values) {
            packer.pack(value, w)?;
        }
        Ok(())
    }

    fn unpack(&self, r: &mut dyn Read) -> Result<Value> {
        let values = self
            .fields
            .iter()
            .map(|packer| packer.unpack(r))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Record(values))
    }
}

// ============================================================================
// Primitives
// ============================================================================

pub fn write_i8(w: &mut dyn Write, v: i8) -> Result<()> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

pub fn write_i16(w: &mut dyn Write, v: i16) -> Result<()> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

pub fn write_i32(w: &mut dyn Write, v: i32) -> Result<()> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

pub fn write_i64(w: &mut dyn Write, v: i64) -> Result<()> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

/// Writes a non-null string.
pub fn write_str(w: &mut dyn Write, s: &str) -> Result<()> {
    write_blob(w, Some(s.as_bytes()))
}

pub fn read_i8(r: &mut dyn Read) -> Result<i8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(i8::from_be_bytes(buf))
}

pub fn read_i16(r: &mut dyn Read) -> Result<i16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(i16::from_be_bytes(buf))
}

pub fn read_i32(r: &mut dyn Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub fn read_i64(r: &mut dyn Read) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

/// Reads a string, mapping null to the empty string.
pub fn read_str(r: &mut dyn Read) -> Result<String> {
    match read_blob(r)? {
        Some(bytes) => String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8),
        None => Ok(String::new()),
    }
}

fn write_len(w: &mut dyn Write, len: usize) -> Result<()> {
    let len = i32::try_from(len).map_err(|_| Error::TooLarge(len))?;
    write_i32(w, len)
}

fn read_len(r: &mut dyn Read) -> Result<usize> {
    let len = read_i32(r)?;
    usize::try_from(len).map_err(|_| Error::NegativeLength(len))
}

fn write_blob(w: &mut dyn Write, data: Option<&[u8]>) -> Result<()> {
    match data {
        Some(data) => {
            write_len(w, data.len())?;
            w.write_all(data)?;
            Ok(())
        }
        None => write_i32(w, -1),
    }
}

fn read_blob(r: &mut dyn Read) -> Result<Option<Vec<u8>>> {
    let len = match read_i32(r)? {
        -1 => return Ok(None),
        len if len < 0 => return Err(Error::NegativeLength(len)),
        len => len as usize,
    };
    // Bounded by what is actually in the stream, not by the claimed length.
    let mut data = Vec::with_capacity(len.min(PREALLOC_LIMIT * 64));
    r.take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(Error::UnexpectedEnd);
    }
    Ok(Some(data))
}
