//! # Agnopack
//!
//! The packer (codec) layer of the agnos wire protocol.
//!
//! ## Philosophy
//!
//! - **Numeric identity**: Every packer carries a process-wide stable id. Peers written
//!   in any language agree on the ids, never on type names.
//! - **Self-delimiting**: `pack` writes exactly what `unpack` reads back, so packers
//!   compose into containers without framing of their own.
//! - **Stateless**: Packers hold no per-call state and are shared freely across threads.
//!
//! ## Format
//!
//! - **Scalars**: Big-endian, fixed width. `Float` travels as the bit pattern of an `Int64`.
//! - **Blobs**: `[Len: i32][Data: Len]`. A length of `-1` marks a null blob.
//! - **Containers**: `[Count: i32]` followed by every element (or key, value pair).
//! - **HeteroMap**: `[Count: i32]` then `[KeyPackerId: i32][Key][ValPackerId: i32][Val]` per entry.

#[cfg(test)]
mod tests;

pub mod date;
pub mod error;
pub mod heteromap;
pub mod packer;
pub mod registry;
pub mod value;

pub use date::Date;
pub use date::UNIX_EPOCH_MICROS;
pub use error::Error;
pub use error::Result;
pub use heteromap::Entry;
pub use heteromap::HeteroMap;
pub use heteromap::infer_packer;
pub use packer::CustomPacker;
pub use packer::Packer;
pub use packer::RecordPacker;
pub use packer::Serializer;
pub use packer::ids;
pub use packer::read_i8;
pub use packer::read_i32;
pub use packer::read_i64;
pub use packer::read_str;
pub use packer::write_i8;
pub use packer::write_i32;
pub use packer::write_i64;
pub use packer::write_str;
pub use registry::Registry;
pub use value::ObjectRef;
pub use value::Value;
