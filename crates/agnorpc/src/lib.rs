//! # Agnorpc
//!
//! The agnos request/reply protocol over [`agnowire`] frames and [`agnopack`] values.
//!
//! ## Architecture
//!
//! - [`Processor`]: serves one connection. Reads a request, dispatches it to a
//!   [`Service`] and writes exactly one reply, or none for QUIT, INCREF and DECREF.
//! - [`ClientUtils`]: issues requests and matches replies by sequence number, so
//!   calls can be pipelined and answered out of order.
//! - [`ObjectTable`]: per-connection handles for server objects passed by reference.
//!
//! ## Requests
//!
//! | Command   | Body                       | Reply                    |
//! |-----------|----------------------------|--------------------------|
//! | `PING`    | `str`                      | the same `str`           |
//! | `INVOKE`  | `i32` function id, args    | the function's result    |
//! | `QUIT`    | none                       | none                     |
//! | `DECREF`  | `i64` handle               | none                     |
//! | `INCREF`  | `i64` handle               | none                     |
//! | `GETINFO` | `i32` info code            | a heterogeneous map      |
//!
//! Every reply starts with an `i8` code. Failures come back as `PROTOCOL_ERROR`
//! (message), `PACKED_EXCEPTION` (class id, packed value) or `GENERIC_EXCEPTION`
//! (message, traceback).


pub mod client;
pub mod codes;
pub mod error;
pub mod objects;
pub mod processor;
pub mod proxy;
pub mod service;

pub use client::Call;
pub use client::ClientUtils;
pub use codes::AGNOS_PROTOCOL_VERSION;
pub use codes::AGNOS_TOOLCHAIN_VERSION;
pub use codes::Command;
pub use codes::InfoCode;
pub use codes::ReplyCode;
pub use error::Error;
pub use error::Fault;
pub use error::GenericException;
pub use error::PackedException;
pub use error::Result;
pub use objects::ObjectTable;
pub use processor::Flow;
pub use processor::Processor;
pub use proxy::ProxySerializer;
pub use proxy::RemoteHandle;
pub use service::Arg;
pub use service::Function;
pub use service::Handler;
pub use service::Service;
pub use service::ServiceDescriptor;
pub use service::ServiceFactory;
pub use service::ServiceTable;
