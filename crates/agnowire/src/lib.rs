//! # Agnowire
//!
//! Framing for the agnos protocol: sequence-tagged, length-prefixed frames over a
//! byte stream, with optional zlib compression of large payloads.
//!
//! Readers and writers work in transactions; see [`Transport`]. A transport runs over
//! TCP, any duplex stream, or plain HTTP requests ([`Transport::connect_url`]).


pub mod error;
pub mod frame;
pub mod http;
pub mod transport;

pub use error::Error;
pub use error::Result;
pub use frame::DEFAULT_COMPRESSION_THRESHOLD;
pub use frame::FrameHeader;
pub use frame::HEADER_LEN;
pub use http::CONTENT_TYPE_FRAME;
pub use transport::ReadTransaction;
pub use transport::Transport;
pub use transport::TransportConfig;
pub use transport::WriteTransaction;
