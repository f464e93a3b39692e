//! # Agnoserve
//!
//! Hosting for agnos services.
//!
//! A service binary builds a [`ServiceFactory`] and hands it to [`server_main`], which
//! reads `--mode`, `--host`, `--port`, `--log` and `--compression` and runs one of the
//! servers in [`server`]. A host application can start such a binary as a child with
//! [`spawn_library_server`] and call it through the returned client.
//!
//! [`ServiceFactory`]: agnorpc::ServiceFactory

#[cfg(test)]
mod tests;

pub mod child;
pub mod cli;
pub mod error;
pub mod server;

pub use child::LIBRARY_MODE_ARGS;
pub use child::LibraryChild;
pub use child::spawn_library_server;
pub use cli::Mode;
pub use cli::ServerArgs;
pub use cli::init_logging;
pub use cli::run;
pub use cli::server_main;
pub use error::Error;
pub use error::Result;
pub use server::LibraryModeServer;
pub use server::SimpleServer;
pub use server::ThreadedServer;
pub use server::serve_connection;
