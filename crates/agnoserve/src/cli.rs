//! Command line entry point for service binaries.

use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use clap::Parser;
use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

use agnorpc::ServiceFactory;
use agnowire::TransportConfig;

use crate::error::Error;
use crate::error::Result;
use crate::server::LibraryModeServer;
use crate::server::SimpleServer;
use crate::server::ThreadedServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// One connection at a time.
    Simple,
    /// A task per connection.
    Threaded,
    /// Print the address, serve one connection, exit.
    #[value(alias = "library")]
    Lib,
}

#[derive(Debug, Clone, Parser)]
#[command(about = "Serves an agnos service")]
pub struct ServerArgs {
    #[arg(short, long, value_enum, default_value_t = Mode::Simple)]
    pub mode: Mode,

    /// Host to bind.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// TCP port. 0 picks a free one, and is only allowed in library mode.
    #[arg(short, long, default_value_t = 0)]
    pub port: u16,

    /// Write logs to this file instead of stderr.
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Compress frames larger than this many bytes.
    #[arg(short, long)]
    pub compression: Option<usize>,
}

impl ServerArgs {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 && self.mode != Mode::Lib {
            return Err(Error::Config(format!("must specify port for {:?} mode", self.mode).to_lowercase()));
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig { compression_threshold: self.compression }
    }
}

/// Installs the global subscriber. `RUST_LOG` selects levels, `info` by default.
///
/// Stdout stays clean; the library-mode banner goes there.
pub fn init_logging(log: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match log {
        Some(path) => {
            let file = File::create(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("could not install logger: {}", e))
}

/// Parses the process arguments and runs the selected server until it finishes.
pub async fn server_main(factory: Arc<dyn ServiceFactory>) -> anyhow::Result<()> {
    run(ServerArgs::parse(), factory).await
}

pub async fn run(args: ServerArgs, factory: Arc<dyn ServiceFactory>) -> anyhow::Result<()> {
    args.validate()?;
    init_logging(args.log.as_deref())?;
    let config = args.transport_config();
    tracing::info!(mode = ?args.mode, host = %args.host, port = args.port, "starting server");

    match args.mode {
        Mode::Simple => SimpleServer::bind(&args.host, args.port, factory, config).await?.serve().await?,
        Mode::Threaded => ThreadedServer::bind(&args.host, args.port, factory, config).await?.serve().await?,
        Mode::Lib => {
            let server = LibraryModeServer::bind(&args.host, args.port, factory, config).await?;
            let mut stdout = tokio::io::stdout();
            server.serve(&mut stdout).await?;
        }
    }
    Ok(())
}
