//! # Servers
//!
//! Accept loops that hand each TCP connection to its own [`Processor`].
//!
//! - [`SimpleServer`]: one connection at a time, in the accepting task.
//! - [`ThreadedServer`]: one task per connection. Requests within a connection stay
//!   sequential; connections proceed in parallel.
//! - [`LibraryModeServer`]: announces its address, serves a single connection and
//!   returns. Meant for a server spawned as a child of the process that uses it.
//!
//! Every connection gets a fresh service instance and object table from the factory.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use agnorpc::Processor;
use agnorpc::ServiceFactory;
use agnowire::Transport;
use agnowire::TransportConfig;

use crate::error::Result;

/// First line of the library-mode banner.
pub const BANNER_MAGIC: &str = "AGNOS";

/// Serves one connection until the client quits or hangs up.
pub async fn serve_connection(transport: Transport, factory: &dyn ServiceFactory) -> agnorpc::Result<()> {
    let processor = Processor::new(Arc::new(transport), factory);
    processor.serve().await
}

struct Listener {
    listener: TcpListener,
    factory: Arc<dyn ServiceFactory>,
    config: TransportConfig,
}

impl Listener {
    async fn bind(host: &str, port: u16, factory: Arc<dyn ServiceFactory>, config: TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening");
        Ok(Self { listener, factory, config })
    }

    async fn accept(&self) -> Result<Transport> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::info!(%peer, "accepted connection");
        Ok(Transport::from_tcp(stream, self.config))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

async fn serve_logged(transport: Transport, factory: &dyn ServiceFactory) {
    let peer = transport.label().to_string();
    match serve_connection(transport, factory).await {
        Ok(()) => tracing::info!(%peer, "connection finished"),
        Err(e) => tracing::warn!(%peer, error = %e, "connection aborted"),
    }
}

// ============================================================================
// Simple
// ============================================================================

pub struct SimpleServer {
    inner: Listener,
}

impl SimpleServer {
    pub async fn bind(host: &str, port: u16, factory: Arc<dyn ServiceFactory>, config: TransportConfig) -> Result<Self> {
        Ok(Self { inner: Listener::bind(host, port, factory, config).await? })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Serves connections one after another. Returns only if accepting fails.
    pub async fn serve(&self) -> Result<()> {
        loop {
            let transport = self.inner.accept().await?;
            serve_logged(transport, self.inner.factory.as_ref()).await;
        }
    }
}

// ============================================================================
// Threaded
// ============================================================================

pub struct ThreadedServer {
    inner: Listener,
}

impl ThreadedServer {
    pub async fn bind(host: &str, port: u16, factory: Arc<dyn ServiceFactory>, config: TransportConfig) -> Result<Self> {
        Ok(Self { inner: Listener::bind(host, port, factory, config).await? })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Serves every connection on its own task. Returns only if accepting fails.
    pub async fn serve(&self) -> Result<()> {
        loop {
            let transport = self.inner.accept().await?;
            let factory = self.inner.factory.clone();
            tokio::spawn(async move {
                serve_logged(transport, factory.as_ref()).await;
            });
        }
    }
}

// ============================================================================
// Library Mode
// ============================================================================

pub struct LibraryModeServer {
    inner: Listener,
    host: String,
}

impl LibraryModeServer {
    /// Port 0 binds an ephemeral port; the banner reports the real one.
    pub async fn bind(host: &str, port: u16, factory: Arc<dyn ServiceFactory>, config: TransportConfig) -> Result<Self> {
        Ok(Self { inner: Listener::bind(host, port, factory, config).await?, host: host.to_string() })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// `AGNOS`, the host and the port, one per line, then an empty line.
    pub fn banner(&self) -> Result<String> {
        Ok(format!("{}\n{}\n{}\n\n", BANNER_MAGIC, self.host, self.local_addr()?.port()))
    }

    /// Writes the banner to `out`, then serves exactly one connection.
    pub async fn serve<W>(self, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        out.write_all(self.banner()?.as_bytes()).await?;
        out.flush().await?;

        let transport = self.inner.accept().await?;
        let Listener { listener, factory, .. } = self.inner;
        drop(listener);

        serve_connection(transport, factory.as_ref()).await?;
        tracing::info!("library-mode connection finished");
        Ok(())
    }
}
