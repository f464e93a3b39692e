//! # Child Processes
//!
//! Runs a library-mode server as a child process and talks to it over TCP.
//!
//! The child announces itself on stdout with the banner written by
//! [`crate::LibraryModeServer`]. Anything else on the first line means it failed
//! to start; the rest of its output is collected into the error.

use std::ffi::OsStr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;

use agnopack::Registry;
use agnorpc::ClientUtils;
use agnowire::Transport;
use agnowire::TransportConfig;

use crate::error::Error;
use crate::error::Result;
use crate::server::BANNER_MAGIC;

/// Arguments that put a server binary built on [`crate::server_main`] in library mode.
pub const LIBRARY_MODE_ARGS: [&str; 2] = ["-m", "lib"];

const CLOSE_GRACE: Duration = Duration::from_millis(700);
const DIAGNOSTICS_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected library-mode server process.
pub struct LibraryChild {
    child: Child,
    client: ClientUtils,
}

/// Spawns `program` and connects to it. An empty `args` means [`LIBRARY_MODE_ARGS`].
pub async fn spawn_library_server(
    program: impl AsRef<OsStr>,
    args: &[&str],
    types: Registry,
) -> Result<LibraryChild> {
    let args = if args.is_empty() { &LIBRARY_MODE_ARGS[..] } else { args };
    let mut child = Command::new(program.as_ref())
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    tracing::debug!(pid = ?child.id(), "spawned library-mode server");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Io("child stdout was not captured".to_string()))?;
    let mut stdout = BufReader::new(stdout);

    let mut lines = Vec::new();
    for _ in 0..3 {
        let mut line = String::new();
        stdout.read_line(&mut line).await?;
        lines.push(line.trim().to_string());
    }

    let Some((host, port)) = parse_banner(&lines) else {
        let output = collect_output(&mut child, stdout).await;
        return Err(Error::StartupFailed { banner: lines.join("\n"), output });
    };
    drop(stdout);

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_stderr(stderr));
    }

    let transport = Transport::connect(&host, port, TransportConfig::default()).await?;
    let client = ClientUtils::new(Arc::new(transport), types);
    Ok(LibraryChild { child, client })
}

/// Host and port from the first three banner lines.
pub fn parse_banner(lines: &[String]) -> Option<(String, u16)> {
    match lines {
        [magic, host, port, ..] if magic == BANNER_MAGIC && !host.is_empty() => {
            Some((host.clone(), port.parse().ok()?))
        }
        _ => None,
    }
}

async fn collect_output<R>(child: &mut Child, mut stdout: BufReader<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut output = String::new();
    let collect = async {
        let _ = stdout.read_to_string(&mut output).await;
        if let Some(mut stderr) = child.stderr.take() {
            let _ = stderr.read_to_string(&mut output).await;
        }
    };
    if tokio::time::timeout(DIAGNOSTICS_TIMEOUT, collect).await.is_err() {
        output.push_str("\n(output truncated)");
    }
    let _ = child.start_kill();
    output
}

async fn forward_stderr<R>(stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "agnoserve::child", "{}", line);
    }
}

impl LibraryChild {
    pub fn client(&self) -> &ClientUtils {
        &self.client
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Closes the connection and waits briefly for the child to exit, killing it otherwise.
    pub async fn close(mut self) -> Result<()> {
        if let Err(e) = self.client.close().await {
            tracing::debug!(error = %e, "closing child connection failed");
        }
        match tokio::time::timeout(CLOSE_GRACE, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::debug!(?status, "library-mode server exited");
            }
            Err(_) => {
                tracing::debug!("library-mode server still running, killing it");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}
