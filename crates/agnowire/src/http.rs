//! # HTTP Client Transport
//!
//! Frames over HTTP, for services that sit behind a web server.
//!
//! Every committed write transaction becomes one `POST` whose body is the frame, sent
//! as `application/octet-stream`. The response body holds the reply frame and is fed
//! to the read side unchanged, so everything above the transport works as it does
//! over TCP.
//!
//! ## Invariants
//!
//! - Requests go out one at a time, in commit order. Replies come back in that order.
//! - A failed request or a non-2xx status closes the read side. Readers see a lost
//!   connection.

use std::io;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::Request;
use hyper::Uri;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::error::Result;
use crate::transport::Transport;
use crate::transport::TransportConfig;

pub const CONTENT_TYPE_FRAME: &str = "application/octet-stream";

/// Replies waiting for a reader are buffered up to this many bytes.
const REPLY_BUFFER: usize = 64 * 1024;

type HttpClient = Client<HttpConnector, Full<Bytes>>;

impl Transport {
    /// Opens a transport that POSTs each frame to `url`.
    ///
    /// Only `http://` URLs are accepted. Must be called from within a tokio runtime.
    pub async fn connect_url(url: &str, config: TransportConfig) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
        if uri.scheme_str() != Some("http") || uri.host().is_none() {
            return Err(Error::InvalidUrl(format!("{}: expected an http:// url", url)));
        }

        let client: HttpClient = Client::builder(TokioExecutor::new()).build_http();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (reader, replies) = tokio::io::duplex(REPLY_BUFFER);
        tokio::spawn(post_frames(client, uri.clone(), frames_rx, replies));

        tracing::debug!(%uri, "http transport opened");
        let writer = FrameSink { buf: Vec::new(), frames: Some(frames_tx) };
        Ok(Transport::from_parts(reader, writer, config).with_label(uri.to_string()))
    }
}

// ============================================================================
// Write Side
// ============================================================================

/// Collects the bytes of one frame and hands them off as a request body on flush.
struct FrameSink {
    buf: Vec<u8>,
    frames: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl AsyncWrite for FrameSink {
    fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        self.buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.buf.is_empty() {
            return Poll::Ready(Ok(()));
        }
        let frame = std::mem::take(&mut self.buf);
        let sent = match &self.frames {
            Some(frames) => frames.send(frame).is_ok(),
            None => false,
        };
        if sent {
            Poll::Ready(Ok(()))
        } else {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "http transport is closed")))
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let flushed = self.as_mut().poll_flush(cx);
        self.frames = None;
        flushed
    }
}

// ============================================================================
// Request Loop
// ============================================================================

async fn post_frames(
    client: HttpClient,
    uri: Uri,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    mut replies: DuplexStream,
) {
    while let Some(frame) = frames.recv().await {
        let reply = match post(&client, &uri, frame).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(%uri, error = %e, "http request failed");
                break;
            }
        };
        if let Err(e) = replies.write_all(&reply).await {
            tracing::debug!(%uri, error = %e, "reader is gone");
            break;
        }
    }
    // Dropping `replies` ends the read side.
    tracing::debug!(%uri, "http transport closed");
}

async fn post(client: &HttpClient, uri: &Uri, frame: Vec<u8>) -> Result<Bytes> {
    let request = Request::post(uri.clone())
        .header(CONTENT_TYPE, CONTENT_TYPE_FRAME)
        .body(Full::new(Bytes::from(frame)))
        .map_err(|e| Error::Io(format!("could not build request: {}", e)))?;

    let response = client
        .request(request)
        .await
        .map_err(|e| Error::ConnectionLost(format!("POST {} failed: {}", uri, e)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::ConnectionLost(format!("POST {} answered {}", uri, status)));
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::ConnectionLost(format!("reading reply from {} failed: {}", uri, e)))?;
    Ok(body.to_bytes())
}
