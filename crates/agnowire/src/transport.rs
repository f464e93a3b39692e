//! # Framed Transport
//!
//! Moves whole frames over any bidirectional byte stream.
//!
//! ## Philosophy
//!
//! - **Transactions**: A frame is read or written inside a transaction. Opening one
//!   takes the direction's lock and closing it releases the lock, so frames never
//!   interleave, even with many tasks sharing the transport.
//! - **Payload-Oblivious**: The transport knows sequence numbers and lengths. It never
//!   looks inside a payload.
//! - **Buffered Writes**: A write transaction buffers its payload and emits the frame
//!   on commit, in one write. An empty buffer emits nothing at all.
//!
//! ## Invariants
//!
//! - At most one read transaction and one write transaction are open at a time.
//! - Reads never run past the end of the current frame.
//! - Dropping a write transaction without committing discards it.

use std::io;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;

use crate::error::Error;
use crate::error::Result;
use crate::frame;
use crate::frame::FrameHeader;
use crate::frame::HEADER_LEN;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

const COMPRESSION_OFF: usize = usize::MAX;

/// Per-transport settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportConfig {
    /// Payloads strictly longer than this are deflated. `None` never compresses.
    pub compression_threshold: Option<usize>,
}

impl TransportConfig {
    /// Compression on, at the default threshold.
    pub fn compressed() -> Self {
        Self { compression_threshold: Some(frame::DEFAULT_COMPRESSION_THRESHOLD) }
    }
}

struct Writer {
    stream: BoxedWrite,
    buf: Vec<u8>,
}

pub struct Transport {
    label: String,
    reader: Mutex<BufReader<BoxedRead>>,
    writer: Mutex<Writer>,
    compression_threshold: AtomicUsize,
}

impl Transport {
    /// Wraps a single duplex stream.
    pub fn new<S>(stream: S, config: TransportConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (r, w) = tokio::io::split(stream);
        Self::from_parts(r, w, config)
    }

    /// Wraps separate read and write halves.
    pub fn from_parts<R, W>(reader: R, writer: W, config: TransportConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            label: "stream".to_string(),
            reader: Mutex::new(BufReader::new(Box::new(reader))),
            writer: Mutex::new(Writer { stream: Box::new(writer), buf: Vec::new() }),
            compression_threshold: AtomicUsize::new(config.compression_threshold.unwrap_or(COMPRESSION_OFF)),
        }
    }

    pub fn from_tcp(stream: TcpStream, config: TransportConfig) -> Self {
        let label = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "tcp".to_string());
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %label, error = %e, "could not disable Nagle");
        }
        let (r, w) = stream.into_split();
        Self::from_parts(r, w, config).with_label(label)
    }

    pub async fn connect(host: &str, port: u16, config: TransportConfig) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::ConnectionLost(format!("connect to {}:{} failed: {}", host, port, e)))?;
        tracing::debug!(host, port, "connected");
        Ok(Self::from_tcp(stream, config))
    }

    /// Name used for this transport in log lines.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    // ========================================================================
    // Compression
    // ========================================================================

    pub fn set_compression(&self, threshold: Option<usize>) {
        self.compression_threshold
            .store(threshold.unwrap_or(COMPRESSION_OFF), Ordering::Relaxed);
    }

    pub fn enable_compression(&self) {
        self.set_compression(Some(frame::DEFAULT_COMPRESSION_THRESHOLD));
    }

    pub fn disable_compression(&self) {
        self.set_compression(None);
    }

    pub fn compression_threshold(&self) -> Option<usize> {
        match self.compression_threshold.load(Ordering::Relaxed) {
            COMPRESSION_OFF => None,
            threshold => Some(threshold),
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Waits for the next frame and opens it for reading.
    pub async fn begin_read(&self) -> Result<ReadTransaction<'_>> {
        self.begin_read_timeout(None).await
    }

    /// Like [`Transport::begin_read`], giving up if no frame starts within `timeout`.
    ///
    /// The deadline covers only the wait for the first byte. Once a frame has started
    /// it is always read to the end, so a timeout never leaves a half-read frame behind.
    pub async fn begin_read_timeout(&self, timeout: Option<Duration>) -> Result<ReadTransaction<'_>> {
        let mut reader = self.reader.lock().await;

        let available = match timeout {
            Some(limit) => tokio::time::timeout(limit, reader.fill_buf())
                .await
                .map_err(|_| Error::Timeout)??
                .len(),
            None => reader.fill_buf().await?.len(),
        };
        if available == 0 {
            return Err(Error::ConnectionLost(format!("{} closed the stream", self.label)));
        }

        let mut raw = [0u8; HEADER_LEN];
        reader.read_exact(&mut raw).await?;
        let header = FrameHeader::decode(&raw)?;

        let len = header.len as usize;
        let mut payload = Vec::with_capacity(len.min(1 << 20));
        (&mut *reader).take(len as u64).read_to_end(&mut payload).await?;
        if payload.len() != len {
            return Err(Error::ConnectionLost(format!(
                "{} closed the stream mid-frame ({} of {} bytes)",
                self.label,
                payload.len(),
                len
            )));
        }

        if header.is_compressed() {
            payload = frame::decompress(&payload, header.uncompressed as usize)?;
        }

        tracing::trace!(
            peer = %self.label,
            seq = header.seq,
            len = payload.len(),
            compressed = header.is_compressed(),
            "frame received"
        );

        Ok(ReadTransaction { seq: header.seq, payload, pos: 0, _guard: reader })
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Opens a frame for writing under `seq`.
    pub async fn begin_write(&self, seq: i32) -> WriteTransaction<'_> {
        let mut writer = self.writer.lock().await;
        writer.buf.clear();
        let threshold = self.compression_threshold.load(Ordering::Relaxed);
        WriteTransaction { seq, writer, threshold, label: &self.label }
    }

    /// Shuts the write side down. The peer sees end-of-stream.
    pub async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.stream.shutdown().await?;
        tracing::debug!(peer = %self.label, "transport closed");
        Ok(())
    }
}

// ============================================================================
// Read Transaction
// ============================================================================

/// One received frame. Holds the read lock until dropped or ended.
pub struct ReadTransaction<'a> {
    seq: i32,
    payload: Vec<u8>,
    pos: usize,
    _guard: MutexGuard<'a, BufReader<BoxedRead>>,
}

impl ReadTransaction<'_> {
    pub fn seq(&self) -> i32 {
        self.seq
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.pos
    }

    /// Takes exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8]> {
        let available = self.remaining();
        if n > available {
            return Err(Error::Overread { requested: n, available });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.payload[start..self.pos])
    }

    /// Takes everything left in the frame.
    pub fn read_all(&mut self) -> Vec<u8> {
        let rest = self.payload[self.pos..].to_vec();
        self.pos = self.payload.len();
        rest
    }

    /// Releases the read lock. Unread bytes are dropped.
    pub fn end(self) {}
}

impl io::Read for ReadTransaction<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.payload[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

// ============================================================================
// Write Transaction
// ============================================================================

/// One outgoing frame. Holds the write lock until committed, cancelled or dropped.
pub struct WriteTransaction<'a> {
    seq: i32,
    writer: MutexGuard<'a, Writer>,
    threshold: usize,
    label: &'a str,
}

impl WriteTransaction<'_> {
    pub fn seq(&self) -> i32 {
        self.seq
    }

    /// Bytes buffered so far.
    pub fn len(&self) -> usize {
        self.writer.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writer.buf.is_empty()
    }

    /// Discards everything buffered but keeps the transaction (and the lock).
    pub fn restart(&mut self) {
        self.writer.buf.clear();
    }

    /// Discards the frame and releases the lock.
    pub fn cancel(self) {}

    /// Emits the frame and releases the lock. An empty buffer sends nothing.
    pub async fn commit(mut self) -> Result<()> {
        let Writer { stream, buf } = &mut *self.writer;
        if buf.is_empty() {
            return Ok(());
        }

        let raw_len = buf.len();
        let compressed = if raw_len > self.threshold { Some(frame::compress(buf)?) } else { None };
        let payload = compressed.as_deref().unwrap_or(buf.as_slice());

        let header = FrameHeader {
            seq: self.seq,
            len: i32::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge(payload.len()))?,
            uncompressed: if compressed.is_some() {
                i32::try_from(raw_len).map_err(|_| Error::PayloadTooLarge(raw_len))?
            } else {
                0
            },
        };

        stream.write_all(&header.encode()).await?;
        stream.write_all(payload).await?;
        stream.flush().await?;

        tracing::trace!(
            peer = %self.label,
            seq = self.seq,
            len = raw_len,
            wire_len = payload.len(),
            "frame sent"
        );
        buf.clear();
        Ok(())
    }
}

impl io::Write for WriteTransaction<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writer.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        self.writer.buf.clear();
    }
}
