//! Line-oriented duplex connection.
//!
//! A [`Connection`] wraps any async byte stream (TCP in production, an
//! in-memory duplex in tests) and splits it into two independently owned
//! halves:
//!
//! - [`LineReader`]: owned by exactly one task, the receive loop. Yields one
//!   [`Message`] per line and `None` once the stream is finished.
//! - [`ConnectionWriter`]: cheap to clone. Each call writes one complete line
//!   while holding the connection's write lock, so lines from concurrent
//!   senders never interleave.
//!
//! ```text
//!            ┌────────────┐  receive() -> Option<Message>
//! stream ───>│ LineReader │────────────────────────────────> read loop
//!            └────────────┘
//!            ┌──────────────────┐  send(&Message)
//! stream <───│ ConnectionWriter │<──────────────────────── any task
//!            └──────────────────┘
//! ```

use std::sync::Arc;

use greenhouse_proto::{DecodeError, MAX_LINE_LEN, Message};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::Mutex,
};

use crate::error::ConnectionError;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A duplex line channel over one byte stream.
pub struct Connection {
    reader: LineReader,
    writer: ConnectionWriter,
}

impl Connection {
    /// Wrap a byte stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self { reader: LineReader::new(read), writer: ConnectionWriter::new(write) }
    }

    /// Wrap an already split stream (e.g. `TcpStream::into_split`).
    pub fn from_parts<R, W>(read: R, write: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self { reader: LineReader::new(read), writer: ConnectionWriter::new(write) }
    }

    /// Wait for the next message. See [`LineReader::receive`].
    pub async fn receive(&mut self) -> Option<Message> {
        self.reader.receive().await
    }

    /// Send one message. See [`ConnectionWriter::send`].
    pub async fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        self.writer.send(message).await
    }

    /// A handle for sending from other tasks.
    pub fn writer(&self) -> ConnectionWriter {
        self.writer.clone()
    }

    /// Separate the read and write halves.
    pub fn into_split(self) -> (LineReader, ConnectionWriter) {
        (self.reader, self.writer)
    }
}

/// Receiving half of a [`Connection`].
pub struct LineReader {
    inner: BufReader<BoxedReader>,
    buf: Vec<u8>,
    finished: bool,
}

impl LineReader {
    fn new<R>(read: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self { inner: BufReader::new(Box::new(read)), buf: Vec::new(), finished: false }
    }

    /// Wait for the next line and decode it.
    ///
    /// Returns `None` once the peer closed the stream or a read failed; every
    /// later call returns `None` as well. Lines that do not decode (including
    /// non UTF-8 lines) come back as [`Message::Error`] and do not end the
    /// stream. A line longer than [`MAX_LINE_LEN`] is skipped without being
    /// buffered and reported as [`DecodeError::LineTooLong`].
    pub async fn receive(&mut self) -> Option<Message> {
        if self.finished {
            return None;
        }

        match self.read_line().await {
            Ok(Line::Complete) => {
                let message = match std::str::from_utf8(&self.buf) {
                    Ok(line) => {
                        tracing::trace!(line, "received line");
                        Message::decode(line)
                    },
                    Err(_) => Message::invalid("line is not valid UTF-8"),
                };
                Some(message)
            },
            Ok(Line::TooLong) => {
                tracing::warn!(limit = MAX_LINE_LEN, "discarded oversized line");
                Some(DecodeError::LineTooLong(MAX_LINE_LEN).into())
            },
            Ok(Line::Eof) => {
                tracing::debug!("peer closed the stream");
                self.finished = true;
                None
            },
            Err(e) => {
                tracing::debug!(error = %e, "read failed, treating stream as closed");
                self.finished = true;
                None
            },
        }
    }

    /// Read up to the next newline into `buf`, keeping at most
    /// [`MAX_LINE_LEN`] bytes. Past the limit input is consumed and dropped.
    async fn read_line(&mut self) -> std::io::Result<Line> {
        self.buf.clear();
        let mut overflow = false;

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(match (overflow, self.buf.is_empty()) {
                    (true, _) => Line::TooLong,
                    (false, true) => Line::Eof,
                    (false, false) => Line::Complete,
                });
            }

            let (chunk, used, done) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..i], i + 1, true),
                None => (available, available.len(), false),
            };

            if !overflow {
                if self.buf.len() + chunk.len() > MAX_LINE_LEN {
                    overflow = true;
                    self.buf = Vec::new();
                } else {
                    self.buf.extend_from_slice(chunk);
                }
            }
            self.inner.consume(used);

            if done {
                return Ok(if overflow { Line::TooLong } else { Line::Complete });
            }
        }
    }
}

enum Line {
    /// `buf` holds one line, newline stripped
    Complete,
    /// The line was over the limit and has been skipped
    TooLong,
    Eof,
}

/// Sending half of a [`Connection`]. Clones share the same stream.
#[derive(Clone)]
pub struct ConnectionWriter {
    /// `None` once shut down or after a failed write.
    sink: Arc<Mutex<Option<BoxedWriter>>>,
}

impl ConnectionWriter {
    fn new<W>(write: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self { sink: Arc::new(Mutex::new(Some(Box::new(write)))) }
    }

    /// Encode and send one message as a single line.
    ///
    /// An encoding failure leaves the connection usable. A write failure
    /// marks it closed; every later send fails with
    /// [`ConnectionError::Closed`].
    pub async fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        let line = message.encode()?;
        self.write_line(&line).await
    }

    /// Send an already encoded line. The newline is appended here.
    pub async fn send_line(&self, line: &str) -> Result<(), ConnectionError> {
        if line.contains(['\n', '\r']) {
            return Err(ConnectionError::EmbeddedNewline);
        }
        self.write_line(line).await
    }

    async fn write_line(&self, line: &str) -> Result<(), ConnectionError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(ConnectionError::Closed)?;

        let result = match sink.write_all(&buf).await {
            Ok(()) => sink.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::debug!(error = %e, "write failed, closing writer");
            *guard = None;
            return Err(e.into());
        }

        tracing::trace!(line, "sent line");
        Ok(())
    }

    /// Flush and close the write half. Idempotent.
    pub async fn shutdown(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.shutdown().await {
                tracing::debug!(error = %e, "shutdown of write half failed");
            }
        }
    }

    /// Whether the writer has been shut down or has failed.
    pub async fn is_closed(&self) -> bool {
        self.sink.lock().await.is_none()
    }
}
