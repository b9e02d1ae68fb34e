//! The handler-facing response writer.
//!
//! Handler writes land in a fixed 4 KiB buffer. The wire framing is decided
//! lazily, at the moment bytes first leave that buffer: when the handler
//! finished without overflowing it, the response gets a Content-Length and
//! goes out in one piece; when the buffer overflows while the handler is
//! still running, the response switches to chunked transfer encoding and
//! streams. Headers set explicitly by the handler always win.
//!
//! Write path: handler -> inner buffer -> chunk writer -> the connection's
//! outer buffered writer -> socket.

use crate::connection::writer::SharedWriter;
use crate::protocol::{Header, SendError};
use crate::utils::detect_content_type;
use bytes::{BufMut, BytesMut};
use http::{StatusCode, Version};
use tracing::trace;

/// Capacity of the inner buffer; also the threshold between Content-Length
/// and chunked framing when the handler does not choose one itself.
pub(crate) const RESPONSE_BUF_SIZE: usize = 4096;

const INIT_HEAD_SIZE: usize = 4 * 1024;

pub struct ResponseWriter {
    writer: SharedWriter,
    version: Version,

    header: Header,
    status: StatusCode,
    /// `set_status` has been called; later calls are ignored
    status_set: bool,

    /// The chunk writer has fired and the head is on the wire
    wrote: bool,
    chunking: bool,
    handler_done: bool,
    close_after_reply: bool,
    write_failed: bool,

    buf: BytesMut,
}

impl ResponseWriter {
    pub(crate) fn new(writer: SharedWriter, version: Version, close_after_reply: bool) -> Self {
        Self {
            writer,
            version,
            header: Header::new(),
            status: StatusCode::OK,
            status_set: false,
            wrote: false,
            chunking: false,
            handler_done: false,
            close_after_reply,
            write_failed: false,
            buf: BytesMut::with_capacity(RESPONSE_BUF_SIZE),
        }
    }

    /// Response headers, mutable until the head reaches the wire. Changes
    /// made after that are silently without effect.
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Sets the status code. Only the first call takes effect.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.status_set {
            return;
        }
        self.status = status;
        self.status_set = true;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Writes response payload bytes through the inner buffer.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), SendError> {
        if self.write_failed {
            return Err(SendError::invalid_write("write after connection failure"));
        }
        let result = self.buffer_write(data).await;
        if result.is_err() {
            self.write_failed = true;
            self.close_after_reply = true;
        }
        result
    }

    pub(crate) fn close_after_reply(&self) -> bool {
        self.close_after_reply
    }

    async fn buffer_write(&mut self, data: &[u8]) -> Result<(), SendError> {
        if self.buf.len() + data.len() <= RESPONSE_BUF_SIZE {
            self.buf.extend_from_slice(data);
            return Ok(());
        }

        // overflow: anything buffered goes out first, deciding the framing
        self.flush_buffered().await?;

        if data.len() >= RESPONSE_BUF_SIZE {
            // will never fit, bypass the buffer
            self.chunk_write(data).await
        } else {
            self.buf.extend_from_slice(data);
            Ok(())
        }
    }

    async fn flush_buffered(&mut self) -> Result<(), SendError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let bytes = self.buf.split();
        self.chunk_write(&bytes).await
    }

    /// The chunk writer. Its first invocation finalizes the head; after
    /// that every call frames one payload write.
    async fn chunk_write(&mut self, data: &[u8]) -> Result<(), SendError> {
        if !self.wrote {
            self.finalize_header(data);
            self.wrote = true;
            self.write_head().await?;
        }

        let mut writer = self.writer.lock().await;
        if self.chunking {
            let size_line = format!("{:X}\r\n", data.len());
            writer.write(size_line.as_bytes()).await.map_err(SendError::io)?;
        }
        writer.write(data).await.map_err(SendError::io)?;
        if self.chunking {
            writer.write(b"\r\n").await.map_err(SendError::io)?;
        }
        Ok(())
    }

    /// Fixes the wire framing from the state observed at the first chunk
    /// write. `data` is the payload that triggered it.
    fn finalize_header(&mut self, data: &[u8]) {
        if self.header.get("Content-Type").is_none() {
            self.header.set("Content-Type", detect_content_type(data));
        }

        if self.header.get("Content-Length").is_none() && self.header.get("Transfer-Encoding").is_none() {
            if self.handler_done {
                // triggered by the final flush: everything fit the buffer
                self.header.set("Content-Length", data.len().to_string());
            } else {
                // triggered by buffer overflow: the handler is still writing
                self.chunking = true;
                self.header.set("Transfer-Encoding", "chunked");
            }
            return;
        }

        if self.header.get("Transfer-Encoding") == Some("chunked") {
            self.chunking = true;
        }
    }

    /// Emits the status line, every header (first value only), and the
    /// terminating empty line into the outer writer.
    async fn write_head(&mut self) -> Result<(), SendError> {
        let mut dst = BytesMut::with_capacity(INIT_HEAD_SIZE);

        dst.put_slice(version_str(self.version).as_bytes());
        dst.put_slice(b" ");
        dst.put_slice(self.status.as_str().as_bytes());
        dst.put_slice(b" ");
        dst.put_slice(self.status.canonical_reason().unwrap_or("").as_bytes());
        dst.put_slice(b"\r\n");

        for (name, values) in self.header.iter() {
            if let Some(value) = values.first() {
                dst.put_slice(name.as_bytes());
                dst.put_slice(b": ");
                dst.put_slice(value.as_bytes());
                dst.put_slice(b"\r\n");
            }
        }
        dst.put_slice(b"\r\n");

        trace!(status = %self.status, chunking = self.chunking, "wrote response head");

        let mut writer = self.writer.lock().await;
        writer.write(&dst).await.map_err(SendError::io)
    }

    /// Completes the response after the handler has returned: flushes the
    /// inner buffer (which may fire the chunk writer for the first time),
    /// terminates chunked framing, emits a bare head for an empty response,
    /// and flushes the outer writer to the socket.
    pub(crate) async fn finish(&mut self) -> Result<(), SendError> {
        self.handler_done = true;

        self.flush_buffered().await?;

        if self.chunking {
            let mut writer = self.writer.lock().await;
            writer.write(b"0\r\n\r\n").await.map_err(SendError::io)?;
        }

        // the handler never wrote anything at all
        if !self.wrote {
            self.header.set("Content-Length", "0");
            self.wrote = true;
            self.write_head().await?;
        }

        let mut writer = self.writer.lock().await;
        writer.flush().await.map_err(SendError::io)
    }
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}
