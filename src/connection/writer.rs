//! The connection's outer write buffer.
//!
//! One [`ConnWriter`] sits in front of each socket's write half. It is
//! shared between the response writer (header block, payload frames) and
//! the request body (the 100-continue preface), which is why it lives
//! behind an `Arc<Mutex<_>>`: both sides belong to the same task, so the
//! lock is never contended, it only satisfies the borrow checker.

use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

pub(crate) const WRITE_BUF_SIZE: usize = 4096;

pub(crate) type SharedWriter = Arc<Mutex<ConnWriter>>;

pub(crate) struct ConnWriter {
    io: Box<dyn AsyncWrite + Send + Unpin>,
    buf: BytesMut,
}

impl ConnWriter {
    pub(crate) fn shared<W>(io: W) -> SharedWriter
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Mutex::new(Self { io: Box::new(io), buf: BytesMut::with_capacity(WRITE_BUF_SIZE) }))
    }

    /// Buffers `data`, writing out to the socket once a full buffer has
    /// accumulated.
    pub(crate) async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= WRITE_BUF_SIZE {
            self.write_out().await?;
        }
        Ok(())
    }

    /// Empties the buffer into the socket and flushes it.
    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.write_out().await?;
        self.io.flush().await
    }

    async fn write_out(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let bytes = self.buf.split();
            self.io.write_all(&bytes).await?;
        }
        Ok(())
    }
}
