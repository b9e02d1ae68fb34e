//! The handler-facing request body.
//!
//! [`ReqBody`] is a pull handle over the connection's framed reader for the
//! request currently being served. It yields exactly the framed body bytes
//! and nothing beyond them; once the framing reports end-of-body the handle
//! stays at EOF and never touches socket bytes that belong to the next
//! request.
//!
//! The handle also owns the deferred 100-continue duty: when the request
//! carried `Expect: 100-continue`, the interim response is written to the
//! connection the moment the handler performs its first body read, and
//! never again.

use crate::codec::RequestDecoder;
use crate::connection::writer::SharedWriter;
use crate::protocol::{Message, ParseError, PayloadItem};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::io;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::info;

/// The stream of payload items for the request at the front of a
/// connection's shared read buffer.
#[async_trait]
pub(crate) trait PayloadSource: Send {
    async fn next_payload(&mut self) -> Result<PayloadItem, ParseError>;
}

#[async_trait]
impl<R> PayloadSource for FramedRead<R, RequestDecoder>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_payload(&mut self) -> Result<PayloadItem, ParseError> {
        match self.next().await {
            Some(Ok(Message::Payload(item))) => Ok(item),
            Some(Ok(Message::Header(_))) => {
                Err(ParseError::invalid_body("expected body bytes, got a request head"))
            }
            Some(Err(e)) => Err(e),
            None => Err(ParseError::io(io::Error::from(io::ErrorKind::UnexpectedEof))),
        }
    }
}

pub struct ReqBody<'conn> {
    source: &'conn mut dyn PayloadSource,
    writer: SharedWriter,
    needs_continue: bool,
    eof: bool,
}

impl<'conn> ReqBody<'conn> {
    pub(crate) fn new(source: &'conn mut dyn PayloadSource, writer: SharedWriter, needs_continue: bool) -> Self {
        Self { source, writer, needs_continue, eof: false }
    }

    /// Returns the next piece of the body, or `None` once the framed end of
    /// the body has been reached.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, ParseError> {
        if self.eof {
            return Ok(None);
        }
        if self.needs_continue {
            self.write_continue().await?;
        }
        match self.source.next_payload().await? {
            PayloadItem::Chunk(bytes) => Ok(Some(bytes)),
            PayloadItem::Eof => {
                self.eof = true;
                Ok(None)
            }
        }
    }

    /// Reads the remainder of the body into one buffer.
    pub async fn bytes(&mut self) -> Result<Bytes, ParseError> {
        let mut data = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data.freeze())
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub(crate) fn continue_pending(&self) -> bool {
        self.needs_continue
    }

    /// Consumes whatever the handler left unread, so the next request on
    /// the connection starts at the right buffer position. Draining never
    /// triggers the interim response.
    pub(crate) async fn drain(&mut self) -> Result<(), ParseError> {
        self.needs_continue = false;
        while self.chunk().await?.is_some() {}
        Ok(())
    }

    async fn write_continue(&mut self) -> Result<(), ParseError> {
        self.needs_continue = false;
        let mut writer = self.writer.lock().await;
        writer.write(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(ParseError::io)?;
        writer.flush().await.map_err(ParseError::io)?;
        info!("sent 100 continue before first body read");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::connection::writer::ConnWriter;
    use std::collections::VecDeque;
    use tokio::io::AsyncReadExt;

    /// An in-memory payload source for driving body and multipart tests.
    pub(crate) struct StubSource {
        items: VecDeque<PayloadItem>,
    }

    impl StubSource {
        pub(crate) fn new<I>(chunks: I) -> Self
        where
            I: IntoIterator<Item = &'static [u8]>,
        {
            let items = chunks.into_iter().map(|c| PayloadItem::Chunk(Bytes::from_static(c))).collect();
            Self { items }
        }

        pub(crate) fn from_bytes(chunks: Vec<Bytes>) -> Self {
            Self { items: chunks.into_iter().map(PayloadItem::Chunk).collect() }
        }
    }

    #[async_trait]
    impl PayloadSource for StubSource {
        async fn next_payload(&mut self) -> Result<PayloadItem, ParseError> {
            Ok(self.items.pop_front().unwrap_or(PayloadItem::Eof))
        }
    }

    pub(crate) fn sink_writer() -> SharedWriter {
        ConnWriter::shared(tokio::io::sink())
    }

    #[tokio::test]
    async fn yields_chunks_then_eof() {
        let mut source = StubSource::new([b"abc".as_slice(), b"def".as_slice()]);
        let mut body = ReqBody::new(&mut source, sink_writer(), false);

        assert_eq!(body.chunk().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(body.chunk().await.unwrap().unwrap(), Bytes::from_static(b"def"));
        assert!(body.chunk().await.unwrap().is_none());
        assert!(body.is_eof());
        // stays at EOF
        assert!(body.chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn collects_all_bytes() {
        let mut source = StubSource::new([b"hello, ".as_slice(), b"world".as_slice()]);
        let mut body = ReqBody::new(&mut source, sink_writer(), false);
        assert_eq!(body.bytes().await.unwrap(), Bytes::from_static(b"hello, world"));
    }

    #[tokio::test]
    async fn continue_is_written_once_on_first_read() {
        let (mut client, server) = tokio::io::duplex(4096);
        let writer = ConnWriter::shared(server);

        let mut source = StubSource::new([b"abc".as_slice()]);
        let mut body = ReqBody::new(&mut source, writer.clone(), true);

        assert_eq!(body.chunk().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert!(body.chunk().await.unwrap().is_none());

        drop(body);
        drop(writer);

        let mut on_wire = Vec::new();
        client.read_to_end(&mut on_wire).await.unwrap();
        assert_eq!(&on_wire[..], b"HTTP/1.1 100 Continue\r\n\r\n");
    }

    #[tokio::test]
    async fn drain_never_writes_continue() {
        let (mut client, server) = tokio::io::duplex(4096);
        let writer = ConnWriter::shared(server);

        let mut source = StubSource::new([b"unread body".as_slice()]);
        let mut body = ReqBody::new(&mut source, writer.clone(), true);

        body.drain().await.unwrap();
        assert!(body.is_eof());

        drop(body);
        drop(writer);

        let mut on_wire = Vec::new();
        client.read_to_end(&mut on_wire).await.unwrap();
        assert!(on_wire.is_empty());
    }
}
