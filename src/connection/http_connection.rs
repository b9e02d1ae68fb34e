//! The per-connection serve loop.
//!
//! A connection owns the framed reader over the socket's read half and the
//! shared buffered writer over its write half. Requests are served
//! strictly in arrival order: parse a head, hand body and writer to the
//! handler, finalize the response, drain what the handler left unread,
//! then either loop for the next request or close.
//!
//! A panicking handler is caught here so the socket is still torn down in
//! an orderly way; parse failures close the connection without a response.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use http::Version;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tracing::{error, info, trace};

use crate::codec::RequestDecoder;
use crate::connection::writer::{ConnWriter, SharedWriter};
use crate::handler::Handler;
use crate::protocol::body::ReqBody;
use crate::protocol::{HttpError, Message, ParseError, PayloadSize, Request, RequestHead, ResponseWriter};

const READ_BUF_SIZE: usize = 4096;

pub struct HttpConnection<R> {
    framed_read: FramedRead<R, RequestDecoder>,
    writer: SharedWriter,
    remote_addr: String,
}

impl<R> HttpConnection<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new<W>(reader: R, writer: W, remote_addr: String) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), READ_BUF_SIZE),
            writer: ConnWriter::shared(writer),
            remote_addr,
        }
    }

    /// Serves requests until the peer goes away, an error tears the
    /// connection down, or an exchange asks for it to close.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        loop {
            let (head, payload_size) = match self.framed_read.next().await {
                Some(Ok(Message::Header(item))) => item,
                Some(Ok(Message::Payload(_))) => {
                    error!("received body bytes while awaiting a request head");
                    return Err(ParseError::invalid_body("need header while receive body").into());
                }
                Some(Err(e)) => {
                    error!("can't read next request, cause {}", e);
                    return Err(e.into());
                }
                None => {
                    info!("no more requests, connection closed");
                    return Ok(());
                }
            };

            if self.serve_one(head, payload_size, handler.as_ref()).await? {
                return Ok(());
            }
        }
    }

    /// Serves a single exchange. Returns true when the connection must
    /// close afterwards.
    async fn serve_one<H>(
        &mut self,
        head: RequestHead,
        payload_size: PayloadSize,
        handler: &H,
    ) -> Result<bool, HttpError>
    where
        H: Handler + ?Sized,
    {
        trace!(method = %head.method(), uri = %head.request_uri(), "serving request");

        let version = head.version();
        let close_requested = version != Version::HTTP_11 || head.headers().get("Connection") == Some("close");
        let expect_continue = !payload_size.is_empty() && head.headers().get("Expect") == Some("100-continue");

        let body = ReqBody::new(&mut self.framed_read, self.writer.clone(), expect_continue);
        let mut request = Request::new(head, body, self.remote_addr.clone());
        let mut response = ResponseWriter::new(self.writer.clone(), version, close_requested);

        let served = AssertUnwindSafe(handler.serve_http(&mut response, &mut request)).catch_unwind().await;
        if served.is_err() {
            error!("handler panicked, closing connection");
            return Ok(true);
        }

        finish_request(request, response).await
    }
}

/// Completes one exchange: temp file cleanup, response finalization, body
/// drain, close decision.
async fn finish_request(mut request: Request<'_>, mut response: ResponseWriter) -> Result<bool, HttpError> {
    if let Some(form) = request.take_multipart_form() {
        form.remove_all().await;
    }

    response.finish().await?;

    // A client that asked for 100-continue and was never answered may not
    // have sent the body at all; there is nothing safe to wait for.
    if request.continue_pending() {
        return Ok(true);
    }

    request.drain_body().await.map_err(HttpError::from)?;

    Ok(response.close_after_reply())
}
