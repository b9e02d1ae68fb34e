//! Request line and header block decoding.
//!
//! Parsing is delegated to `httparse`; the decoder maps the result into the
//! crate's [`RequestHead`] and decides how the body that follows is framed.
//! The whole header phase of one request is capped at 1 MiB, checked both
//! while the head is still accumulating and once it is complete.

use crate::ensure;
use crate::protocol::{Header, ParseError, PayloadSize, RequestHead};
use bytes::{Buf, BytesMut};
use http::{Method, Uri, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

const MAX_HEADER_NUM: usize = 64;
pub(crate) const MAX_HEADER_BYTES: usize = 1024 * 1024;

pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let parsed = req.parse(src).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        match parsed {
            Status::Complete(head_end) => {
                trace!(head_size = head_end, "parsed request head");
                ensure!(head_end <= MAX_HEADER_BYTES, ParseError::too_large_header(head_end, MAX_HEADER_BYTES));

                let method =
                    req.method.and_then(|m| m.parse::<Method>().ok()).ok_or(ParseError::InvalidMethod)?;
                let request_uri = req.path.ok_or(ParseError::InvalidUri)?.to_string();
                let uri = request_uri.parse::<Uri>().map_err(|_| ParseError::InvalidUri)?;
                let version = match req.version {
                    Some(0) => Version::HTTP_10,
                    Some(1) => Version::HTTP_11,
                    v => return Err(ParseError::invalid_header(format!("unsupported http version: {v:?}"))),
                };

                let mut header = Header::new();
                for h in req.headers.iter() {
                    // a header whose value is empty is not stored
                    if h.value.is_empty() {
                        continue;
                    }
                    header.append(h.name, String::from_utf8_lossy(h.value).into_owned());
                }

                let head = RequestHead::new(method, uri, request_uri, version, header);
                let payload_size = parse_payload_size(&head);

                src.advance(head_end);
                Ok(Some((head, payload_size)))
            }
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                Ok(None)
            }
        }
    }
}

/// Decides the body framing for a parsed head.
///
/// Only POST and PUT requests carry a body. Transfer-Encoding wins over
/// Content-Length when both are present; a Content-Length that does not
/// parse as a non-negative integer means no body.
fn parse_payload_size(head: &RequestHead) -> PayloadSize {
    if head.method() != Method::POST && head.method() != Method::PUT {
        return PayloadSize::Empty;
    }

    if head.headers().get("Transfer-Encoding") == Some("chunked") {
        return PayloadSize::Chunked;
    }

    match head.headers().get("Content-Length").and_then(|value| value.trim().parse::<u64>().ok()) {
        Some(length) => PayloadSize::Length(length),
        None => PayloadSize::Empty,
    }
}
