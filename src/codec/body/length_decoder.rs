//! Decoder for bodies bounded by a Content-Length value.

use std::cmp;

use crate::protocol::{ParseError, PayloadItem};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Yields exactly `length` payload bytes from the shared read buffer, then
/// the end-of-body marker, leaving any following bytes positioned for the
/// next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    length: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.length == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let len = cmp::min(self.length, src.len() as u64);
        let bytes = src.split_to(len as usize).freeze();

        self.length -= bytes.len() as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_length() {
        let mut buffer = BytesMut::from(&b"1012345678GET /next HTTP/1.1"[..]);

        let mut decoder = LengthDecoder::new(10);

        let payload = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&payload.as_bytes().unwrap()[..], b"1012345678");

        let eof = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(eof.is_eof());

        assert_eq!(&buffer[..], b"GET /next HTTP/1.1");
    }

    #[test]
    fn accumulates_partial_reads() {
        let mut decoder = LengthDecoder::new(8);

        let mut buffer = BytesMut::from(&b"abc"[..]);
        let payload = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&payload.as_bytes().unwrap()[..], b"abc");

        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"defgh");
        let payload = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&payload.as_bytes().unwrap()[..], b"defgh");

        let eof = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(eof.is_eof());
    }

    #[test]
    fn zero_length_is_immediately_eof() {
        let mut buffer = BytesMut::from(&b"leftover"[..]);
        let eof = LengthDecoder::new(0).decode(&mut buffer).unwrap().unwrap();
        assert!(eof.is_eof());
        assert_eq!(&buffer[..], b"leftover");
    }
}
