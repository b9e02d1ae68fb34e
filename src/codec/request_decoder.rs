//! The per-connection request decoder.
//!
//! One [`RequestDecoder`] lives inside the connection's `FramedRead` and
//! alternates between two phases over the same buffer: parsing a request
//! head, then producing that request's payload until end-of-body. Because
//! both phases consume from one buffer in arrival order, the trailing bytes
//! of a pipelined request are already positioned for the next head once the
//! payload decoder reports EOF.

use crate::codec::body::PayloadDecoder;
use crate::codec::header_decoder::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { header_decoder: HeaderDecoder, payload_decoder: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // payload phase
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    // body finished, the next decode parses a request head
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        // header phase
        let message = match self.header_decoder.decode(src)? {
            Some((head, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((head, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}
