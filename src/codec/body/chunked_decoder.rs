//! Decoder for chunked transfer encoding.
//!
//! The accepted grammar is strict: each chunk is `hex-size CRLF data CRLF`,
//! the size line holds hex digits and nothing else, and the zero-size chunk
//! terminates the body after its own CRLF. Chunk extensions and trailers
//! are rejected.

use crate::protocol::{ParseError, PayloadItem};
use crate::utils::find_crlf;
use bytes::{Buf, BytesMut};
use std::cmp;
use tokio_util::codec::Decoder;
use tracing::trace;
use ChunkedState::*;

/// State machine over the shared read buffer.
///
/// After a data chunk the decoder insists on an exact CRLF before the next
/// size line; anything else fails the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Awaiting a complete `hex-size CRLF` line
    Size,
    /// Reading chunk data, `remaining` bytes left
    Body,
    /// Awaiting the CRLF that closes a data chunk
    DataCrlf,
    /// Awaiting the CRLF that follows the zero-size chunk
    EndCrlf,
    /// Terminated, everything consumed
    End,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining: 0 }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                End => {
                    trace!("finished reading chunked body");
                    return Ok(Some(PayloadItem::Eof));
                }

                Size => {
                    let line_end = match find_crlf(src) {
                        Some(offset) => offset,
                        // size line not complete yet
                        None => return Ok(None),
                    };
                    let line = src.split_to(line_end);
                    src.advance(2);
                    self.remaining = parse_hex(&line)?;
                    self.state = if self.remaining == 0 { EndCrlf } else { Body };
                }

                Body => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let read_size = cmp::min(self.remaining, src.len() as u64) as usize;
                    let bytes = src.split_to(read_size).freeze();
                    self.remaining -= read_size as u64;
                    if self.remaining == 0 {
                        self.state = DataCrlf;
                    }
                    trace!(len = bytes.len(), "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                DataCrlf => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    consume_crlf(src)?;
                    self.state = Size;
                }

                EndCrlf => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    consume_crlf(src)?;
                    self.state = End;
                }
            }
        }
    }
}

fn consume_crlf(src: &mut BytesMut) -> Result<(), ParseError> {
    let cr = src.get_u8();
    let lf = src.get_u8();
    if cr != b'\r' || lf != b'\n' {
        return Err(ParseError::invalid_body("unsupported encoding format of chunk"));
    }
    Ok(())
}

fn parse_hex(line: &[u8]) -> Result<u64, ParseError> {
    let mut size: u64 = 0;
    for &b in line {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(ParseError::invalid_body("illegal hex number")),
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(digit as u64))
            .ok_or_else(|| ParseError::invalid_body("illegal hex number"))?;
    }
    Ok(size)
}
