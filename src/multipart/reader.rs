//! Streaming multipart/form-data reader.
//!
//! [`MultipartReader`] borrows the request body for its lifetime and feeds
//! every part from one internal fill buffer; [`Part`] borrows the reader,
//! so at most one part is live at a time and parts are consumed strictly
//! in order. A part that is dropped half-read is drained by the next
//! `next_part` call.
//!
//! Part reads follow a peek-and-search discipline: the buffer is filled to
//! its 4 KiB window, searched for `\r\n--boundary`, and while no boundary
//! is visible a part may only hand out the window minus the delimiter
//! length. That holdback is what keeps a delimiter straddling two fills
//! from leaking into part data.

use crate::protocol::body::ReqBody;
use crate::protocol::{Header, MultipartError};
use crate::utils::{find_crlf, find_subslice};
use bytes::{Buf, Bytes, BytesMut};
use std::cmp;

/// Size of the fill buffer, and the peek window for boundary detection.
const PEEK_BUF_SIZE: usize = 4096;

const MAX_PART_HEADER_NUM: usize = 32;

pub struct MultipartReader<'r, 'conn> {
    body: &'r mut ReqBody<'conn>,
    buf: BytesMut,
    /// The underlying body has reported end-of-stream; only buffered bytes
    /// remain
    eof: bool,

    /// `\r\n--boundary--`; the other delimiter forms are views into it
    delimiter: Vec<u8>,

    /// A part has been handed out and its bytes not yet fully consumed
    part_open: bool,
    /// Once the closing delimiter of the current part has been located in
    /// the buffer, the number of part bytes still to serve. All reads go
    /// through this when set.
    substitute: Option<usize>,
}

impl<'r, 'conn> MultipartReader<'r, 'conn> {
    pub fn new(body: &'r mut ReqBody<'conn>, boundary: &str) -> Self {
        let delimiter = format!("\r\n--{boundary}--").into_bytes();
        Self {
            body,
            buf: BytesMut::with_capacity(PEEK_BUF_SIZE),
            eof: false,
            delimiter,
            part_open: false,
            substitute: None,
        }
    }

    /// `\r\n--boundary`
    fn crlf_dash_boundary(&self) -> &[u8] {
        &self.delimiter[..self.delimiter.len() - 2]
    }

    /// `--boundary`
    fn dash_boundary(&self) -> &[u8] {
        &self.delimiter[2..self.delimiter.len() - 2]
    }

    /// `--boundary--`
    fn dash_boundary_dash(&self) -> &[u8] {
        &self.delimiter[2..]
    }

    /// Advances to the next part, draining whatever is left of the current
    /// one. Returns `None` after the terminating `--boundary--` line.
    pub async fn next_part(&mut self) -> Result<Option<Part<'_, 'r, 'conn>>, MultipartError> {
        if self.part_open {
            self.close_current().await?;
            self.discard_crlf().await?;
        }

        let line = self.read_line().await?;
        if &line[..] == self.dash_boundary_dash() {
            return Ok(None);
        }
        if &line[..] != self.dash_boundary() {
            return Err(MultipartError::want_delimiter(self.dash_boundary(), &line));
        }

        let headers = self.read_part_headers().await?;
        self.part_open = true;
        self.substitute = None;
        Ok(Some(Part::new(self, headers)))
    }

    /// Serves the next slice of the current part, or `None` at the part's
    /// end. The delimiter itself is never served; it stays buffered for
    /// `next_part`.
    pub(crate) async fn read_part_chunk(&mut self) -> Result<Option<Bytes>, MultipartError> {
        loop {
            if let Some(remaining) = self.substitute {
                if remaining == 0 {
                    return Ok(None);
                }
                // located part bytes are always already buffered
                let len = cmp::min(remaining, self.buf.len());
                let bytes = self.buf.split_to(len).freeze();
                self.substitute = Some(remaining - len);
                return Ok(Some(bytes));
            }

            if !self.eof {
                self.fill(PEEK_BUF_SIZE).await?;
            }

            match find_subslice(&self.buf, self.crlf_dash_boundary()) {
                Some(offset) => {
                    // everything up to the delimiter belongs to this part
                    self.substitute = Some(offset);
                }
                None if self.eof => {
                    // truncated message: the client went away mid-part
                    self.substitute = Some(0);
                }
                None => {
                    // no delimiter in the window; the last delimiter-length
                    // bytes may still turn out to start one
                    let holdback = self.crlf_dash_boundary().len();
                    if self.buf.len() <= holdback {
                        // a boundary longer than the window: widen it until
                        // the holdback leaves bytes to serve
                        self.fill(holdback + PEEK_BUF_SIZE).await?;
                        continue;
                    }
                    let safe = self.buf.len() - holdback;
                    let bytes = self.buf.split_to(safe).freeze();
                    return Ok(Some(bytes));
                }
            }
        }
    }

    async fn close_current(&mut self) -> Result<(), MultipartError> {
        while self.read_part_chunk().await?.is_some() {}
        self.part_open = false;
        Ok(())
    }

    /// Reads the body until `target` bytes are buffered or it ends.
    async fn fill(&mut self, target: usize) -> Result<(), MultipartError> {
        while !self.eof && self.buf.len() < target {
            match self.body.chunk().await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => self.eof = true,
            }
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Bytes, MultipartError> {
        loop {
            if let Some(offset) = find_crlf(&self.buf) {
                let line = self.buf.split_to(offset).freeze();
                self.buf.advance(2);
                return Ok(line);
            }
            if self.eof {
                return Err(MultipartError::UnexpectedEof);
            }
            let target = self.buf.len() + PEEK_BUF_SIZE;
            self.fill(target).await?;
        }
    }

    async fn discard_crlf(&mut self) -> Result<(), MultipartError> {
        self.fill(2).await?;
        if self.buf.len() < 2 {
            return Err(MultipartError::UnexpectedEof);
        }
        let crlf = self.buf.split_to(2);
        if &crlf[..] != b"\r\n" {
            return Err(MultipartError::expect_crlf(&crlf));
        }
        Ok(())
    }

    async fn read_part_headers(&mut self) -> Result<Header, MultipartError> {
        loop {
            if let Some((consumed, headers)) = try_parse_part_headers(&self.buf)? {
                self.buf.advance(consumed);
                return Ok(headers);
            }
            if self.eof {
                return Err(MultipartError::UnexpectedEof);
            }
            let target = self.buf.len() + PEEK_BUF_SIZE;
            self.fill(target).await?;
        }
    }
}

fn try_parse_part_headers(buf: &[u8]) -> Result<Option<(usize, Header)>, MultipartError> {
    let mut parsed = [httparse::EMPTY_HEADER; MAX_PART_HEADER_NUM];
    match httparse::parse_headers(buf, &mut parsed) {
        Ok(httparse::Status::Complete((consumed, raw_headers))) => {
            let mut headers = Header::new();
            for h in raw_headers {
                if h.value.is_empty() {
                    continue;
                }
                headers.append(h.name, String::from_utf8_lossy(h.value).into_owned());
            }
            Ok(Some((consumed, headers)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(MultipartError::invalid_header(e.to_string())),
    }
}

/// One part of a multipart body. Lives no longer than the reader that
/// produced it.
pub struct Part<'m, 'r, 'conn> {
    reader: &'m mut MultipartReader<'r, 'conn>,
    headers: Header,
    disposition_parsed: bool,
    form_name: String,
    file_name: String,
}

impl<'m, 'r, 'conn> std::fmt::Debug for Part<'m, 'r, 'conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("headers", &self.headers)
            .field("disposition_parsed", &self.disposition_parsed)
            .field("form_name", &self.form_name)
            .field("file_name", &self.file_name)
            .finish()
    }
}

impl<'m, 'r, 'conn> Part<'m, 'r, 'conn> {
    fn new(reader: &'m mut MultipartReader<'r, 'conn>, headers: Header) -> Self {
        Self { reader, headers, disposition_parsed: false, form_name: String::new(), file_name: String::new() }
    }

    pub fn headers(&self) -> &Header {
        &self.headers
    }

    /// The `name` parameter of Content-Disposition, empty when absent.
    pub fn form_name(&mut self) -> &str {
        self.parse_disposition();
        &self.form_name
    }

    /// The `filename` parameter of Content-Disposition, empty when absent.
    pub fn file_name(&mut self) -> &str {
        self.parse_disposition();
        &self.file_name
    }

    /// The next slice of this part's payload, `None` at its end.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, MultipartError> {
        self.reader.read_part_chunk().await
    }

    /// Reads the remainder of this part into one buffer.
    pub async fn bytes(&mut self) -> Result<Bytes, MultipartError> {
        let mut data = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data.freeze())
    }

    fn parse_disposition(&mut self) {
        if self.disposition_parsed {
            return;
        }
        self.disposition_parsed = true;

        let disposition = self.headers.get("Content-Disposition").unwrap_or("");
        let mut segments = disposition.split(';');
        match segments.next() {
            Some(first) if first.trim().eq_ignore_ascii_case("form-data") => {}
            _ => return,
        }

        for segment in segments {
            if let Some((name, value)) = segment.split_once('=') {
                let value = value.trim().trim_matches('"');
                match name.trim() {
                    "name" => self.form_name = value.to_string(),
                    "filename" => self.file_name = value.to_string(),
                    _ => {}
                }
            }
        }
    }
}
