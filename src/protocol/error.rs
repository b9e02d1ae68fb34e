//! Error types for the request and response pipelines.
//!
//! [`HttpError`] is the top-level error returned by the connection loop. It
//! wraps [`ParseError`] (anything that goes wrong while reading a request)
//! and [`SendError`] (anything that goes wrong while emitting a response).
//! Both terminate the connection: HTTP/1.1 has no in-band way to report
//! mid-stream framing corruption.
//!
//! [`MultipartError`] and [`FormError`] are handler-visible: they surface
//! through the form accessors on [`Request`](crate::protocol::Request)
//! instead of tearing the connection down.

use std::io;
use thiserror::Error;

/// The top-level error type for a connection.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Errors raised while parsing or draining a request
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    /// Errors raised while emitting a response
    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

/// Errors that occur while reading a request from the wire.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Header phase exceeded the per-request byte ceiling
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    /// Number of headers exceeds the maximum allowed
    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    /// Malformed request line or header line
    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    /// Invalid or unsupported HTTP method
    #[error("invalid http method")]
    InvalidMethod,

    /// Invalid request-URI
    #[error("invalid http uri")]
    InvalidUri,

    /// Invalid body framing, e.g. a bad chunk size line
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    /// I/O failure on the underlying socket
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_body<S: ToString>(reason: S) -> Self {
        Self::InvalidBody { reason: reason.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors that occur while emitting a response.
#[derive(Error, Debug)]
pub enum SendError {
    /// The response writer was used after the connection went away
    #[error("invalid write: {reason}")]
    InvalidWrite { reason: String },

    /// I/O failure on the underlying socket
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_write<S: ToString>(reason: S) -> Self {
        Self::InvalidWrite { reason: reason.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors raised by the multipart reader.
#[derive(Error, Debug)]
pub enum MultipartError {
    /// A boundary line did not match the declared delimiter
    #[error("want delimiter {want}, but got {got}")]
    WantDelimiter { want: String, got: String },

    /// The two bytes between a part and the next delimiter were not CRLF
    #[error("expect crlf, but got {got}")]
    ExpectCrlf { got: String },

    /// Non-file form fields exceeded their total in-memory budget
    #[error("multipart: message too large")]
    MessageTooLarge,

    /// A part's header block failed to parse
    #[error("invalid part header: {reason}")]
    InvalidHeader { reason: String },

    /// The body ended in the middle of the multipart structure
    #[error("unexpected eof in multipart body")]
    UnexpectedEof,

    /// The underlying body reader failed
    #[error("read multipart body: {source}")]
    Body {
        #[from]
        source: ParseError,
    },

    /// Temp file creation or writing failed while spilling an upload
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl MultipartError {
    pub fn want_delimiter(want: &[u8], got: &[u8]) -> Self {
        Self::WantDelimiter {
            want: String::from_utf8_lossy(want).into_owned(),
            got: String::from_utf8_lossy(got).into_owned(),
        }
    }

    pub fn expect_crlf(got: &[u8]) -> Self {
        Self::ExpectCrlf { got: String::from_utf8_lossy(got).into_owned() }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }
}

/// Handler-visible errors from the form accessors.
///
/// Cloneable so a failed parse can be reported on every subsequent access,
/// the way the lazy form cache requires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    /// Form access on a request whose method carries no body
    #[error("missing form body")]
    MissingBody,

    /// The request content type is not a form encoding
    #[error("unsupported form type: {0}")]
    UnsupportedType(String),

    /// multipart/form-data without a boundary parameter
    #[error("no boundary detected")]
    NoBoundary,

    /// Non-file fields exceeded the in-memory budget
    #[error("multipart: message too large")]
    TooLarge,

    /// Lookup of a file field that is not present in the form
    #[error("missing multipart file")]
    MissingFile,

    /// Reading or parsing the form body failed
    #[error("parse form: {0}")]
    Failed(String),
}

impl From<MultipartError> for FormError {
    fn from(e: MultipartError) -> Self {
        match e {
            MultipartError::MessageTooLarge => FormError::TooLarge,
            other => FormError::Failed(other.to_string()),
        }
    }
}
