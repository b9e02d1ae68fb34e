//! The parsed request and its derived views.
//!
//! [`RequestHead`] is what the header decoder produces; [`Request`] pairs
//! it with the body handle for the connection and derives the convenience
//! views on demand: query string, cookies, urlencoded and multipart forms.

use crate::multipart::{FileHeader, MultipartForm, MultipartReader};
use crate::protocol::body::ReqBody;
use crate::protocol::{FormError, Header, ParseError};
use http::{Method, Uri, Version};
use std::collections::HashMap;

/// The request line and header block of one request.
#[derive(Debug)]
pub struct RequestHead {
    method: Method,
    uri: Uri,
    request_uri: String,
    version: Version,
    headers: Header,
}

impl RequestHead {
    pub(crate) fn new(method: Method, uri: Uri, request_uri: String, version: Version, headers: Header) -> Self {
        Self { method, uri, request_uri, version, headers }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The request-URI exactly as it appeared on the request line.
    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Header {
        &self.headers
    }
}

pub struct Request<'conn> {
    head: RequestHead,
    body: ReqBody<'conn>,
    remote_addr: String,

    query: HashMap<String, String>,
    cookies: Option<HashMap<String, String>>,
    content_type: String,
    boundary: Option<String>,

    form_parsed: bool,
    post_form: HashMap<String, String>,
    multipart: Option<MultipartForm>,
    form_err: Option<FormError>,
}

impl<'conn> Request<'conn> {
    pub(crate) fn new(head: RequestHead, body: ReqBody<'conn>, remote_addr: String) -> Self {
        let query = head.uri().query().map(parse_query).unwrap_or_default();
        let (content_type, boundary) = parse_content_type(head.headers());
        Self {
            head,
            body,
            remote_addr,
            query,
            cookies: None,
            content_type,
            boundary,
            form_parsed: false,
            post_form: HashMap::new(),
            multipart: None,
            form_err: None,
        }
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    pub fn uri(&self) -> &Uri {
        self.head.uri()
    }

    pub fn request_uri(&self) -> &str {
        self.head.request_uri()
    }

    pub fn version(&self) -> Version {
        self.head.version()
    }

    pub fn headers(&self) -> &Header {
        self.head.headers()
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// The primary media type from Content-Type, without parameters.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The multipart boundary, when Content-Type declared one.
    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    /// Looks up a query string parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Looks up a cookie. Cookies are parsed from all `Cookie` headers on
    /// first access; duplicate names resolve to the last one seen.
    pub fn cookie(&mut self, name: &str) -> Option<&str> {
        if self.cookies.is_none() {
            self.cookies = Some(parse_cookies(self.head.headers()));
        }
        self.cookies.as_ref().and_then(|cookies| cookies.get(name)).map(String::as_str)
    }

    /// The request body. Yields exactly the framed body bytes.
    pub fn body_mut(&mut self) -> &mut ReqBody<'conn> {
        &mut self.body
    }

    /// Streaming access to a multipart body.
    pub fn multipart_reader(&mut self) -> Result<MultipartReader<'_, 'conn>, FormError> {
        let boundary = self.boundary.clone().ok_or(FormError::NoBoundary)?;
        Ok(MultipartReader::new(&mut self.body, &boundary))
    }

    /// Looks up a text form field, parsing the form on first access. Both
    /// urlencoded and multipart bodies feed this map.
    pub async fn form_value(&mut self, name: &str) -> Option<&str> {
        self.ensure_form_parsed().await;
        self.post_form.get(name).map(String::as_str)
    }

    /// The parsed multipart form, parsing it on first access.
    pub async fn multipart_form(&mut self) -> Result<&MultipartForm, FormError> {
        self.ensure_form_parsed().await;
        if let Some(err) = &self.form_err {
            return Err(err.clone());
        }
        self.multipart.as_ref().ok_or_else(|| FormError::UnsupportedType(self.content_type.clone()))
    }

    /// Looks up an uploaded file by form field name.
    pub async fn form_file(&mut self, name: &str) -> Result<&FileHeader, FormError> {
        self.ensure_form_parsed().await;
        if let Some(err) = &self.form_err {
            return Err(err.clone());
        }
        self.multipart.as_ref().and_then(|form| form.files.get(name)).ok_or(FormError::MissingFile)
    }

    pub(crate) fn take_multipart_form(&mut self) -> Option<MultipartForm> {
        self.multipart.take()
    }

    pub(crate) fn continue_pending(&self) -> bool {
        self.body.continue_pending()
    }

    pub(crate) async fn drain_body(&mut self) -> Result<(), ParseError> {
        self.body.drain().await
    }

    async fn ensure_form_parsed(&mut self) {
        if self.form_parsed {
            return;
        }
        self.form_parsed = true;
        if let Err(e) = self.parse_form().await {
            self.form_err = Some(e);
        }
    }

    async fn parse_form(&mut self) -> Result<(), FormError> {
        if self.head.method() != Method::POST && self.head.method() != Method::PUT {
            return Err(FormError::MissingBody);
        }

        match self.content_type.as_str() {
            "application/x-www-form-urlencoded" => {
                let data = self.body.bytes().await.map_err(|e| FormError::Failed(e.to_string()))?;
                self.post_form = parse_query(&String::from_utf8_lossy(&data));
                Ok(())
            }
            "multipart/form-data" => {
                let boundary = self.boundary.clone().ok_or(FormError::NoBoundary)?;
                let mut reader = MultipartReader::new(&mut self.body, &boundary);
                let form = reader.read_form().await?;
                self.post_form = form.values.clone();
                self.multipart = Some(form);
                Ok(())
            }
            other => Err(FormError::UnsupportedType(other.to_string())),
        }
    }
}

/// Splits a query (or urlencoded form body) into a map. Pieces without an
/// `=` are skipped; keys and values are whitespace-trimmed.
pub(crate) fn parse_query(raw: &str) -> HashMap<String, String> {
    let mut queries = HashMap::new();
    for piece in raw.split('&') {
        if let Some((name, value)) = piece.split_once('=') {
            queries.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    queries
}

/// Collects cookies from every `Cookie` header. Later values win.
fn parse_cookies(headers: &Header) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let Some(lines) = headers.get_all("Cookie") else {
        return cookies;
    };
    for line in lines {
        for piece in line.trim().split(';') {
            if let Some((name, value)) = piece.split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

/// Isolates the primary media type and, for multipart bodies, the declared
/// boundary parameter.
fn parse_content_type(headers: &Header) -> (String, Option<String>) {
    let Some(content_type) = headers.get("Content-Type") else {
        return (String::new(), None);
    };

    let Some((primary, params)) = content_type.split_once(';') else {
        return (content_type.trim().to_string(), None);
    };

    let mut boundary = None;
    for param in params.split(';') {
        if let Some((name, value)) = param.split_once('=') {
            if name.trim().eq_ignore_ascii_case("boundary") {
                boundary = Some(value.trim().trim_matches('"').to_string());
            }
        }
    }
    (primary.trim().to_string(), boundary)
}
