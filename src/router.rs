//! Path-to-handler routing.
//!
//! Lookup is by exact path. When that misses and the path ends with a
//! slash (and is longer than one character), a second lookup runs with the
//! trailing slash removed; no redirect is emitted. Unmatched paths get a
//! plain 404.

use crate::handler::Handler;
use crate::protocol::{Request, ResponseWriter};
use async_trait::async_trait;
use http::StatusCode;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Box<dyn Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `pattern`. A later registration for the
    /// same pattern replaces the earlier one.
    pub fn handle(&mut self, pattern: impl Into<String>, handler: impl Handler + 'static) {
        self.routes.insert(pattern.into(), Box::new(handler));
    }

    fn find(&self, path: &str) -> Option<&dyn Handler> {
        if let Some(handler) = self.routes.get(path) {
            return Some(&**handler);
        }
        if path.len() > 1 && path.ends_with('/') {
            return self.routes.get(&path[..path.len() - 1]).map(|handler| &**handler);
        }
        None
    }
}

#[async_trait]
impl Handler for Router {
    async fn serve_http(&self, response: &mut ResponseWriter, request: &mut Request<'_>) {
        let path = request.uri().path().to_string();
        match self.find(&path) {
            Some(handler) => handler.serve_http(response, request).await,
            None => {
                debug!(path = %path, "no route matched");
                response.set_status(StatusCode::NOT_FOUND);
                let _ = response.write(b"404 page not found\n").await;
            }
        }
    }
}
