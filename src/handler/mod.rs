use crate::protocol::{Request, ResponseWriter};
use async_trait::async_trait;

/// The application entry point: one call per request.
///
/// The handler reads the request (including its body, if it cares) and
/// writes the response through the writer. Status code and headers can be
/// changed until the first payload byte leaves the response buffer; after
/// the handler returns, the connection finalizes whatever was written.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve_http(&self, response: &mut ResponseWriter, request: &mut Request<'_>);
}
