mod http_connection;
pub(crate) mod writer;

pub use http_connection::HttpConnection;
