pub mod body;
mod header_decoder;
mod request_decoder;

pub use header_decoder::HeaderDecoder;
pub use request_decoder::RequestDecoder;
