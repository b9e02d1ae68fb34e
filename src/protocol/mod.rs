pub mod body;
mod error;
mod header;
mod message;
mod request;
mod response;

pub use body::ReqBody;
pub use error::{FormError, HttpError, MultipartError, ParseError, SendError};
pub use header::Header;
pub use message::{Message, PayloadItem, PayloadSize};
pub use request::{Request, RequestHead};
pub use response::ResponseWriter;
