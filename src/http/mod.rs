//! HTTP wire format.
//!
//! The gateway speaks a minimal subset of HTTP/1.x:
//!
//! ```text
//! Request:  GET /<key> HTTP/1.x\r\n<headers>\r\n
//! Response: HTTP/1.0 200 OK\r\n
//!           Content-Length: <n>\r\n
//!           Content-Type: image/jpeg\r\n
//!           \r\n
//!           <n bytes of value>
//! ```
//!
//! One request per connection. On failure the connection is closed without a
//! response, unless [`FailurePolicy::Status`] is configured.

pub mod parser;
pub mod response;

pub use parser::{parse_request, Header, ParseError, ParsedRequest, MAX_HEADERS, MAX_REQUEST_SIZE};
pub use response::{write_response, write_status, Status};

/// What a failed request sees on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Close the connection with zero bytes written.
    #[default]
    Close,
    /// Send `400 Bad Request` or `404 Not Found` before closing.
    Status,
}
