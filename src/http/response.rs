//! HTTP/1.0 response writer.

use bytes::BytesMut;
use std::io::{self, Write};

/// Status lines the gateway can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
}

impl Status {
    fn status_line(self) -> &'static [u8] {
        match self {
            Status::Ok => b"HTTP/1.0 200 OK\r\n",
            Status::BadRequest => b"HTTP/1.0 400 Bad Request\r\n",
            Status::NotFound => b"HTTP/1.0 404 Not Found\r\n",
        }
    }
}

/// Write a `200 OK` response carrying `body`.
///
/// Headers are written in a fixed order: `Content-Length`, then
/// `Content-Type`, then the blank line and the raw body bytes.
pub fn write_response<W: Write>(stream: &mut W, content_type: &str, body: &[u8]) -> io::Result<()> {
    let mut head = BytesMut::with_capacity(64 + content_type.len());
    head.extend_from_slice(Status::Ok.status_line());
    head.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    head.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());

    stream.write_all(&head)?;
    stream.write_all(body)?;
    stream.flush()
}

/// Write an empty-bodied error response.
pub fn write_status<W: Write>(stream: &mut W, status: Status) -> io::Result<()> {
    let mut head = BytesMut::with_capacity(64);
    head.extend_from_slice(status.status_line());
    head.extend_from_slice(b"Content-Length: 0\r\n\r\n");

    stream.write_all(&head)?;
    stream.flush()
}
