//! HTTP/1.x request parser.
//!
//! Parses a complete request head out of a single read buffer. Method and
//! path are returned as raw byte slices into the buffer; the path is the
//! exact run of bytes between the first and second space of the request
//! line, with no percent-decoding.

use thiserror::Error;

/// Largest request the gateway accepts, in bytes.
pub const MAX_REQUEST_SIZE: usize = 4096;

/// Maximum number of header lines in a request.
pub const MAX_HEADERS: usize = 32;

/// Errors that can occur while parsing a request head.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The buffer ends before the blank line terminating the head
    #[error("incomplete request")]
    Incomplete,

    #[error("malformed request line")]
    InvalidRequestLine,

    #[error("invalid method token")]
    InvalidMethod,

    #[error("invalid request path")]
    InvalidPath,

    #[error("unsupported protocol version")]
    InvalidVersion,

    #[error("malformed header line")]
    InvalidHeader,

    #[error("too many headers")]
    TooManyHeaders,
}

/// A single header line. Continuation lines carry an empty name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
}

/// A parsed request head borrowing from the read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest<'a> {
    pub method: &'a [u8],
    pub path: &'a [u8],
    /// `x` in `HTTP/1.x`
    pub minor_version: u8,
    pub headers: Vec<Header<'a>>,
    /// Bytes consumed up to and including the terminating blank line
    pub head_len: usize,
}

/// Parse a request head from `buf`.
pub fn parse_request(buf: &[u8]) -> Result<ParsedRequest<'_>, ParseError> {
    let mut pos = 0;

    // Tolerate empty lines ahead of the request line
    loop {
        match buf.get(pos..) {
            Some([b'\r', b'\n', ..]) => pos += 2,
            Some([b'\n', ..]) => pos += 1,
            _ => break,
        }
    }

    let (line, next) = next_line(buf, pos)?;
    let (method, path, minor_version) = parse_request_line(line)?;
    pos = next;

    let mut headers = Vec::new();
    loop {
        let (line, next) = next_line(buf, pos)?;
        pos = next;

        if line.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }
        headers.push(parse_header(line, headers.is_empty())?);
    }

    Ok(ParsedRequest {
        method,
        path,
        minor_version,
        headers,
        head_len: pos,
    })
}

/// Return the line starting at `pos` without its terminator, and the offset
/// just past the terminator. Accepts both `\r\n` and a bare `\n`.
fn next_line(buf: &[u8], pos: usize) -> Result<(&[u8], usize), ParseError> {
    let rest = buf.get(pos..).ok_or(ParseError::Incomplete)?;
    let lf = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(ParseError::Incomplete)?;

    let line = rest[..lf].strip_suffix(b"\r").unwrap_or(&rest[..lf]);
    Ok((line, pos + lf + 1))
}

fn parse_request_line(line: &[u8]) -> Result<(&[u8], &[u8], u8), ParseError> {
    let mut parts = line.splitn(3, |&b| b == b' ');
    let method = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let path = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let version = parts.next().ok_or(ParseError::InvalidRequestLine)?;

    if method.is_empty() || !method.iter().all(|&b| is_token(b)) {
        return Err(ParseError::InvalidMethod);
    }
    if path.is_empty() || !path.iter().all(|&b| is_path_byte(b)) {
        return Err(ParseError::InvalidPath);
    }

    let minor_version = match version {
        [b'H', b'T', b'T', b'P', b'/', b'1', b'.', minor] if minor.is_ascii_digit() => minor - b'0',
        _ => return Err(ParseError::InvalidVersion),
    };

    Ok((method, path, minor_version))
}

/// Parse one header line. A continuation line is only valid after a header.
fn parse_header(line: &[u8], first: bool) -> Result<Header<'_>, ParseError> {
    let (name, value) = if matches!(line.first(), Some(b' ' | b'\t')) {
        if first {
            return Err(ParseError::InvalidHeader);
        }
        (&line[..0], line)
    } else {
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::InvalidHeader)?;
        let name = &line[..colon];
        if name.is_empty() || !name.iter().all(|&b| is_token(b)) {
            return Err(ParseError::InvalidHeader);
        }
        (name, &line[colon + 1..])
    };

    if !value.iter().all(|&b| is_value_byte(b)) {
        return Err(ParseError::InvalidHeader);
    }

    Ok(Header {
        name,
        value: trim_whitespace(value),
    })
}

fn trim_whitespace(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

/// RFC 7230 `tchar`
fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn is_path_byte(b: u8) -> bool {
    b > b' ' && b != 0x7f
}

fn is_value_byte(b: u8) -> bool {
    b == b'\t' || (b >= b' ' && b != 0x7f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_get() {
        let req = parse_request(b"GET /a.jpg HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.method, b"GET");
        assert_eq!(req.path, b"/a.jpg");
        assert_eq!(req.minor_version, 0);
        assert!(req.headers.is_empty());
        assert_eq!(req.head_len, 23);
    }

    #[test]
    fn test_parse_headers() {
        let buf = b"GET /image.jpg HTTP/1.1\r\nHost: localhost:6380\r\nAccept:  */* \r\nX-Empty:\r\n\r\n";
        let req = parse_request(buf).unwrap();
        assert_eq!(req.minor_version, 1);
        assert_eq!(
            req.headers,
            vec![
                Header { name: b"Host", value: b"localhost:6380" },
                Header { name: b"Accept", value: b"*/*" },
                Header { name: b"X-Empty", value: b"" },
            ]
        );
        assert_eq!(req.head_len, buf.len());
    }

    #[test]
    fn test_path_is_verbatim() {
        let req = parse_request(b"GET /a%20b/../c?x=1 HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.path, b"/a%20b/../c?x=1");

        let req = parse_request(b"GET key HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.path, b"key");
    }

    #[test]
    fn test_method_not_validated() {
        let req = parse_request(b"DELETE /a HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method, b"DELETE");
    }

    #[test]
    fn test_bare_lf_and_leading_blank_lines() {
        let req = parse_request(b"\r\n\nGET /a HTTP/1.1\nHost: x\n\n").unwrap();
        assert_eq!(req.path, b"/a");
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn test_continuation_line() {
        let req = parse_request(b"GET /a HTTP/1.1\r\nX-Long: one\r\n  two\r\n\r\n").unwrap();
        assert_eq!(req.headers[1], Header { name: b"", value: b"two" });
    }

    #[test]
    fn test_incomplete() {
        assert_eq!(parse_request(b""), Err(ParseError::Incomplete));
        assert_eq!(parse_request(b"GET /a HTTP/1.0"), Err(ParseError::Incomplete));
        assert_eq!(parse_request(b"GET /a HTTP/1.0\r\n"), Err(ParseError::Incomplete));
        assert_eq!(
            parse_request(b"GET /a HTTP/1.0\r\nHost: x\r\n"),
            Err(ParseError::Incomplete)
        );
    }

    #[test]
    fn test_malformed_request_line() {
        assert_eq!(parse_request(b"GET\r\n\r\n"), Err(ParseError::InvalidRequestLine));
        assert_eq!(parse_request(b"GET /a\r\n\r\n"), Err(ParseError::InvalidRequestLine));
        assert_eq!(parse_request(b" /a HTTP/1.0\r\n\r\n"), Err(ParseError::InvalidMethod));
        assert_eq!(parse_request(b"G(T /a HTTP/1.0\r\n\r\n"), Err(ParseError::InvalidMethod));
        assert_eq!(parse_request(b"GET  HTTP/1.0\r\n\r\n"), Err(ParseError::InvalidPath));
    }

    #[test]
    fn test_bad_version() {
        for line in [
            &b"GET /a HTTP/2.0\r\n\r\n"[..],
            b"GET /a HTTP/1.x\r\n\r\n",
            b"GET /a HTTP/1.10\r\n\r\n",
            b"GET /a FTP/1.0\r\n\r\n",
            b"GET /a \r\n\r\n",
        ] {
            assert_eq!(parse_request(line), Err(ParseError::InvalidVersion));
        }
    }

    #[test]
    fn test_bad_header() {
        assert_eq!(
            parse_request(b"GET /a HTTP/1.0\r\nNoColon\r\n\r\n"),
            Err(ParseError::InvalidHeader)
        );
        assert_eq!(
            parse_request(b"GET /a HTTP/1.0\r\n: value\r\n\r\n"),
            Err(ParseError::InvalidHeader)
        );
        assert_eq!(
            parse_request(b"GET /a HTTP/1.0\r\nBad Name: value\r\n\r\n"),
            Err(ParseError::InvalidHeader)
        );
        // Folded line with nothing to continue
        assert_eq!(
            parse_request(b"GET /a HTTP/1.0\r\n  folded\r\n\r\n"),
            Err(ParseError::InvalidHeader)
        );
        assert_eq!(
            parse_request(b"GET /a HTTP/1.0\r\n\tfolded\r\nHost: x\r\n\r\n"),
            Err(ParseError::InvalidHeader)
        );
    }

    #[test]
    fn test_header_limit() {
        let mut buf = b"GET /a HTTP/1.1\r\n".to_vec();
        for i in 0..MAX_HEADERS {
            buf.extend_from_slice(format!("X-{i}: v\r\n").as_bytes());
        }
        let mut at_limit = buf.clone();
        at_limit.extend_from_slice(b"\r\n");
        assert_eq!(parse_request(&at_limit).unwrap().headers.len(), MAX_HEADERS);

        buf.extend_from_slice(b"X-Extra: v\r\n\r\n");
        assert_eq!(parse_request(&buf), Err(ParseError::TooManyHeaders));
    }
}
