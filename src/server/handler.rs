//! Per-connection request handling.
//!
//! Each connection goes through `Reading -> Parsing -> LookingUp ->
//! Responding -> Closed`. Any failure before `Responding` skips straight to
//! `Closed`; there are no retries. The store lock is only taken inside
//! `LookingUp`, never across socket I/O.

use crate::config::ServerConfig;
use crate::http::{
    parse_request, write_response, write_status, FailurePolicy, ParseError, Status,
    MAX_REQUEST_SIZE,
};
use crate::server::accessor;
use crate::store::Store;
use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Ways a single request can fail. None of them affect other connections.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("failed reading from socket: {0}")]
    Read(#[source] io::Error),

    #[error("connection closed before a request arrived")]
    Closed,

    #[error("request is too long")]
    TooLarge,

    #[error("failed to parse request: {0}")]
    Parse(#[from] ParseError),

    #[error("key is either missing or of the wrong type")]
    KeyUnavailable,

    #[error("failed writing to socket: {0}")]
    Write(#[source] io::Error),
}

impl RequestError {
    /// Status sent under [`FailurePolicy::Status`], if the peer can still be answered.
    pub fn status(&self) -> Option<Status> {
        match self {
            RequestError::TooLarge | RequestError::Parse(_) => Some(Status::BadRequest),
            RequestError::KeyUnavailable => Some(Status::NotFound),
            RequestError::Read(_) | RequestError::Closed | RequestError::Write(_) => None,
        }
    }
}

/// Per-connection settings taken from the server configuration.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub content_type: String,
    pub failure_policy: FailurePolicy,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl From<&ServerConfig> for HandlerOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            content_type: config.content_type.clone(),
            failure_policy: config.failure_policy,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        }
    }
}

/// Serve one accepted TCP connection, then close it.
pub fn serve_connection<S: Store>(mut stream: TcpStream, store: &S, options: &HandlerOptions) {
    let peer = stream.peer_addr().ok();

    let deadlines = stream
        .set_read_timeout(options.read_timeout)
        .and_then(|_| stream.set_write_timeout(options.write_timeout));
    if let Err(e) = deadlines {
        warn!(peer = ?peer, error = %e, "Failed to set socket deadlines");
        return;
    }

    match handle_connection(&mut stream, store, options) {
        Ok(bytes) => debug!(peer = ?peer, bytes, "Request served"),
        Err(RequestError::Closed) => trace!(peer = ?peer, "Connection closed by client"),
        Err(e) => warn!(peer = ?peer, error = %e, "Request failed"),
    }
    // Dropping the stream closes the connection
}

/// Run the read/parse/lookup/respond pipeline on `stream`.
///
/// Returns the number of body bytes sent. On failure nothing is written
/// unless the failure policy asks for an error status.
pub fn handle_connection<T, S>(
    stream: &mut T,
    store: &S,
    options: &HandlerOptions,
) -> Result<usize, RequestError>
where
    T: Read + Write,
    S: Store,
{
    let result = respond(stream, store, options);

    if let Err(ref e) = result {
        if options.failure_policy == FailurePolicy::Status {
            if let Some(status) = e.status() {
                if let Err(write_err) = write_status(stream, status) {
                    trace!(error = %write_err, "Failed to send error status");
                }
            }
        }
    }

    result
}

fn respond<T, S>(stream: &mut T, store: &S, options: &HandlerOptions) -> Result<usize, RequestError>
where
    T: Read + Write,
    S: Store,
{
    // A single read must carry the whole request
    let mut buffer = [0u8; MAX_REQUEST_SIZE];
    let bytes_read = read_once(stream, &mut buffer).map_err(RequestError::Read)?;
    if bytes_read == 0 {
        return Err(RequestError::Closed);
    }
    if bytes_read == buffer.len() {
        return Err(RequestError::TooLarge);
    }

    let request = parse_request(&buffer[..bytes_read])?;
    trace!(
        method = %String::from_utf8_lossy(request.method),
        path = %String::from_utf8_lossy(request.path),
        version = request.minor_version,
        headers = request.headers.len(),
        "Request parsed"
    );

    let value = accessor::lookup(store, request.path)?;

    write_response(stream, &options.content_type, &value).map_err(RequestError::Write)?;
    Ok(value.len())
}

fn read_once<T: Read>(stream: &mut T, buffer: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buffer) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Entry, LockedStore, MemoryGuard, MemoryStore};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn options(failure_policy: FailurePolicy) -> HandlerOptions {
        HandlerOptions {
            content_type: "image/jpeg".to_string(),
            failure_policy,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// In-memory stream that fails the test if I/O happens under the store lock.
    struct CheckedStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        locked: Arc<AtomicBool>,
    }

    impl CheckedStream {
        fn new(input: &[u8], locked: Arc<AtomicBool>) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
                locked,
            }
        }
    }

    impl Read for CheckedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            assert!(!self.locked.load(Ordering::SeqCst), "read under store lock");
            self.input.read(buf)
        }
    }

    impl Write for CheckedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            assert!(!self.locked.load(Ordering::SeqCst), "write under store lock");
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            assert!(!self.locked.load(Ordering::SeqCst), "flush under store lock");
            Ok(())
        }
    }

    /// Store that records whether its lock is currently held.
    struct InstrumentedStore {
        inner: MemoryStore,
        locked: Arc<AtomicBool>,
    }

    struct InstrumentedGuard<'a> {
        inner: MemoryGuard<'a>,
        locked: &'a AtomicBool,
    }

    impl Drop for InstrumentedGuard<'_> {
        fn drop(&mut self) {
            self.locked.store(false, Ordering::SeqCst);
        }
    }

    impl LockedStore for InstrumentedGuard<'_> {
        type Key<'k>
            = &'k Entry
        where
            Self: 'k;

        fn open_for_read(&self, key: &[u8]) -> Option<&Entry> {
            self.inner.open_for_read(key)
        }
    }

    impl Store for InstrumentedStore {
        type Guard<'a> = InstrumentedGuard<'a>;

        fn lock(&self) -> InstrumentedGuard<'_> {
            let inner = self.inner.lock();
            assert!(!self.locked.swap(true, Ordering::SeqCst), "lock taken twice");
            InstrumentedGuard {
                inner,
                locked: &self.locked,
            }
        }
    }

    fn instrumented() -> InstrumentedStore {
        let inner = MemoryStore::new();
        inner.set("/a.jpg", "hello");
        inner.rpush("/list", "x").unwrap();
        InstrumentedStore {
            inner,
            locked: Arc::new(AtomicBool::new(false)),
        }
    }

    fn run(store: &InstrumentedStore, request: &[u8], policy: FailurePolicy) -> (Result<usize, RequestError>, Vec<u8>) {
        let mut stream = CheckedStream::new(request, Arc::clone(&store.locked));
        let result = handle_connection(&mut stream, store, &options(policy));
        assert!(!store.locked.load(Ordering::SeqCst), "lock leaked");
        (result, stream.output)
    }

    #[test]
    fn test_serves_existing_key() {
        let store = instrumented();
        let (result, output) = run(&store, b"GET /a.jpg HTTP/1.0\r\n\r\n", FailurePolicy::Close);
        assert_eq!(result.unwrap(), 5);
        assert_eq!(
            output,
            b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\nContent-Type: image/jpeg\r\n\r\nhello"
        );
    }

    #[test]
    fn test_missing_key_writes_nothing() {
        let store = instrumented();
        let (result, output) = run(&store, b"GET /missing HTTP/1.0\r\n\r\n", FailurePolicy::Close);
        assert!(matches!(result, Err(RequestError::KeyUnavailable)));
        assert!(output.is_empty());
    }

    #[test]
    fn test_wrong_type_writes_nothing() {
        let store = instrumented();
        let (result, output) = run(&store, b"GET /list HTTP/1.1\r\nHost: x\r\n\r\n", FailurePolicy::Close);
        assert!(matches!(result, Err(RequestError::KeyUnavailable)));
        assert!(output.is_empty());
    }

    #[test]
    fn test_malformed_requests_write_nothing() {
        let store = instrumented();
        for request in [
            &b"GET\r\n\r\n"[..],
            b"GET /a.jpg\r\n\r\n",
            b"GET /a.jpg HTTP/9.9\r\n\r\n",
            b"GET /a.jpg HTTP/1.0\r\n",
            b"garbage",
        ] {
            let (result, output) = run(&store, request, FailurePolicy::Close);
            assert!(matches!(result, Err(RequestError::Parse(_))), "{result:?}");
            assert!(output.is_empty());
        }
    }

    #[test]
    fn test_full_buffer_is_too_long() {
        let store = instrumented();

        // A valid request that happens to fill the buffer exactly
        let mut request = b"GET /a.jpg HTTP/1.0\r\nX-Pad: ".to_vec();
        request.resize(MAX_REQUEST_SIZE - 4, b'a');
        request.extend_from_slice(b"\r\n\r\n");
        assert_eq!(request.len(), MAX_REQUEST_SIZE);

        let (result, output) = run(&store, &request, FailurePolicy::Close);
        assert!(matches!(result, Err(RequestError::TooLarge)));
        assert!(output.is_empty());

        // One byte shorter fits
        request.truncate(MAX_REQUEST_SIZE - 5);
        request.extend_from_slice(b"\r\n\r\n");
        let (result, _) = run(&store, &request, FailurePolicy::Close);
        assert_eq!(result.unwrap(), 5);
    }

    #[test]
    fn test_empty_read_is_closed() {
        let store = instrumented();
        let (result, output) = run(&store, b"", FailurePolicy::Status);
        assert!(matches!(result, Err(RequestError::Closed)));
        assert!(output.is_empty());
    }

    #[test]
    fn test_status_policy() {
        let store = instrumented();

        let (_, output) = run(&store, b"GET /missing HTTP/1.0\r\n\r\n", FailurePolicy::Status);
        assert_eq!(output, b"HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n");

        let (_, output) = run(&store, b"GET\r\n\r\n", FailurePolicy::Status);
        assert_eq!(output, b"HTTP/1.0 400 Bad Request\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn test_read_error() {
        struct Broken;

        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(ErrorKind::ConnectionReset, "reset"))
            }
        }

        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                panic!("nothing should be written");
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let store = MemoryStore::new();
        let result = handle_connection(&mut Broken, &store, &options(FailurePolicy::Status));
        assert!(matches!(result, Err(RequestError::Read(_))));
    }
}
