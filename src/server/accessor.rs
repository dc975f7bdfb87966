//! Store lookups on behalf of the request handler.

use crate::server::RequestError;
use crate::store::{KeyType, LockedStore, OpenKey, Store};
use bytes::Bytes;
use tracing::trace;

/// Fetch the byte-string value stored under `key`.
///
/// The store lock is held only while the key is opened, type-checked and its
/// read view taken. A missing key and a key of another type both come back as
/// [`RequestError::KeyUnavailable`].
pub fn lookup<S: Store>(store: &S, key: &[u8]) -> Result<Bytes, RequestError> {
    let guard = store.lock();
    let value = guard
        .open_for_read(key)
        .filter(|opened| opened.key_type() == KeyType::String)
        .and_then(|opened| opened.read_bytes());
    drop(guard);

    trace!(key = %String::from_utf8_lossy(key), found = value.is_some(), "Store lookup");
    value.ok_or(RequestError::KeyUnavailable)
}
