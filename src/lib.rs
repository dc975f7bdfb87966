//! kv-http-gateway: read-only HTTP access to an embedded key-value store.
//!
//! Clients fetch a stored byte string by requesting its key as the URL path:
//!
//! ```text
//! GET /image.jpg HTTP/1.0
//! ```
//!
//! returns the value stored under the key `/image.jpg`. The path is used
//! verbatim as the key.
//!
//! ## Example
//!
//! ```no_run
//! use kv_http_gateway::{Gateway, MemoryStore, ServerConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.set("/image.jpg", "image data");
//!
//! let gateway = Gateway::start(ServerConfig::default(), store).unwrap();
//! gateway.join();
//! ```

pub mod config;
pub mod http;
pub mod server;
pub mod store;

pub use config::{ConfigError, ServerConfig, DEFAULT_PORT, DEFAULT_WORKERS};
pub use server::{Gateway, GatewayError};
pub use store::{start_expiry_sweeper, KeyType, LockedStore, MemoryStore, OpenKey, Store};

/// Start serving `store` with the option list an embedding host supplies
/// at load time (`PORT <n>` is the only recognized option).
///
/// Fails only when the listening socket cannot be set up.
pub fn start_with_args<S, A>(args: &[A], store: std::sync::Arc<S>) -> Result<Gateway, GatewayError>
where
    S: Store + 'static,
    A: AsRef<str>,
{
    Gateway::start(ServerConfig::from_module_args(args), store)
}
