//! Threaded gateway runtime.
//!
//! ```text
//! listener thread ──accept──> work queue ──> worker-0 .. worker-N
//!                                              │
//!                                              ▼
//!                              read ─> parse ─> lookup ─> respond ─> close
//! ```
//!
//! - `listener`: binds the port and accepts connections
//! - `pool`: fixed set of workers consuming the queue
//! - `handler`: per-connection pipeline
//! - `accessor`: the only code that takes the store lock

pub mod accessor;
pub mod handler;
pub mod listener;
pub mod pool;

pub use handler::{handle_connection, serve_connection, HandlerOptions, RequestError};
pub use listener::{Gateway, GatewayError};
pub use pool::{Rejected, WorkerPool};
