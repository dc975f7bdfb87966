//! TCP listener and the gateway's startup entry point.

use crate::config::ServerConfig;
use crate::server::handler::{serve_connection, HandlerOptions};
use crate::server::pool::{Rejected, WorkerPool};
use crate::store::Store;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, trace, warn};

/// Pause after an accept error that is likely to repeat immediately.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Startup failures. Once the gateway is running nothing is fatal.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn gateway threads: {0}")]
    Spawn(#[source] io::Error),
}

/// A running gateway: one listener thread feeding a worker pool.
pub struct Gateway {
    local_addr: SocketAddr,
    listener: JoinHandle<()>,
}

impl Gateway {
    /// Bind the configured address and start serving `store`.
    ///
    /// Binding happens before any thread is spawned, so an address in use or
    /// a permission error is returned here rather than logged later.
    pub fn start<S>(config: ServerConfig, store: Arc<S>) -> Result<Self, GatewayError>
    where
        S: Store + 'static,
    {
        let addr = config.bind_address();
        let listener = bind(&addr, config.backlog).map_err(|source| GatewayError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| GatewayError::Bind {
            addr: addr.clone(),
            source,
        })?;

        let options = HandlerOptions::from(&config);
        let pool = WorkerPool::new(config.workers, config.queue_capacity, move |stream: TcpStream| {
            serve_connection(stream, &*store, &options)
        })
        .map_err(GatewayError::Spawn)?;

        let listener = thread::Builder::new()
            .name("listener".to_string())
            .spawn(move || accept_loop(listener, pool))
            .map_err(GatewayError::Spawn)?;

        info!(addr = %local_addr, workers = config.workers, "Gateway listening");

        Ok(Self {
            local_addr,
            listener,
        })
    }

    /// Address the gateway is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until the listener thread exits, which does not happen in
    /// normal operation.
    pub fn join(self) {
        if self.listener.join().is_err() {
            error!("Listener thread panicked");
        }
    }
}

/// Create a blocking listening socket with `SO_REUSEADDR` and the given backlog.
pub fn bind(addr: &str, backlog: i32) -> io::Result<TcpListener> {
    let addr = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing"))?;

    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Accept connections forever, handing each to the pool.
fn accept_loop(listener: TcpListener, pool: WorkerPool<TcpStream>) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                trace!(peer = %peer, "Accepted connection");
                if let Err(Rejected(stream)) = pool.submit(stream) {
                    warn!(peer = %peer, queued = pool.queued(), "Work queue full, dropping connection");
                    drop(stream);
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                if let Some(pause) = accept_backoff(&e) {
                    thread::sleep(pause);
                }
            }
        }
    }
}

/// Errors tied to a single connection are retried at once. Anything else,
/// such as running out of file descriptors, backs off.
fn accept_backoff(error: &io::Error) -> Option<Duration> {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}
