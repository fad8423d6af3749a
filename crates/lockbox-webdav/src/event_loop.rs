//! The single-threaded event loop of one server, and the handle used to
//! observe and stop it from outside.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::runtime::{Builder, EnterGuard, Runtime};
use tokio::sync::Notify;
use tracing::debug;

use crate::error::ServerError;

/// Current-thread tokio runtime. Every handler of a server runs on it, one
/// at a time.
#[derive(Debug)]
pub(crate) struct EventLoop {
    runtime: Runtime,
}

impl EventLoop {
    pub(crate) fn new() -> Result<Self, ServerError> {
        let runtime = Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(|e| ServerError::create("event loop", e))?;
        Ok(Self { runtime })
    }

    /// Make the loop the ambient runtime, for registering I/O sources.
    pub(crate) fn enter(&self) -> EnterGuard<'_> {
        self.runtime.enter()
    }

    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        debug!("Destroying event loop");
    }
}

#[derive(Debug)]
struct LoopState {
    stop_requested: AtomicBool,
    stop: Notify,
    iterations: AtomicU64,
    local_addr: SocketAddr,
    public_uri: String,
}

/// Handle to a running server, handed to the startup callback.
///
/// It may be moved to other threads; [`ServerHandle::stop`] is the only way
/// to make `run` return.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    state: Arc<LoopState>,
}

impl ServerHandle {
    pub(crate) fn new(local_addr: SocketAddr, public_uri: String) -> Self {
        Self {
            state: Arc::new(LoopState {
                stop_requested: AtomicBool::new(false),
                stop: Notify::new(),
                iterations: AtomicU64::new(0),
                local_addr,
                public_uri,
            }),
        }
    }

    /// Ask the loop to exit after the handler currently running.
    pub fn stop(&self) {
        if !self.state.stop_requested.swap(true, Ordering::AcqRel) {
            debug!("Stop requested");
        }
        self.state.stop.notify_one();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.stop_requested.load(Ordering::Acquire)
    }

    /// Passes the main loop has started so far.
    pub fn iterations(&self) -> u64 {
        self.state.iterations.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.state.local_addr
    }

    /// Base URI clients should use, e.g. `http://localhost:8080/`.
    pub fn public_uri(&self) -> &str {
        &self.state.public_uri
    }

    pub(crate) fn begin_iteration(&self) -> u64 {
        self.state.iterations.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Resolves once [`ServerHandle::stop`] has been called.
    pub(crate) async fn stopped(&self) {
        while !self.is_stopping() {
            self.state.stop.notified().await;
        }
    }
}
