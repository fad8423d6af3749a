//! Server bootstrap and main loop.
//!
//! `run` assembles one server in a fixed order and tears it down in the
//! reverse one:
//!
//! ```text
//! event loop → network backend → dynamic fs → storage backend → dav server
//!   → startup notification → main loop
//! ```
//!
//! Every step is an owned value, so a failing step drops exactly what the
//! earlier steps built before the error propagates. Connection tasks, and the
//! per-stream tasks HTTP/2 connections spawn, are all cancelled before the
//! main loop returns, so none of them outlives the storage backend.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use dav_server::DavHandler;
use dav_server::fakels::FakeLs;
use hyper::Request;
use hyper::body::Incoming;
use hyper::rt::Executor;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto;
use lockbox_fs::{DynamicFs, FsIo, FsIoOps};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ServerError;
use crate::event_loop::{EventLoop, ServerHandle};
use crate::filesystem::DavBackend;
use crate::lifecycle::WebDavRuntime;
use crate::network::NetworkBackend;
use crate::startup::StartupNotification;

/// Path the share is mounted at, both in the public URI and in the hrefs the
/// handler generates.
const MOUNT_PATH: &str = "/";

/// Protocol handler plus the URI it advertises.
struct DavServer {
    handler: DavHandler,
    public_uri: String,
}

impl DavServer {
    fn start(backend: &DavBackend, local_addr: SocketAddr) -> Self {
        let public_uri = public_uri(local_addr);
        let handler = DavHandler::builder()
            .filesystem(Box::new(backend.clone()))
            .locksystem(FakeLs::new())
            .strip_prefix(MOUNT_PATH.trim_end_matches('/'))
            .build_handler();
        debug!(%public_uri, root = backend.root(), "WebDAV handler started");
        Self {
            handler,
            public_uri,
        }
    }
}

fn public_uri(local_addr: SocketAddr) -> String {
    format!("http://localhost:{}{MOUNT_PATH}", local_addr.port())
}

/// Spawns the tasks hyper creates for HTTP/2 streams into a set the main loop
/// can cancel.
#[derive(Clone, Default)]
struct StreamExecutor {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl StreamExecutor {
    async fn shutdown(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        tasks.shutdown().await;
    }

    fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<F> Executor<F> for StreamExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished streams so the set tracks only live ones.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            fut.await;
        });
    }
}

/// Everything one `run` owns. Fields drop in declaration order: the server
/// first, the event loop last.
struct ServerInstance {
    server: DavServer,
    backend: DavBackend,
    network: NetworkBackend,
    event_loop: EventLoop,
}

impl ServerInstance {
    fn build(fs: &Arc<dyn FsIo>, root_path: &str, port: u16) -> Result<Self, ServerError> {
        let event_loop = EventLoop::new()?;
        let network = NetworkBackend::bind(&event_loop, port)?;
        let dynamic = DynamicFs::owned(FsIoOps::new(Arc::clone(fs)));
        let backend = DavBackend::new(dynamic, root_path)?;
        let server = DavServer::start(&backend, network.local_addr());
        Ok(Self {
            server,
            backend,
            network,
            event_loop,
        })
    }

    async fn main_loop(
        &self,
        handle: &ServerHandle,
        startup: &mut StartupNotification,
        on_running: &mut Option<impl FnOnce(ServerHandle)>,
    ) -> Result<(), ServerError> {
        let mut connections = JoinSet::new();
        let streams = StreamExecutor::default();
        info!(uri = %self.server.public_uri, "Starting main loop");

        loop {
            handle.begin_iteration();
            tokio::select! {
                biased;

                () = handle.stopped() => break,

                fired = startup.fired(), if startup.is_pending() => {
                    fired?;
                    if let Some(callback) = on_running.take() {
                        debug!(iterations = handle.iterations(), "Event loop is dispatching");
                        callback(handle.clone());
                    }
                }

                accepted = self.network.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            self.server.handler.clone(),
                            stream,
                            peer,
                            streams.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        error!(error = %e, "Connection task panicked");
                    }
                }
            }
        }

        connections.shutdown().await;
        debug!(streams = streams.pending(), "Cancelling HTTP/2 streams");
        streams.shutdown().await;
        Ok(())
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        debug!(uri = %self.server.public_uri, root = self.backend.root(), "Tearing down server");
    }
}

async fn serve_connection(
    handler: DavHandler,
    stream: TcpStream,
    peer: SocketAddr,
    streams: StreamExecutor,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler.handle(req).await) }
    });

    if let Err(e) = auto::Builder::new(streams)
        .serve_connection(io, service)
        .await
    {
        warn!(%peer, error = %e, "HTTP connection error");
    }
}

impl WebDavRuntime {
    /// Serve `fs` below `root_path` on `port` until stopped.
    ///
    /// Blocks the calling thread. `on_running` is called exactly once, on the
    /// loop thread, after the loop has started dispatching; the
    /// [`ServerHandle`] it receives is how the server is stopped. The
    /// callback must not block, since the loop cannot serve requests while it
    /// runs.
    ///
    /// `fs` is only borrowed: it is usable again once `run` returns. The same
    /// filesystem object cannot be served twice at once.
    #[instrument(level = "debug", skip(self, fs, on_running))]
    pub fn run(
        &self,
        fs: &Arc<dyn FsIo>,
        root_path: &str,
        port: u16,
        on_running: impl FnOnce(ServerHandle),
    ) -> Result<(), ServerError> {
        let _claim = self.registry.claim(fs)?;
        let instance = ServerInstance::build(fs, root_path, port)?;
        let mut startup = StartupNotification::arm()?;
        let handle = ServerHandle::new(
            instance.network.local_addr(),
            instance.server.public_uri.clone(),
        );

        let mut on_running = Some(on_running);
        let result = instance
            .event_loop
            .block_on(instance.main_loop(&handle, &mut startup, &mut on_running));
        info!("Server stopped");
        result
    }
}
