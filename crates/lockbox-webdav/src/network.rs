//! Listening socket of one server.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::ServerError;
use crate::event_loop::EventLoop;

#[derive(Debug)]
pub(crate) struct NetworkBackend {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl NetworkBackend {
    /// Listen on `port` on every local interface, registered with `event_loop`.
    pub(crate) fn bind(event_loop: &EventLoop, port: u16) -> Result<Self, ServerError> {
        let fail = |e| ServerError::create("network backend", e);

        let std_listener =
            std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(fail)?;
        std_listener.set_nonblocking(true).map_err(fail)?;
        let local_addr = std_listener.local_addr().map_err(fail)?;

        let _guard = event_loop.enter();
        let listener = TcpListener::from_std(std_listener).map_err(fail)?;
        debug!(%local_addr, "Listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }
}

impl Drop for NetworkBackend {
    fn drop(&mut self) {
        debug!(local_addr = %self.local_addr, "Closing listener");
    }
}
