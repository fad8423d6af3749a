//! Process-wide setup and teardown.
//!
//! [`global_init`] brackets every server: it claims the process, checks that
//! sockets can be opened, and creates the registry of filesystems currently
//! being served. The returned [`WebDavRuntime`] is the only way to start a
//! server, and [`global_shutdown`] consumes it.

use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use lockbox_fs::FsIo;
use tracing::{debug, info};

use crate::error::ServerError;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Exclusive claim on the process-wide runtime slot.
#[derive(Debug)]
struct ProcessClaim;

impl ProcessClaim {
    fn acquire() -> Result<Self, ServerError> {
        INITIALIZED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ProcessClaim)
            .map_err(|_| ServerError::AlreadyInitialized)
    }
}

impl Drop for ProcessClaim {
    fn drop(&mut self) {
        INITIALIZED.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct SocketSubsystem;

impl SocketSubsystem {
    fn start() -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(ServerError::SocketSubsystem)?;
        debug!(addr = ?listener.local_addr().ok(), "Socket subsystem available");
        Ok(SocketSubsystem)
    }
}

impl Drop for SocketSubsystem {
    fn drop(&mut self) {
        info!("Shutting down socket subsystem");
    }
}

/// Filesystems currently being served, keyed by object identity.
#[derive(Debug, Default)]
pub(crate) struct MountRegistry {
    active: DashSet<usize>,
}

impl MountRegistry {
    fn key(fs: &Arc<dyn FsIo>) -> usize {
        Arc::as_ptr(fs).cast::<()>() as usize
    }

    /// Mark `fs` as served until the returned claim is dropped.
    pub(crate) fn claim(
        self: &Arc<Self>,
        fs: &Arc<dyn FsIo>,
    ) -> Result<RegistryClaim, ServerError> {
        let key = Self::key(fs);
        if !self.active.insert(key) {
            return Err(ServerError::FilesystemBusy);
        }
        Ok(RegistryClaim {
            registry: Arc::clone(self),
            key,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }
}

#[derive(Debug)]
pub(crate) struct RegistryClaim {
    registry: Arc<MountRegistry>,
    key: usize,
}

impl Drop for RegistryClaim {
    fn drop(&mut self) {
        self.registry.active.remove(&self.key);
    }
}

/// Live process-wide state. Servers are started through its methods.
///
/// Fields drop in declaration order, the reverse of acquisition.
#[derive(Debug)]
pub struct WebDavRuntime {
    pub(crate) registry: Arc<MountRegistry>,
    _sockets: SocketSubsystem,
    _claim: ProcessClaim,
}

impl WebDavRuntime {
    /// Number of filesystems being served right now.
    pub fn active_servers(&self) -> usize {
        self.registry.len()
    }
}

/// Set up process-wide state. Fails if a runtime already exists.
pub fn global_init() -> Result<WebDavRuntime, ServerError> {
    let claim = ProcessClaim::acquire()?;
    let sockets = SocketSubsystem::start()?;
    let registry = Arc::new(MountRegistry::default());
    debug!("WebDAV runtime initialized");
    Ok(WebDavRuntime {
        registry,
        _sockets: sockets,
        _claim: claim,
    })
}

/// Tear down process-wide state. All servers must have returned.
pub fn global_shutdown(runtime: WebDavRuntime) {
    drop(runtime);
}
