//! WebDAV serving for Lockbox.
//!
//! Any [`FsIo`](lockbox_fs::FsIo) can be served: the server wraps it back
//! into an operation table and talks only to that, so a plain directory and
//! an encrypted folder go through the same code.
//!
//! ```ignore
//! let runtime = lockbox_webdav::global_init()?;
//! let fs = lockbox_fs::create_native_fs()?;
//! runtime.run(&fs, "/srv/share", 8080, |handle| {
//!     println!("serving at {}", handle.public_uri());
//! })?;
//! lockbox_webdav::global_shutdown(runtime);
//! ```
//!
//! One server runs on one current-thread event loop; requests are handled
//! one at a time. The call to `run` blocks until [`ServerHandle::stop`] is
//! called.

mod dir_entry;
mod error;
mod event_loop;
mod file;
mod filesystem;
mod lifecycle;
mod metadata;
mod network;
mod server;
mod startup;

pub use dir_entry::LockboxDirEntry;
pub use error::{ServerError, to_dav_error};
pub use event_loop::ServerHandle;
pub use file::LockboxFile;
pub use filesystem::DavBackend;
pub use lifecycle::{WebDavRuntime, global_init, global_shutdown};
pub use metadata::LockboxMetaData;
