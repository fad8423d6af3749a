//! Pluggable filesystem layer for Lockbox.
//!
//! Two interfaces live here and adapters run between them in both
//! directions:
//!
//! - [`FsOperations`]: the thin operation table (open, read, write, readdir,
//!   rename, path predicates, ...) that concrete backends implement.
//!   [`NativeFs`] is the host passthrough backend.
//! - [`FsIo`]: the rich path/object interface the encrypted filesystem is
//!   built on and the server serves.
//!
//! ```text
//!  NativeFs ──▶ DynamicFs ──▶ OpsFsIo ──▶ (EncryptedFs) ──▶ FsIoOps ──▶ DynamicFs ──▶ server
//!  (table)      (ownership)   (FsIo)        (FsIo)           (table)
//! ```
//!
//! Because the server only depends on the table shape, any `FsIo` can be
//! served without the server knowing which filesystem sits underneath.

mod bridge;
mod dynamic;
mod error;
mod fsio;
mod fsio_ops;
mod handle_table;
mod native;
mod ops;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::Arc;

pub use bridge::OpsFsIo;
pub use dynamic::DynamicFs;
pub use error::{FsErrorCode, FsInitError, FsIoError, FsIoResult, OpResult};
pub use fsio::{FsDirectory, FsFile, FsIo, FsPath, OpenMode};
pub use fsio_ops::FsIoOps;
pub use native::NativeFs;
pub use ops::{
    DirEntry, DirHandle, FileHandle, FileKind, FsAttrs, FsOperations, MAX_FILE_SIZE, OpenFile,
    join_path,
};

/// Host filesystem exposed through the rich interface.
///
/// The native table is owned by its dynamic filesystem, which is owned by the
/// bridge, so dropping the last `Arc` tears the whole stack down.
pub fn create_native_fs() -> Result<Arc<dyn FsIo>, FsInitError> {
    let native = DynamicFs::owned(NativeFs::new());
    let bridged = OpsFsIo::new(native)?;
    Ok(Arc::new(bridged))
}
