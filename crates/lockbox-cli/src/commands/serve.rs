//! Serve command - expose a folder over WebDAV until interrupted.
//!
//! Encrypted folders are unlocked first and served as cleartext; `--plain`
//! serves the host directory as is.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use lockbox_core::open_enc_fs;
use lockbox_fs::{FsIo, create_native_fs};
use lockbox_webdav::{ServerHandle, global_init, global_shutdown};
use tracing::{info, instrument};

use crate::auth::{PasswordOptions, get_passphrase};
use crate::config::Config;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(ClapArgs)]
pub struct Args {
    /// Folder to serve (or @alias from config)
    #[arg(value_name = "FOLDER")]
    pub folder: String,

    /// Listening port (0 picks a free one)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Serve the folder without encryption
    #[arg(long)]
    pub plain: bool,

    /// Directory inside the folder to expose as the WebDAV root
    #[arg(long, default_value = "/")]
    pub root: String,
}

/// Settings after merging flags, alias entry and defaults.
#[derive(Debug, PartialEq, Eq)]
struct ServeSettings {
    port: u16,
    plain: bool,
}

fn settings(args: &Args, config: &Config, alias_port: Option<u16>, alias_plain: bool) -> ServeSettings {
    ServeSettings {
        port: args
            .port
            .or(alias_port)
            .or(config.defaults.port)
            .unwrap_or(DEFAULT_PORT),
        plain: args.plain || alias_plain,
    }
}

/// Host path of `root` below a plain folder.
fn plain_root(folder: &str, root: &str) -> Result<String> {
    let relative = root.trim_start_matches('/');
    if relative.is_empty() {
        return Ok(folder.to_string());
    }
    Path::new(folder)
        .join(relative)
        .into_os_string()
        .into_string()
        .map_err(|p| anyhow::anyhow!("Root path is not valid UTF-8: {}", p.to_string_lossy()))
}

/// Path of `root` inside an encrypted folder.
fn encrypted_root(root: &str) -> String {
    if root.starts_with('/') {
        root.to_string()
    } else {
        format!("/{root}")
    }
}

#[instrument(level = "info", name = "cmd::serve", skip_all, fields(folder = %args.folder))]
pub fn execute(args: &Args, config: &Config, password_opts: &PasswordOptions, quiet: bool) -> Result<()> {
    let resolved = config.resolve_folder(&args.folder)?;
    let settings = settings(args, config, resolved.port, resolved.plain);
    let folder = super::host_folder(&resolved.path)?;

    let base = create_native_fs().context("Failed to create native filesystem")?;
    let (fs, root): (Arc<dyn FsIo>, String) = if settings.plain {
        (base, plain_root(&folder, &args.root)?)
    } else {
        let passphrase = get_passphrase(password_opts)?;
        let enc = open_enc_fs(base, &folder, passphrase)
            .context("Failed to unlock folder - check your passphrase")?;
        (Arc::new(enc), encrypted_root(&args.root))
    };

    let running: Arc<Mutex<Option<ServerHandle>>> = Arc::new(Mutex::new(None));
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let running = Arc::clone(&running);
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            if let Ok(slot) = running.lock()
                && let Some(handle) = slot.as_ref()
            {
                handle.stop();
            }
        })
        .context("Failed to set signal handler")?;
    }

    let runtime = global_init().context("Failed to initialize WebDAV runtime")?;
    let result = runtime.run(&fs, &root, settings.port, |handle| {
        if !quiet {
            println!("Serving {folder} at {}", handle.public_uri());
            eprintln!("Press Ctrl-C to stop");
        }
        info!(uri = handle.public_uri(), plain = settings.plain, "Server running");
        if let Ok(mut slot) = running.lock() {
            *slot = Some(handle.clone());
        }
        // A signal that arrived before the handle was published.
        if interrupted.load(Ordering::SeqCst) {
            handle.stop();
        }
    });
    global_shutdown(runtime);

    result.context("WebDAV server failed")
}
