//! Init command - turn a directory into a new encrypted folder.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use lockbox_core::{KdfParams, init_enc_folder};
use lockbox_fs::create_native_fs;
use tracing::instrument;

use crate::auth::{PasswordOptions, get_new_passphrase};

#[derive(ClapArgs)]
pub struct Args {
    /// Directory to initialize (created if missing)
    pub folder: PathBuf,
}

#[instrument(level = "info", name = "cmd::init", skip_all, fields(folder = %args.folder.display()))]
pub fn execute(args: &Args, password_opts: &PasswordOptions) -> Result<()> {
    std::fs::create_dir_all(&args.folder)
        .with_context(|| format!("Failed to create folder: {}", args.folder.display()))?;
    let folder = super::host_folder(&args.folder)?;

    let passphrase = get_new_passphrase(password_opts)?;
    let base = create_native_fs().context("Failed to create native filesystem")?;
    init_enc_folder(base, &folder, passphrase, KdfParams::from_env_or_default())
        .context("Failed to initialize encrypted folder")?;

    println!("Initialized encrypted folder at {folder}");
    Ok(())
}
