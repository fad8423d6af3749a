#![deny(unsafe_code)]

mod auth;
mod commands;
mod config;
mod exit_code;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lockbox_core::EncFsInitError;
use lockbox_webdav::ServerError;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use crate::auth::PasswordOptions;
use crate::commands::{config_path, init, serve};
use crate::config::Config;

/// Serve plain or encrypted folders over WebDAV
#[derive(Parser)]
#[command(name = "lockbox")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Create an encrypted folder
    lockbox init ~/secrets

    # Serve it on port 8080 until Ctrl-C
    lockbox serve ~/secrets --port 8080

    # Serve a plain directory (pipe password for encrypted ones instead)
    lockbox serve --plain /srv/share
    echo \"$SECRET\" | lockbox --password-stdin serve ~/secrets

    # Use folder alias (from ~/.config/lockbox/config.toml)
    lockbox serve @work
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Folder passphrase (insecure, prefer --password-stdin or LOCKBOX_PASSWORD)
    #[arg(long, env = "LOCKBOX_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Read password from stdin (single line)
    #[arg(long, conflicts_with = "password", global = true)]
    password_stdin: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Move the password out of the parsed arguments into wiped storage.
    fn take_password_options(&mut self) -> PasswordOptions {
        PasswordOptions {
            password: self.password.take().map(Zeroizing::new),
            password_stdin: self.password_stdin,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new encrypted folder
    Init(init::Args),

    /// Serve a folder over WebDAV until interrupted
    Serve(serve::Args),

    /// Print the configuration file location
    ConfigPath(config_path::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");
            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let mut cli = Cli::parse();
    let config = Config::load()?;

    if !cli.quiet {
        let verbosity = if cli.verbose > 0 {
            cli.verbose
        } else {
            config.defaults.verbosity.unwrap_or(0)
        };
        setup_tracing(verbosity);
    }

    let password_opts = cli.take_password_options();

    match cli.command {
        Commands::Init(args) => init::execute(&args, &password_opts),
        Commands::Serve(args) => serve::execute(&args, &config, &password_opts, cli.quiet),
        Commands::ConfigPath(args) => config_path::execute(&args),
    }
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Map an error chain to an exit code.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(init_err) = cause.downcast_ref::<EncFsInitError>()
            && init_err.is_wrong_password()
        {
            return exit_code::AUTH_FAILED;
        }

        if let Some(server_err) = cause.downcast_ref::<ServerError>() {
            return match server_err {
                ServerError::InvalidRoot { .. } => exit_code::NOT_FOUND,
                _ => exit_code::SERVER_FAILED,
            };
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && io_err.kind() == io::ErrorKind::NotFound
        {
            return exit_code::NOT_FOUND;
        }
    }

    exit_code::GENERAL_ERROR
}
