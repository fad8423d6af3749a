//! Config-path command - print where the configuration file lives.

use anyhow::Result;
use clap::Args as ClapArgs;

use crate::config;

#[derive(ClapArgs)]
pub struct Args {}

pub fn execute(_args: &Args) -> Result<()> {
    println!("{}", config::config_path()?.display());
    Ok(())
}
