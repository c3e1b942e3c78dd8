//! Lock-status command - report whether a database is locked.
//!
//! Read-only: the lock file is left untouched. A busy lock exits with the
//! `LOCKED` status.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use thiserror::Error;
use tracing::instrument;

use oxsafe_core::{EngineConfig, LockManager};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Password Safe database
    pub file: PathBuf,
}

#[derive(Error, Debug)]
#[error("{} is locked by {owner}", path.display())]
pub struct LockedError {
    pub path: PathBuf,
    pub owner: String,
}

#[instrument(level = "info", name = "cmd::lock_status", skip_all, fields(file = %args.file.display()))]
pub fn execute(args: &Args, config: &EngineConfig) -> Result<()> {
    let manager = LockManager::from_config(config);

    match manager.lock_owner(&args.file) {
        Some(owner) => Err(LockedError {
            path: args.file.clone(),
            owner,
        }
        .into()),
        None => {
            println!("{}: not locked", args.file.display());
            Ok(())
        }
    }
}
