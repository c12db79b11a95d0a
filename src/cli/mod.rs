//! Command line interface for codship.
//!
//! Parses arguments, loads the workspace manifest and dispatches to the
//! `package` and `deploy` commands. Ctrl-C cancels the running job.

pub mod args;
pub mod commands;
mod output;

pub use args::{Args, Command, RuntimeConfig};
pub use output::OutputManager;

use crate::error::{CliError, Result};
use crate::metadata;
use crate::packager::Status;
use tokio_util::sync::CancellationToken;

/// Exit code when the job was cancelled (128 + SIGINT).
pub const EXIT_CANCELLED: i32 = 130;

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    args.validate()
        .map_err(|reason| CliError::InvalidArguments { reason })?;
    let config = RuntimeConfig::from(&args);

    let workspace = metadata::load_workspace(&args.manifest)?;
    log::debug!(
        "loaded {} project(s) from {}",
        workspace.projects.len(),
        args.manifest.display()
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let state_file = args.state_file.as_deref();
    let status = match &args.command {
        Command::Package(package) => {
            commands::package::execute(&workspace, package, state_file, &config, &cancel)
                .await?
                .status()
        }
        Command::Deploy(deploy) => {
            commands::deploy::execute(&workspace, deploy, state_file, &config, &cancel).await?
        }
    };

    Ok(exit_code(&status))
}

pub fn exit_code(status: &Status) -> i32 {
    match status {
        Status::Ok => 0,
        Status::Cancelled => EXIT_CANCELLED,
        Status::Failed(_) => 1,
    }
}
