//! Hot-swap pushes.
//!
//! The push itself is a blocking debugger call. It runs on a blocking worker
//! whose join handle the caller selects against cancellation. On cancellation
//! the caller returns at once and the worker is left to finish on its own;
//! its result is discarded.

use crate::packager::error::Result;
use crate::packager::status::Status;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often a waiting caller reports progress.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Debugger-side session able to replace code on a running target.
pub trait HotSwapSession: Send + Sync {
    fn supports_hot_swap(&self) -> bool;
    fn clear_registered_files(&self);
    fn register_file(&self, path: &Path);
    /// Pushes the registered files. `None` targets the simulator.
    fn push(&self, device: Option<&str>) -> Result<()>;
}

/// Session for targets without a debugger attached.
#[derive(Debug, Default)]
pub struct NoHotSwap {
    registered: Mutex<Vec<PathBuf>>,
}

impl HotSwapSession for NoHotSwap {
    fn supports_hot_swap(&self) -> bool {
        false
    }

    fn clear_registered_files(&self) {
        self.registered.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn register_file(&self, path: &Path) {
        self.registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_path_buf());
    }

    fn push(&self, _device: Option<&str>) -> Result<()> {
        Err(crate::packager::Error::GenericError(
            "target does not support hot-swap".into(),
        ))
    }
}

/// Registers `files` with `session` and pushes them on a worker.
///
/// # Returns
///
/// `Ok` once the worker finished successfully, `Cancelled` as soon as `cancel`
/// fires, `Failed` if the push failed.
pub async fn push_files(
    session: Arc<dyn HotSwapSession>,
    files: &[PathBuf],
    device: Option<String>,
    cancel: &CancellationToken,
) -> Status {
    session.clear_registered_files();
    for file in files {
        session.register_file(file);
    }
    log::info!(
        "pushing {} file(s) to {}",
        files.len(),
        device.as_deref().unwrap_or("simulator")
    );

    let mut worker = tokio::task::spawn_blocking(move || session.push(device.as_deref()));
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            result = &mut worker => {
                return match result {
                    Ok(Ok(())) => Status::Ok,
                    Ok(Err(e)) => Status::failed(e),
                    Err(e) => Status::failed(format!("hot-swap worker failed: {e}")),
                };
            }
            _ = cancel.cancelled() => {
                log::info!("hot-swap cancelled, leaving push worker to finish");
                return Status::Cancelled;
            }
            _ = ticker.tick() => log::debug!("waiting for hot-swap push"),
        }
    }
}
