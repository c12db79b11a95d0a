//! External tool detection and availability checking.
//!
//! The signing tool runs on a Java runtime and device deployment needs the
//! loader tool. Both are looked up on PATH once per process.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Name of the loader tool executable.
pub const LOADER_TOOL: &str = if cfg!(windows) {
    "JavaLoader.exe"
} else {
    "JavaLoader"
};

/// Java runtime used to launch the signing tool.
///
/// Cached result to avoid repeated subprocess calls during signing.
pub static JAVA: LazyLock<Option<PathBuf>> = LazyLock::new(|| match which::which("java") {
    Ok(path) => {
        log::debug!("Found java at: {}", path.display());

        match std::process::Command::new(&path).arg("-version").output() {
            // java prints its version on stderr
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stderr);
                log::info!(
                    "java available: {}",
                    version.lines().next().unwrap_or_default().trim()
                );
                Some(path)
            }
            Ok(output) => {
                log::warn!(
                    "java found at {} but -version check failed (exit code: {:?}). \
                     Signing will fail. Stderr: {}",
                    path.display(),
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr)
                );
                None
            }
            Err(e) => {
                log::warn!(
                    "java found at {} but failed to execute: {}. Check file permissions.",
                    path.display(),
                    e
                );
                None
            }
        }
    }
    Err(e) => {
        log::debug!("java not found in PATH: {}", e);
        None
    }
});

/// Loader tool found on PATH, if any.
pub static LOADER_ON_PATH: LazyLock<Option<PathBuf>> = LazyLock::new(|| {
    which::which(LOADER_TOOL)
        .inspect(|path| log::debug!("Found {} at: {}", LOADER_TOOL, path.display()))
        .inspect_err(|e| log::debug!("{} not found in PATH: {}", LOADER_TOOL, e))
        .ok()
});

/// Resolves the loader tool: an explicit path wins, then the toolchain's
/// `bin/` folder, then PATH.
pub fn find_loader(explicit: Option<&Path>, toolchain_home: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(home) = toolchain_home {
        let candidate = home.join("bin").join(LOADER_TOOL);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    LOADER_ON_PATH.clone()
}
