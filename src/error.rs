//! Top-level error types for the command line tool.
//!
//! Pipeline errors live in [`crate::packager::Error`]; this module wraps them
//! together with argument, manifest and I/O errors.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CodshipError>;

/// Main error type of the binary
#[derive(Error, Debug)]
pub enum CodshipError {
    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Packaging and deployment errors
    #[error("{0}")]
    Packager(#[from] crate::packager::Error),

    /// Generic errors from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// A project named on the command line is not in the manifest
    #[error("Unknown project `{name}` (known: {})", known.join(", "))]
    UnknownProject {
        /// Requested name
        name: String,
        /// Names defined in the manifest
        known: Vec<String>,
    },

    /// Workspace manifest is inconsistent
    #[error("Invalid manifest {path}: {reason}")]
    InvalidManifest {
        /// Manifest path
        path: String,
        /// What is wrong
        reason: String,
    },
}

impl CodshipError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            CodshipError::Cli(CliError::UnknownProject { .. }) => {
                vec!["Run without project names to package every project".to_string()]
            }
            CodshipError::Toml(_) | CodshipError::Cli(CliError::InvalidManifest { .. }) => {
                vec!["Check codship.toml against the documented [[project]] keys".to_string()]
            }
            CodshipError::Packager(crate::packager::Error::MissingToolchain(_)) => vec![
                "Point [toolchain].home at the toolchain installation".to_string(),
                "Make sure java is on PATH for signing".to_string(),
            ],
            CodshipError::Packager(crate::packager::Error::NoDeviceFound) => {
                vec!["Use --wait-for-device to wait until a device is connected".to_string()]
            }
            _ => Vec::new(),
        }
    }
}
