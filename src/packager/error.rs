//! Error types for packaging and deployment operations.
//!
//! Errors fall into a small taxonomy: configuration errors (fatal for the
//! affected project), I/O errors carrying the offending path, external command
//! failures, and device errors that must reach the user as actionable messages.
//! Cancellation is never an error; it is reported through [`Status`](super::Status).

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};
use thiserror::Error as DeriveError;

/// Result type alias for packager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the packaging pipeline
#[derive(Debug, DeriveError)]
pub enum Error {
    /// The toolchain installation configured for a project cannot be used
    #[error("toolchain not found: {0}")]
    MissingToolchain(String),

    /// A descriptor lacks a key the pipeline relies on
    #[error("descriptor {} is missing required key `{key}`", path.display())]
    MissingDescriptorKey {
        /// Descriptor file
        path: PathBuf,
        /// Key that was expected
        key: String,
    },

    /// Projects depend on each other in a loop
    #[error("dependency cycle between projects: {}", members.join(" -> "))]
    DependencyCycle {
        /// Projects participating in the cycle
        members: Vec<String>,
    },

    /// A project declares a dependency the project model cannot resolve
    #[error("project `{project}` depends on unknown project `{dependency}`")]
    UnknownDependency {
        /// Project declaring the dependency
        project: String,
        /// Name that could not be resolved
        dependency: String,
    },

    /// Plain I/O error without path information
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    /// I/O error with the path it happened on
    #[error("{context} {}: {error}", path.display())]
    Fs {
        /// What was being done
        context: &'static str,
        /// Offending path
        path: PathBuf,
        /// Underlying error
        error: std::io::Error,
    },

    /// An external command could not be launched
    #[error("failed to run `{command}`: {error}")]
    CommandFailed {
        /// Command line (program name)
        command: String,
        /// Launch error
        error: std::io::Error,
    },

    /// The signing tool rejected the request
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// No device is connected
    #[error("no device found. Connect a device with a USB cable and unlock it")]
    NoDeviceFound,

    /// The requested device is not among the connected ones
    #[error("device `{requested}` is not connected (connected: {})", connected.join(", "))]
    DeviceNotFound {
        /// Requested identifier
        requested: String,
        /// Identifiers reported by the loader tool
        connected: Vec<String>,
    },

    /// Loader tool is older than the minimum supported version
    #[error(
        "loader tool version {found} is not supported, version {required} or newer is required. \
         Update the toolchain installation"
    )]
    UnsupportedLoaderVersion {
        /// Version reported by the tool
        found: semver::Version,
        /// Minimum version
        required: semver::Version,
    },

    /// Loader tool output did not contain a parsable version
    #[error("cannot determine loader tool version from `{0}`")]
    UnknownLoaderVersion(String),

    /// Directory traversal failure
    #[error("{0}")]
    WalkDir(#[from] walkdir::Error),

    /// Archive inspection failure
    #[error("{0}")]
    Zip(#[from] zip::result::ZipError),

    /// Build state serialization failure
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// A background task panicked or was aborted
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Generic error
    #[error("{0}")]
    GenericError(String),
}

/// Attaches path context to I/O results
pub trait ErrorExt<T> {
    /// Wraps the error into [`Error::Fs`] with the given context and path
    fn fs_context(self, context: &'static str, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> ErrorExt<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, context: &'static str, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|error| Error::Fs {
            context,
            path: path.as_ref().to_path_buf(),
            error,
        })
    }
}

/// Converts options and foreign errors into [`Error::GenericError`] with a message
pub trait Context<T> {
    /// Adds a message describing what failed
    fn context<C: Display>(self, context: C) -> Result<T>;
}

impl<T> Context<T> for Option<T> {
    fn context<C: Display>(self, context: C) -> Result<T> {
        self.ok_or_else(|| Error::GenericError(context.to_string()))
    }
}

impl<T> Context<T> for Result<T> {
    fn context<C: Display>(self, context: C) -> Result<T> {
        self.map_err(|e| Error::GenericError(format!("{context}: {e}")))
    }
}

/// Returns early with a [`Error::GenericError`] built from a format string.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::packager::Error::GenericError(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_context_keeps_offending_path() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = result
            .fs_context("copying artifact", "/tmp/out/app.cod")
            .unwrap_err();
        assert_eq!(err.to_string(), "copying artifact /tmp/out/app.cod: gone");
    }

    #[test]
    fn cycle_message_lists_members() {
        let err = Error::DependencyCycle {
            members: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle between projects: a -> b -> a");
    }
}
