//! Incremental packager and deployer for multi-project handheld applications.
//!
//! Orders dependent projects, recompiles only what is stale, signs code that
//! calls protected APIs, publishes deliverables and pushes them to a running
//! simulator or a wired device.
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod cli;
pub mod error;
pub mod metadata;
pub mod packager;

// Re-export commonly used types
pub use error::{CliError, CodshipError, Result};
