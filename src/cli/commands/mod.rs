//! Subcommand implementations.

pub mod deploy;
pub mod package;
