//! Filesystem helpers shared by the packaging steps.

pub mod fs;
