//! Uniform result of every pipeline stage.

use std::fmt;

/// Outcome of a pipeline stage.
///
/// `Failed` and `Cancelled` stop the pipeline of the project they belong to,
/// sibling projects in the same batch keep going.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    /// The stage completed
    #[default]
    Ok,
    /// A user or monitor cancelled the stage. Not an error.
    Cancelled,
    /// Operational error with a user readable reason
    Failed(String),
}

impl Status {
    /// Numeric code handed to callers (host IDE severity values).
    pub fn code(&self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Failed(_) => 4,
            Status::Cancelled => 8,
        }
    }

    /// Creates a failed status from anything printable
    pub fn failed(reason: impl fmt::Display) -> Self {
        Status::Failed(reason.to_string())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Status::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Status::Failed(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => f.write_str("OK"),
            Status::Cancelled => f.write_str("CANCELLED"),
            Status::Failed(reason) => write!(f, "FAILED({reason})"),
        }
    }
}

impl<T> From<super::Result<T>> for Status {
    fn from(result: super::Result<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(e) => Status::failed(e),
        }
    }
}
