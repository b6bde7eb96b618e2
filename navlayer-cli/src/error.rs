//! CLI error type.

use std::fmt;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Archive creation or reading failed.
    Archive(String),
    /// Walking the input directory failed.
    Io(std::io::Error),
    /// Bad command-line input.
    InvalidArgument(String),
    /// One or more downloads failed.
    FetchFailed { failed: usize, total: usize },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Archive(message) => write!(f, "archive error: {message}"),
            CliError::Io(error) => write!(f, "I/O error: {error}"),
            CliError::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            CliError::FetchFailed { failed, total } => {
                write!(f, "{failed} of {total} tile downloads failed")
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        CliError::Io(error)
    }
}

impl From<navlayer::archive::ArchiveError> for CliError {
    fn from(error: navlayer::archive::ArchiveError) -> Self {
        CliError::Archive(error.to_string())
    }
}
