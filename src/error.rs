use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy shared by the pipeline, its adapters and the HTTP surface.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad request input: missing file, unknown profile, unsupported type.
    #[error("{message}")]
    Input { message: String },

    /// An external tool exited non-zero or could not be launched.
    #[error("{tool} failed")]
    Tool { tool: String, details: String },

    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    /// A tool reported success but its declared output file is absent.
    #[error("{tool} reported success but {} is missing", path.display())]
    OutputMissing { tool: String, path: PathBuf },

    /// Every block failed locally; nothing usable is left to return.
    #[error("no usable output was produced")]
    NoOutput { details: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    ExternalTool,
    Timeout,
    OutputMissing,
    NoOutput,
    Internal,
}

impl Error {
    pub fn input(message: impl Into<String>) -> Self {
        Error::Input {
            message: message.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, details: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            details: details.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Input { .. } => ErrorKind::Input,
            Error::Tool { .. } => ErrorKind::ExternalTool,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::OutputMissing { .. } => ErrorKind::OutputMissing,
            Error::NoOutput { .. } => ErrorKind::NoOutput,
            Error::Io(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_input(&self) -> bool {
        self.kind() == ErrorKind::Input
    }

    /// Diagnostic text safe to hand back to a caller.
    pub fn details(&self) -> Option<String> {
        match self {
            Error::Tool { details, .. } if !details.trim().is_empty() => {
                Some(details.trim().to_string())
            }
            Error::OutputMissing { path, .. } => Some(path.display().to_string()),
            Error::NoOutput { details } => Some(details.clone()),
            Error::Io(err) => Some(err.to_string()),
            _ => None,
        }
    }
}
