//! Error taxonomy for fatal run failures.
//!
//! Per-command failures are not represented here: they are converted into
//! [`crate::model::Report`] values by the worker that observed them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FuzzError {
    #[error("wordlist not found: {}", path.display())]
    WordlistNotFound { path: PathBuf },

    #[error("failed to read wordlist {}: {source}", path.display())]
    WordlistIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("interrupted")]
    Interrupted,
}

impl FuzzError {
    /// Classify an I/O failure on the wordlist.
    pub fn wordlist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            FuzzError::WordlistNotFound { path }
        } else {
            FuzzError::WordlistIo { path, source }
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            FuzzError::Interrupted => 130,
            _ => 1,
        }
    }
}
