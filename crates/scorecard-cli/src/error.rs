//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Scorecard(#[from] scorecard_common::Error),

    #[error("config file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },
}

impl Error {
    /// Problems the user can fix without touching the cluster
    pub fn is_usage(&self) -> bool {
        match self {
            Error::Scorecard(e) => e.is_configuration(),
            Error::ConfigNotFound { .. } => true,
        }
    }
}
