use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("reading department registry {}: {source}", .path.display())]
    RegistryIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing department registry {}: {source}", .path.display())]
    RegistryParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid week selection {0:?}")]
    InvalidWeeks(String),
}
