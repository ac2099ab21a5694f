use std::path::PathBuf;

use thiserror::Error;

pub type VeilResult<T> = Result<T, VeilError>;

#[derive(Debug, Error)]
pub enum VeilError {
    /// Config file unreadable, structurally invalid, or of an unsupported version.
    #[error("config format error: {0}")]
    ConfigFormat(String),

    /// Wrong password and corrupted ciphertext both land here.
    #[error("unlock failed: wrong password or corrupted configuration")]
    Authentication,

    #[error("conflicting options: {0}")]
    ConflictingOptions(String),

    #[error("volume is locked: unlock it before reading key material")]
    Locked,

    #[error("refusing to overwrite existing config: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VeilError {
    /// True for outcomes the caller should report as "bad password".
    pub fn is_authentication(&self) -> bool {
        matches!(self, VeilError::Authentication)
    }
}
