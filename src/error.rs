use std::path::PathBuf;

use thiserror::Error;

use crate::decoder::DecodeError;

/// Library error type for lock-screen image operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A widget property is missing, mistyped or out of range.
    #[error("invalid image widget configuration: {0}")]
    Config(String),

    /// An image could not be decoded into a usable frame timeline.
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
