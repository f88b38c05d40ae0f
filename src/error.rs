use std::path::PathBuf;

use thiserror::Error;

use crate::volume_loader::VolumeLoaderError;

#[derive(Debug, Error)]
pub enum PhantomError {
    #[error("labels without a lookup entry: {codes:?}")]
    InvalidLabel { codes: Vec<i64> },

    #[error("volume has a zero-length axis")]
    EmptyVolume,

    #[error("output path {path} is occupied and cannot be cleared: {source}")]
    StoreConflict {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no phantom preset named {0:?}")]
    UnknownPreset(String),

    #[error("no material table named {0:?}")]
    UnknownMaterialTable(String),

    #[error("corrupt store: {0}")]
    CorruptStore(String),

    #[error(transparent)]
    Loader(#[from] VolumeLoaderError),
}

impl PhantomError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PhantomError>;
