use std::path::PathBuf;

use thiserror::Error;

use crate::object::ObjectId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt pack {path:?}: {reason}")]
    CorruptPack { path: PathBuf, reason: String },

    #[error("unsupported pack index version {version} in {path:?}")]
    UnsupportedIndexVersion { path: PathBuf, version: u32 },

    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),

    #[error("expected {expected:?} object {id}, found {actual:?}")]
    UnexpectedKind {
        id: ObjectId,
        expected: gix_object::Kind,
        actual: gix_object::Kind,
    },

    #[error("invalid delta: {0}")]
    Delta(String),

    #[error("malformed object: {0}")]
    Malformed(String),

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("{what} offset {offset} does not fit in 32 bits")]
    OffsetOverflow { what: &'static str, offset: u64 },
}

impl Error {
    pub(crate) fn corrupt_pack(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptPack {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt_object(id: ObjectId, reason: impl Into<String>) -> Self {
        Error::CorruptObject {
            id,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
