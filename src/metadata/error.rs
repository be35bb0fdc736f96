use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("database {0} not found")]
    NotFound(String),
    #[error("database {requested} conflicts with existing database {existing}")]
    NameConflict { requested: String, existing: String },
    #[error("database {0} already exists")]
    AlreadyExists(String),

    #[error("version conflict, expected: {expected}, actual: {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupted metadata record {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
