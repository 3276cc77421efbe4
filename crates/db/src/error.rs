use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("document '{0}' already exists")]
    DuplicateId(String),

    #[error("write rejected by a conflicting document in '{collection}'")]
    Conflict { collection: String },

    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;
