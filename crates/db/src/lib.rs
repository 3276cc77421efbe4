//! Embedded document store.
//!
//! Documents live in memory, in insertion order, behind one lock per
//! collection. When a data directory is configured every write is followed by
//! a JSON snapshot of the whole collection, and snapshots are loaded back when
//! the collection is opened.

mod collection;
mod error;

use std::path::{Path, PathBuf};

pub use collection::{Collection, Document};
pub use error::{DbError, DbResult};

/// Factory for collections sharing one storage location.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    data_dir: Option<PathBuf>,
}

impl DocumentStore {
    /// Store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self { data_dir: None }
    }

    /// Store snapshotting each collection to `{dir}/{name}.json`.
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Open (or create) the named collection.
    pub async fn collection<T: Document>(&self, name: &str) -> DbResult<Collection<T>> {
        let collection = match &self.data_dir {
            Some(dir) => Collection::open(name, dir).await?,
            None => Collection::in_memory(name),
        };

        tracing::info!(
            target: "libris-db",
            collection = name,
            persistent = self.data_dir.is_some(),
            "collection opened"
        );
        Ok(collection)
    }
}
