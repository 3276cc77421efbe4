use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;

use crate::error::{DbError, DbResult};

/// A record that can be stored in a [`Collection`].
pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Primary key. Must never change once the document is stored.
    fn id(&self) -> &str;
}

/// Insertion-ordered set of documents keyed by id.
///
/// Every mutating call holds the write lock for its whole duration, snapshot
/// included, so conditional writes (`insert_unless`, `update_with`,
/// `remove_with`) are atomic with respect to each other.
pub struct Collection<T> {
    name: String,
    docs: RwLock<IndexMap<String, T>>,
    snapshot: Option<PathBuf>,
}

impl<T: Document> Collection<T> {
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: RwLock::new(IndexMap::new()),
            snapshot: None,
        }
    }

    /// Open a snapshotted collection, loading `{dir}/{name}.json` if present.
    pub async fn open(name: impl Into<String>, dir: &Path) -> DbResult<Self> {
        let name = name.into();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| DbError::Io {
                path: dir.to_path_buf(),
                source,
            })?;

        let path = dir.join(format!("{name}.json"));
        let docs = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let loaded: Vec<T> = serde_json::from_slice(&bytes)?;
                loaded
                    .into_iter()
                    .map(|doc| (doc.id().to_string(), doc))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexMap::new(),
            Err(source) => return Err(DbError::Io { path, source }),
        };

        tracing::debug!(collection = %name, documents = docs.len(), "snapshot loaded");

        Ok(Self {
            name,
            docs: RwLock::new(docs),
            snapshot: Some(path),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Every document, in insertion order.
    pub async fn all(&self) -> DbResult<Vec<T>> {
        Ok(self.docs.read().await.values().cloned().collect())
    }

    /// Documents matching `filter`, in insertion order.
    pub async fn find<F>(&self, filter: F) -> DbResult<Vec<T>>
    where
        F: Fn(&T) -> bool,
    {
        Ok(self
            .docs
            .read()
            .await
            .values()
            .filter(|doc| filter(doc))
            .cloned()
            .collect())
    }

    pub async fn find_one<F>(&self, filter: F) -> DbResult<Option<T>>
    where
        F: Fn(&T) -> bool,
    {
        Ok(self
            .docs
            .read()
            .await
            .values()
            .find(|doc| filter(doc))
            .cloned())
    }

    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<T>> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    /// Add a new document. Fails with [`DbError::DuplicateId`] if the id is taken.
    pub async fn insert(&self, doc: T) -> DbResult<T> {
        self.insert_unless(doc, |_| false).await
    }

    /// Add a new document unless an existing one satisfies `conflicts`.
    pub async fn insert_unless<F>(&self, doc: T, conflicts: F) -> DbResult<T>
    where
        F: Fn(&T) -> bool,
    {
        let mut docs = self.docs.write().await;
        let id = doc.id().to_string();

        if docs.contains_key(&id) {
            return Err(DbError::DuplicateId(id));
        }
        if docs.values().any(|existing| conflicts(existing)) {
            return Err(DbError::Conflict {
                collection: self.name.clone(),
            });
        }

        docs.insert(id.clone(), doc.clone());
        if let Err(err) = self.persist(&docs).await {
            docs.shift_remove(&id);
            return Err(err);
        }
        Ok(doc)
    }

    /// Insert or replace by id. A replaced document keeps its position.
    pub async fn save(&self, doc: T) -> DbResult<T> {
        let mut docs = self.docs.write().await;
        let id = doc.id().to_string();

        let previous = docs.insert(id.clone(), doc.clone());
        if let Err(err) = self.persist(&docs).await {
            match previous {
                Some(previous) => {
                    docs.insert(id, previous);
                }
                None => {
                    docs.shift_remove(&id);
                }
            }
            return Err(err);
        }
        Ok(doc)
    }

    /// Remove a document, returning it if it existed.
    pub async fn delete_by_id(&self, id: &str) -> DbResult<Option<T>> {
        self.remove_with(id, |_| Ok::<(), DbError>(())).await
    }

    /// Atomically read, mutate, and write back one document.
    ///
    /// `mutate` runs on a copy; when it fails nothing is written and its error
    /// is returned. Returns `Ok(None)` when no document has this id.
    pub async fn update_with<F, E>(&self, id: &str, mutate: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut T) -> Result<(), E>,
        E: From<DbError>,
    {
        let mut docs = self.docs.write().await;
        let Some(current) = docs.get(id) else {
            return Ok(None);
        };

        let mut next = current.clone();
        mutate(&mut next)?;
        debug_assert_eq!(next.id(), id, "document ids are immutable");

        let previous = docs.insert(id.to_string(), next.clone());
        if let Err(err) = self.persist(&docs).await {
            if let Some(previous) = previous {
                docs.insert(id.to_string(), previous);
            }
            return Err(err.into());
        }
        Ok(Some(next))
    }

    /// Atomically check and remove one document.
    ///
    /// The document is removed only if `check` succeeds. Returns `Ok(None)`
    /// when no document has this id.
    pub async fn remove_with<F, E>(&self, id: &str, check: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&T) -> Result<(), E>,
        E: From<DbError>,
    {
        let mut docs = self.docs.write().await;
        let Some(current) = docs.get(id) else {
            return Ok(None);
        };
        check(current)?;

        let Some((index, key, removed)) = docs.shift_remove_full(id) else {
            return Ok(None);
        };
        if let Err(err) = self.persist(&docs).await {
            docs.shift_insert(index, key, removed);
            return Err(err.into());
        }
        Ok(Some(removed))
    }

    async fn persist(&self, docs: &IndexMap<String, T>) -> DbResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let values: Vec<&T> = docs.values().collect();
        let bytes = serde_json::to_vec_pretty(&values)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| DbError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|source| DbError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(())
    }
}
