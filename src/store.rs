//! JSON-array-on-disk record store.
//!
//! Each store owns one file holding a JSON array of records. Reads parse
//! the whole array; writes replace the whole file. Mutations are
//! serialized by a per-store mutex and the file is swapped in with a
//! rename, so concurrent writers cannot drop each other's changes and a
//! reader never observes a half-written array.
//!
//! A file that exists but does not parse as `Vec<T>` is read as empty,
//! but mutations refuse to run over it until it is repaired.

use std::{
    io::ErrorKind,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{path} holds records that do not parse; refusing to overwrite: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

enum Snapshot<T> {
    Records(Vec<T>),
    Unreadable(serde_json::Error),
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct JsonStore<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _records: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _records: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the backing file as an empty array if it does not exist yet.
    pub async fn ensure(&self) -> Result<(), StoreError> {
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        if !exists {
            self.write_all(&[]).await?;
        }
        Ok(())
    }

    /// Load every record. A missing or blank file is an empty table; so is
    /// a file that no longer parses, which is logged and left untouched.
    pub async fn read_all(&self) -> Result<Vec<T>, StoreError> {
        match self.load().await? {
            Snapshot::Records(records) => Ok(records),
            Snapshot::Unreadable(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable store file, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn load(&self) -> Result<Snapshot<T>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Snapshot::Records(Vec::new())),
            Err(e) => return Err(io_err(&self.path, e)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Snapshot::Records(Vec::new()));
        }
        Ok(match serde_json::from_slice::<Vec<T>>(&raw) {
            Ok(records) => Snapshot::Records(records),
            Err(e) => Snapshot::Unreadable(e),
        })
    }

    /// Replace the whole table.
    pub async fn write_all(&self, records: &[T]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.persist(records).await
    }

    pub async fn find(&self, pred: impl Fn(&T) -> bool) -> Result<Option<T>, StoreError> {
        Ok(self.read_all().await?.into_iter().find(|r| pred(r)))
    }

    pub async fn filter(&self, pred: impl Fn(&T) -> bool) -> Result<Vec<T>, StoreError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|r| pred(r))
            .collect())
    }

    pub async fn insert(&self, record: T) -> Result<T, StoreError> {
        self.mutate(move |records| {
            records.push(record.clone());
            (record, true)
        })
        .await
    }

    /// Append `record` unless some stored record satisfies `conflicts`.
    /// Returns `None` when a conflicting record was found.
    pub async fn insert_unless(
        &self,
        record: T,
        conflicts: impl Fn(&T) -> bool,
    ) -> Result<Option<T>, StoreError> {
        self.mutate(move |records| {
            if records.iter().any(|r| conflicts(r)) {
                return (None, false);
            }
            records.push(record.clone());
            (Some(record), true)
        })
        .await
    }

    /// Apply `apply` to the first record matching `pred` and return the
    /// updated copy.
    pub async fn update_where(
        &self,
        pred: impl Fn(&T) -> bool,
        apply: impl FnOnce(&mut T),
    ) -> Result<Option<T>, StoreError> {
        self.mutate(move |records| match records.iter_mut().find(|r| pred(r)) {
            Some(record) => {
                apply(record);
                (Some(record.clone()), true)
            }
            None => (None, false),
        })
        .await
    }

    /// Remove and return the first record matching `pred`.
    pub async fn remove_where(&self, pred: impl Fn(&T) -> bool) -> Result<Option<T>, StoreError> {
        self.mutate(move |records| match records.iter().position(|r| pred(r)) {
            Some(idx) => (Some(records.remove(idx)), true),
            None => (None, false),
        })
        .await
    }

    async fn mutate<R>(&self, f: impl FnOnce(&mut Vec<T>) -> (R, bool)) -> Result<R, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = match self.load().await? {
            Snapshot::Records(records) => records,
            Snapshot::Unreadable(source) => {
                return Err(StoreError::Unreadable {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let (out, changed) = f(&mut records);
        if changed {
            self.persist(&records).await?;
        }
        Ok(out)
    }

    // Caller must hold `write_lock`.
    async fn persist(&self, records: &[T]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        let body = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        debug!(path = %self.path.display(), count = records.len(), "store written");
        Ok(())
    }
}
