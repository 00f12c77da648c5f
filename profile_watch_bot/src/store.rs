//! Snapshot persistence. Every store here loads its whole contents at once and
//! replaces its whole contents at once; there are no partial writes.

use std::{
    future::Future,
    io::Write,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot writer task died: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Durable storage of a single snapshot value of type `T`.
///
/// Callers are expected to serialize access themselves (load, mutate, persist
/// under one lock); a store makes no promises about concurrent writers.
pub trait SnapshotStore<T>: Send + Sync + 'static {
    /// Load the whole snapshot. A store that was never written to yields
    /// `T::default()`.
    fn load(&self) -> impl Future<Output = Result<T, Error>> + Send;

    /// Replace the whole snapshot. Returns only once the data is durable.
    fn persist(&self, snapshot: &T) -> impl Future<Output = Result<(), Error>> + Send;
}

/// A snapshot kept as a pretty-printed JSON file.
///
/// Writes go to a temporary file in the same directory, get synced to disk,
/// and are then renamed over the old file, so a crash mid-write leaves the
/// previous snapshot intact.
#[derive(Debug)]
pub struct JsonFileStore<T> {
    path: PathBuf,
    _snapshot: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore {
            path: path.into(),
            _snapshot: PhantomData,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> SnapshotStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    async fn load(&self) -> Result<T, Error> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("{} does not exist yet.", self.path.display());
                return Ok(T::default());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn persist(&self, snapshot: &T) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || replace_file(&path, &bytes)).await?
    }
}

fn replace_file(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// A snapshot kept only in memory. Clones share the same snapshot, which makes
/// it possible to "restart" whatever uses it with the previous state intact.
#[derive(Debug, Default)]
pub struct MemoryStore<T> {
    inner: Arc<MemoryStoreInner<T>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner<T> {
    snapshot: Mutex<T>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        MemoryStore {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> MemoryStore<T> {
    pub fn new(snapshot: T) -> Self {
        MemoryStore {
            inner: Arc::new(MemoryStoreInner {
                snapshot: Mutex::new(snapshot),
                writes: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
            }),
        }
    }

    /// Current contents, bypassing [`SnapshotStore::load`].
    #[must_use]
    pub fn contents(&self) -> T {
        self.inner
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times [`SnapshotStore::persist`] has succeeded.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Make all following writes fail, or succeed again.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }
}

impl<T> SnapshotStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn load(&self) -> Result<T, Error> {
        Ok(self
            .inner
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn persist(&self, snapshot: &T) -> Result<(), Error> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("memory store is set to fail").into());
        }

        *self
            .inner
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::{DateTime, TimeZone, Utc};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Stamp {
        at: Option<DateTime<Utc>>,
        names: Vec<String>,
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::<Stamp>::new(dir.path().join("nope.json"));

        assert_eq!(store.path(), dir.path().join("nope.json"));
        assert_eq!(store.load().await.unwrap(), Stamp::default());
    }

    #[tokio::test]
    async fn timestamps_come_back_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("stamp.json"));

        let at = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 58).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let stamp = Stamp {
            at: Some(at),
            names: vec!["a".into(), "b".into()],
        };

        store.persist(&stamp).await.unwrap();
        assert_eq!(store.load().await.unwrap(), stamp);

        // Replacing keeps only the new contents.
        let stamp = Stamp::default();
        store.persist(&stamp).await.unwrap();
        assert_eq!(store.load().await.unwrap(), stamp);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stamp.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        let store = JsonFileStore::<Stamp>::new(&path);
        assert!(matches!(store.load().await, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("missing").join("stamp.json"));

        assert!(matches!(
            store.persist(&Stamp::default()).await,
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_clones_share_state() {
        let store = MemoryStore::new(vec![1, 2]);
        let other = store.clone();

        other.persist(&vec![3]).await.unwrap();
        assert_eq!(store.load().await.unwrap(), vec![3]);
        assert_eq!(store.writes(), 1);

        store.set_failing(true);
        assert!(other.persist(&vec![4]).await.is_err());
        assert_eq!(store.contents(), vec![3]);
        assert_eq!(store.writes(), 1);
    }
}
