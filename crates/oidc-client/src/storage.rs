//! Durable key/value storage and the reactive value built on it
//!
//! `Storage` is the persistence seam: an in-memory map for tests and
//! ephemeral clients, or a directory of JSON files for hosts that must survive
//! a restart mid-flow. `StoredValue<T>` binds one storage key to a
//! `tokio::sync::watch` channel: every `set` notifies subscribers and then
//! persists the JSON-serialized value under the current key.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Boxed future returned by `Storage` methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable string storage keyed by name.
pub trait Storage: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>>;

    fn set<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()>;

    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;
}

/// Process-local storage. Values live as long as the instance.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.values.lock().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.values.lock().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.values.lock().await.remove(key);
            Ok(())
        })
    }
}

/// One `<key>.json` file per key under a directory.
///
/// All writes use atomic temp-file + rename so a crash mid-write never leaves
/// a truncated token behind. A Mutex serializes writers within the process.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Open (and create if needed) the storage directory.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Io(format!("creating storage directory {}: {e}", dir.display())))?;
        info!(path = %dir.display(), "opened file storage");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || key.starts_with('.')
        {
            return Err(Error::Storage(format!("unsupported storage key {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => Ok(Some(contents)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::Io(format!("reading {}: {e}", path.display()))),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            let _guard = self.write_lock.lock().await;
            write_atomic(&path, value.as_bytes()).await
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            let _guard = self.write_lock.lock().await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(format!("removing {}: {e}", path.display()))),
            }
        })
    }
}

/// Write a value to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file holds OAuth tokens.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("storage path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Io("storage path has no file name".into()))?;
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| Error::Io(format!("writing temp storage file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting storage file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp storage file: {e}")))?;

    debug!(path = %path.display(), "persisted value");
    Ok(())
}

/// A value mirrored into one storage key, with change notification.
pub struct StoredValue<T> {
    storage: Arc<dyn Storage>,
    key: RwLock<String>,
    initial: T,
    tx: watch::Sender<T>,
}

impl<T> StoredValue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Hydrate from `key`, falling back to `initial` when nothing usable is
    /// stored there.
    pub async fn load(storage: Arc<dyn Storage>, key: String, initial: T) -> Result<Self> {
        let value = hydrate(storage.as_ref(), &key, &initial).await?;
        let (tx, _rx) = watch::channel(value);
        Ok(Self {
            storage,
            key: RwLock::new(key),
            initial,
            tx,
        })
    }

    /// Current value. No side effects.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value, notify subscribers, and persist it.
    ///
    /// Writers queue on the key lock for both steps, so storage always holds
    /// the last value subscribers were notified of.
    pub async fn set(&self, value: T) -> Result<()> {
        let json = serde_json::to_string(&value)
            .map_err(|e| Error::TokenParse(format!("serializing stored value: {e}")))?;
        let key = self.key.write().await;
        self.tx.send_replace(value);
        self.storage.set(&key, json).await
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    pub async fn key(&self) -> String {
        self.key.read().await.clone()
    }

    /// Point the value at another storage key and re-hydrate from it.
    ///
    /// Subscribers observe the value read from the new key. Later writes
    /// persist under the new key only.
    pub async fn rotate_key(&self, new_key: String) -> Result<()> {
        let mut key = self.key.write().await;
        if *key == new_key {
            return Ok(());
        }
        let value = hydrate(self.storage.as_ref(), &new_key, &self.initial).await?;
        debug!(from = %*key, to = %new_key, "rotated storage key");
        *key = new_key;
        self.tx.send_replace(value);
        Ok(())
    }
}

async fn hydrate<T: DeserializeOwned + Clone>(
    storage: &dyn Storage,
    key: &str,
    initial: &T,
) -> Result<T> {
    let Some(raw) = storage.get(key).await? else {
        return Ok(initial.clone());
    };
    match serde_json::from_str::<Option<T>>(&raw) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Ok(initial.clone()),
        Err(e) => {
            warn!(key, error = %e, "discarding unparseable stored value");
            Ok(initial.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    fn sample(name: &str, count: u32) -> Sample {
        Sample {
            name: name.into(),
            count,
        }
    }

    #[tokio::test]
    async fn load_falls_back_to_initial() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let value = StoredValue::load(storage, "token".into(), sample("init", 0))
            .await
            .unwrap();
        assert_eq!(value.get(), sample("init", 0));
    }

    #[tokio::test]
    async fn set_persists_and_reloads() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let value = StoredValue::load(storage.clone(), "token".into(), Sample::default())
            .await
            .unwrap();
        value.set(sample("saved", 3)).await.unwrap();

        let raw = storage.get("token").await.unwrap().unwrap();
        assert_eq!(raw, r#"{"name":"saved","count":3}"#);

        let reloaded = StoredValue::load(storage, "token".into(), Sample::default())
            .await
            .unwrap();
        assert_eq!(reloaded.get(), sample("saved", 3));
    }

    #[tokio::test]
    async fn unparseable_and_null_values_use_initial() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage.set("broken", "{not json".into()).await.unwrap();
        storage.set("null", "null".into()).await.unwrap();

        let broken = StoredValue::load(storage.clone(), "broken".into(), sample("init", 1))
            .await
            .unwrap();
        assert_eq!(broken.get(), sample("init", 1));

        let null = StoredValue::load(storage, "null".into(), sample("init", 2))
            .await
            .unwrap();
        assert_eq!(null.get(), sample("init", 2));
    }

    #[tokio::test]
    async fn subscribers_see_every_set() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let value = StoredValue::load(storage, "token".into(), Sample::default())
            .await
            .unwrap();
        let mut rx = value.subscribe();

        value.set(sample("first", 1)).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), sample("first", 1));
    }

    /// Memory storage whose writes of `slow` values take a while.
    struct SlowStorage {
        inner: MemoryStorage,
    }

    impl Storage for SlowStorage {
        fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
            self.inner.get(key)
        }

        fn set<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()> {
            Box::pin(async move {
                if value.contains("slow") {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
                self.inner.set(key, value).await
            })
        }

        fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn concurrent_sets_leave_storage_matching_current_value() {
        let storage = Arc::new(SlowStorage {
            inner: MemoryStorage::new(),
        });
        let value = StoredValue::load(storage.clone(), "token".into(), Sample::default())
            .await
            .unwrap();

        let (first, second) = tokio::join!(value.set(sample("slow", 1)), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            value.set(sample("fast", 2)).await
        });
        first.unwrap();
        second.unwrap();

        let persisted: Sample =
            serde_json::from_str(&storage.get("token").await.unwrap().unwrap()).unwrap();
        assert_eq!(value.get(), sample("fast", 2));
        assert_eq!(persisted, value.get());
    }

    #[tokio::test]
    async fn rotate_key_rehydrates_and_redirects_writes() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage
            .set("other", r#"{"name":"other","count":9}"#.into())
            .await
            .unwrap();
        let value = StoredValue::load(storage.clone(), "token".into(), Sample::default())
            .await
            .unwrap();
        value.set(sample("old", 1)).await.unwrap();

        value.rotate_key("other".into()).await.unwrap();
        assert_eq!(value.key().await, "other");
        assert_eq!(value.get(), sample("other", 9));

        value.set(sample("new", 2)).await.unwrap();
        assert_eq!(
            storage.get("token").await.unwrap().unwrap(),
            r#"{"name":"old","count":1}"#
        );
        assert_eq!(
            storage.get("other").await.unwrap().unwrap(),
            r#"{"name":"new","count":2}"#
        );
    }

    #[tokio::test]
    async fn file_storage_roundtrip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("state")).await.unwrap();

        assert_eq!(storage.get("token").await.unwrap(), None);
        storage.set("token", "{\"a\":1}".into()).await.unwrap();
        assert_eq!(
            storage.get("token").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        storage.remove("token").await.unwrap();
        assert_eq!(storage.get("token").await.unwrap(), None);
        // Removing twice is not an error
        storage.remove("token").await.unwrap();
    }

    #[tokio::test]
    async fn file_storage_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().to_path_buf()).await.unwrap();
        assert!(storage.get("../escape").await.is_err());
        assert!(storage.set("", "x".into()).await.is_err());
        assert!(storage.set(".hidden", "x".into()).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().to_path_buf()).await.unwrap();
        storage.set("token", "{}".into()).await.unwrap();

        let metadata = tokio::fs::metadata(dir.path().join("token.json"))
            .await
            .unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
    }
}
