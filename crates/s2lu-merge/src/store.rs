//! Output storage.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Somewhere derived artifacts can be written.
///
/// Keys are `/`-separated relative paths. A successful `put` must be
/// all-or-nothing: readers see either the previous object or the new one.
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object.
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Remove `key`; removing a missing key is not an error.
    fn delete(&self, key: &str) -> io::Result<()>;

    /// Move the object at `from` to `to`, replacing any object there.
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Human-readable location of `key`, for logs.
    fn describe(&self, key: &str) -> String;
}

impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        (**self).put(key, bytes)
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        (**self).delete(key)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        (**self).rename(from, to)
    }

    fn describe(&self, key: &str) -> String {
        (**self).describe(key)
    }
}

// ============================================================================
// Local filesystem
// ============================================================================

/// Stores objects as files under a root directory.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    next_temp: AtomicU64,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_temp: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of `key`.
    pub fn path_of(&self, key: &str) -> io::Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid object key '{}'", key),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalStore {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_of(key)?;
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        // Temp file in the destination directory so the rename stays on one filesystem
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            self.next_temp.fetch_add(1, Ordering::Relaxed)
        ));

        let result = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &path));

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        debug!(path = %path.display(), bytes = bytes.len(), "stored object");
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_of(key)?) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let target = self.path_of(to)?;
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::rename(self.path_of(from)?, &target)
    }

    fn describe(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Keeps objects in memory; used by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Puts whose key contains this pattern are rejected.
    rejected: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that fails every `put` whose key contains `pattern`.
    pub fn rejecting(pattern: impl Into<String>) -> Self {
        let store = Self::new();
        store.reject(Some(pattern.into()));
        store
    }

    /// Start (or, with `None`, stop) failing puts whose key contains `pattern`.
    pub fn reject(&self, pattern: Option<String>) {
        if let Ok(mut rejected) = self.rejected.lock() {
            *rejected = pattern;
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| io::Error::other("memory store lock poisoned"))
    }
}

impl ObjectStore for MemoryStore {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let rejected = self
            .rejected
            .lock()
            .map_err(|_| io::Error::other("memory store lock poisoned"))?
            .as_deref()
            .is_some_and(|pattern| key.contains(pattern));
        if rejected {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("write rejected for '{}'", key),
            ));
        }
        self.lock()?.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut objects = self.lock()?;
        let bytes = objects.remove(from).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no object '{}'", from))
        })?;
        objects.insert(to.to_string(), bytes);
        Ok(())
    }

    fn describe(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_put_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        store.put("output/T30TXM_20240101.tif", b"first").unwrap();
        store.put("output/T30TXM_20240101.tif", b"second").unwrap();

        let path = dir.path().join("output/T30TXM_20240101.tif");
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // No temp files left behind
        let entries: Vec<_> = fs::read_dir(dir.path().join("output")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_local_rejects_escaping_keys() {
        let store = LocalStore::new("/tmp/s2lu-store");
        for key in ["../etc/passwd", "/abs/key.tif", "a/../../b.tif", ""] {
            let err = store.path_of(key).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "key {key:?}");
        }
        assert!(store.path_of("output/a.tif").is_ok());
    }

    #[test]
    fn test_local_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("a.json", b"{}").unwrap();
        store.delete("a.json").unwrap();
        assert!(!dir.path().join("a.json").exists());

        // Missing keys are fine
        store.delete("a.json").unwrap();
    }

    #[test]
    fn test_local_rename_replaces() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("output/a.tif", b"old").unwrap();
        store.put("output/a.tif.staged", b"new").unwrap();

        store.rename("output/a.tif.staged", "output/a.tif").unwrap();
        assert_eq!(fs::read(dir.path().join("output/a.tif")).unwrap(), b"new");
        assert!(!dir.path().join("output/a.tif.staged").exists());

        assert!(store.rename("output/missing", "output/b.tif").is_err());
    }

    #[test]
    fn test_memory_rename_and_reject_toggle() {
        let store = MemoryStore::new();
        store.put("a.staged", b"bytes").unwrap();
        store.rename("a.staged", "a.tif").unwrap();
        assert_eq!(store.keys(), vec!["a.tif".to_string()]);
        assert!(store.rename("a.staged", "a.tif").is_err());

        store.reject(Some(".json".into()));
        assert!(store.put("a.json.staged", b"{}").is_err());
        store.reject(None);
        store.put("a.json", b"{}").unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::rejecting(".json");
        store.put("output/a.tif", b"raster").unwrap();
        assert!(store.put("output/a.json", b"{}").is_err());

        assert_eq!(store.get("output/a.tif").as_deref(), Some(&b"raster"[..]));
        assert_eq!(store.keys(), vec!["output/a.tif".to_string()]);

        store.delete("output/a.tif").unwrap();
        assert!(store.keys().is_empty());
    }
}
