//! In-memory storage backend for testing.

use super::{BoxSyncRead, BoxSyncWrite, FileInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use time::UtcDateTime;

type Files = Arc<RwLock<HashMap<PathBuf, (UtcDateTime, Vec<u8>)>>>;

/// In-memory storage backend for testing.
///
/// Files live in a `HashMap` behind a synchronous [`RwLock`]: the lock is
/// never held across an await, and streaming writers need to commit from
/// inside blocking tasks.
///
/// # Examples
///
/// ```
/// use modvault_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("1/modinfo.lua", b"name = 'x'")]);
/// assert!(backend.exists(Path::new("1/modinfo.lua")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: Files,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation: broken test setup should never
    /// produce a passing test.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = UtcDateTime::now();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self { name: "mock".to_string(), storage: Arc::new(RwLock::new(map)) }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overwrite a file's bytes in place, bypassing the trait. Handy for
    /// simulating tampering between two operations.
    pub fn tamper(&self, path: impl AsRef<Path>, mutate: impl FnOnce(&mut Vec<u8>)) {
        let mut guard = self.storage.write().unwrap_or_else(PoisonError::into_inner);
        let (_modified, data) = guard
            .get_mut(path.as_ref())
            .unwrap_or_else(|| panic!("MockBackend::tamper: no file at {}", path.as_ref().display()));
        mutate(data);
    }

    fn get(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let guard = self.storage.read().unwrap_or_else(PoisonError::into_inner);
        match guard.get(&path) {
            Some((_modified, data)) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    fn put(storage: &Files, path: PathBuf, data: Vec<u8>) {
        storage.write().unwrap_or_else(PoisonError::into_inner).insert(path, (UtcDateTime::now(), data));
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

/// Buffers writes and commits them to the mock storage on flush.
struct MockWriter {
    path: PathBuf,
    buffer: Vec<u8>,
    storage: Files,
}
impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        MockBackend::put(&self.storage, self.path.clone(), self.buffer.clone());
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        // Snapshot before the stream starts; the lock guard isn't Send.
        let entries: Vec<FileInfo> = {
            let guard = self.storage.read().unwrap_or_else(PoisonError::into_inner);
            guard
                .iter()
                .filter(|(path, _)| validated_prefix.as_ref().is_none_or(|pfx| path.starts_with(pfx)))
                .map(|(path, (modified, data))| FileInfo::new(path.clone(), data.len() as u64, *modified))
                .collect()
        };
        Box::pin(stream! {
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().unwrap_or_else(PoisonError::into_inner).contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.get(path)
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        Ok(Box::new(Cursor::new(self.get(path)?)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        Self::put(&self.storage, path, data.to_vec());
        Ok(())
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let path = validate_path(path)?;
        Ok(Box::new(MockWriter { path, buffer: Vec::new(), storage: Arc::clone(&self.storage) }))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        let removed = self.storage.write().unwrap_or_else(PoisonError::into_inner).remove(&path);
        match removed {
            Some(_) => Ok(()),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut guard = self.storage.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = guard.remove(&from) else {
            exn::bail!(ErrorKind::NotFound(from));
        };
        guard.insert(to, entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MockBackend::default();
        backend.write(Path::new("1/modinfo.lua"), b"hello").await.unwrap();
        assert_eq!(backend.read(Path::new("1/modinfo.lua")).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("missing.lua")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_writer_commits_on_flush() {
        let backend = MockBackend::default();
        let mut writer = backend.writer(Path::new("1/modmain.lua")).await.unwrap();
        writer.write_all(b"partial").unwrap();
        assert!(!backend.exists(Path::new("1/modmain.lua")).await.unwrap());
        writer.flush().unwrap();
        let mut reader = backend.reader(Path::new("1/modmain.lua")).await.unwrap();
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"partial");
    }

    #[tokio::test]
    async fn test_tamper() {
        let backend = MockBackend::with_files([("1/modmain.lua", b"abc")]);
        backend.tamper("1/modmain.lua", |data| data[0] ^= 0xFF);
        assert_ne!(backend.read(Path::new("1/modmain.lua")).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let backend = MockBackend::with_files([("1/.store.json.tmp", b"{}")]);
        backend.rename(Path::new("1/.store.json.tmp"), Path::new("1/.store.json")).await.unwrap();
        assert!(backend.exists(Path::new("1/.store.json")).await.unwrap());
        backend.delete(Path::new("1/.store.json")).await.unwrap();
        let err = backend.delete(Path::new("1/.store.json")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = backend.rename(Path::new("nope"), Path::new("also-nope")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MockBackend::with_files([
            ("1/.store.json", Vec::from(*b"{}")),
            ("1/modinfo.lua", Vec::from(*b"x")),
            ("12/.store.json", Vec::from(*b"{}")),
        ]);
        let files = backend.list(Some(Path::new("1"))).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(backend.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MockBackend::default();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"bad").await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
