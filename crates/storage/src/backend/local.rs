//! Local filesystem storage backend.
//!
//! Files live under a configured root directory (the mods root) and are
//! accessed via `tokio::fs`. Streaming readers and writers hand out plain
//! `std::fs::File`s for use in blocking tasks.

use crate::backend::{BoxSyncRead, BoxSyncWrite, FileInfoStream};
use crate::error::ErrorKind;
use crate::{FileInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use modvault_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("mods", "/srv/dst/mods")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend rooted at an absolute path,
    /// creating the directory if it doesn't exist yet.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Blocking is fine here: it happens once, at startup.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{}` is not within root `{}`", absolute.display(), self.root.display()))
        })?;
        validate_path(relative)
    }

    fn metadata(path: &Path, metadata: &Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(FileInfo::new(path, metadata.len(), UtcDateTime::from(modified)))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn create_parent(&self, absolute: &Path, path: &Path) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(())
    }

    /// Classify one directory entry; pulled out of the stream body so errors
    /// can use `?`.
    async fn process_entry(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = self.relative_path(&path)?;
        if metadata.is_dir() {
            // Keep descending towards the prefix, but don't wander off into
            // sibling directories.
            return match prefix {
                Some(pfx) if !relative.starts_with(pfx) && !pfx.starts_with(&relative) => Ok(WalkEntry::Skip),
                _ => Ok(WalkEntry::Descend(path)),
            };
        }
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
        {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_file() {
            return Ok(WalkEntry::File(Self::metadata(&relative, &metadata)?));
        }
        // Most likely a broken symlink.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        let mut stack = vec![self.root.clone()];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };
                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, validated_prefix.as_deref()).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        self.create_parent(&abs_path, path).await?;
        Ok(fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let abs_path = self.absolute_path(path)?;
        self.create_parent(&abs_path, path).await?;
        let file = fs::File::create(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        self.create_parent(&to_path, to).await?;
        Ok(fs::rename(&from_path, &to_path).await.map_err(|e| Self::map_io_error(e, from))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("mods", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("mods", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("mods", "relative/mods").is_err());
    }

    #[test]
    fn test_new_creates_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/mods");
        LocalBackend::new("mods", &root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_absolute_and_relative_paths() {
        let (temp_dir, backend) = backend();
        let expected = temp_dir.path().join("1/modinfo.lua");
        assert_eq!(backend.absolute_path("1/modinfo.lua").unwrap(), expected);
        assert_eq!(backend.relative_path(&expected).unwrap(), Path::new("1/modinfo.lua"));
        assert!(backend.absolute_path("../escape").is_err());
        assert!(backend.relative_path("/somewhere/else").is_err());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (_dir, backend) = backend();
        backend.write(Path::new("1/modinfo.lua"), b"name = 'x'").await.unwrap();
        assert_eq!(backend.read(Path::new("1/modinfo.lua")).await.unwrap(), b"name = 'x'");
        assert!(backend.exists(Path::new("1/modinfo.lua")).await.unwrap());
        assert!(!backend.exists(Path::new("1/modmain.lua")).await.unwrap());
    }

    #[tokio::test]
    async fn test_streaming_reader_and_writer() {
        let (_dir, backend) = backend();
        let mut writer = backend.writer(Path::new("1/scripts/main.lua")).await.unwrap();
        writer.write_all(b"print('hi')").unwrap();
        writer.flush().unwrap();
        drop(writer);
        let mut reader = backend.reader(Path::new("1/scripts/main.lua")).await.unwrap();
        let mut contents = String::new();
        reader.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "print('hi')");
    }

    #[tokio::test]
    async fn test_reader_not_found() {
        let (_dir, backend) = backend();
        let err = backend.reader(Path::new("1/modmain.lua")).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, backend) = backend();
        backend.write(Path::new("1/.store.json"), b"{}").await.unwrap();
        backend.delete(Path::new("1/.store.json")).await.unwrap();
        assert!(!backend.exists(Path::new("1/.store.json")).await.unwrap());
        let err = backend.delete(Path::new("1/.store.json")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rename_replaces_destination() {
        let (_dir, backend) = backend();
        backend.write(Path::new("1/.store.json"), b"old").await.unwrap();
        backend.write(Path::new("1/.store.json.tmp"), b"new").await.unwrap();
        backend.rename(Path::new("1/.store.json.tmp"), Path::new("1/.store.json")).await.unwrap();
        assert_eq!(backend.read(Path::new("1/.store.json")).await.unwrap(), b"new");
        assert!(!backend.exists(Path::new("1/.store.json.tmp")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_all() {
        let (_dir, backend) = backend();
        backend.write(Path::new("1/.store.json"), b"{}").await.unwrap();
        backend.write(Path::new("1/modinfo.lua"), b"x").await.unwrap();
        backend.write(Path::new("2/.store.json"), b"{}").await.unwrap();
        assert_eq!(backend.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_prefix_is_component_based() {
        let (_dir, backend) = backend();
        backend.write(Path::new("35/.store.json"), b"{}").await.unwrap();
        backend.write(Path::new("351325790/.store.json"), b"{}").await.unwrap();
        backend.write(Path::new("351325790/scripts/a.lua"), b"x").await.unwrap();
        let files = backend.list(Some(Path::new("351325790"))).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.path.starts_with("351325790")));
        let nested = backend.list(Some(Path::new("351325790/scripts"))).await.unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].path, Path::new("351325790/scripts/a.lua"));
        assert_eq!(nested[0].size, 1);
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let (_dir, backend) = backend();
        assert!(backend.list(Some(Path::new("404"))).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_dir, backend) = backend();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("1/../../escape"), b"x").await.is_err());
        assert!(backend.writer(Path::new("../escape")).await.is_err());
        assert!(backend.delete(Path::new("../../file")).await.is_err());
    }
}
