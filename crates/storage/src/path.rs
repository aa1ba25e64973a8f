//! Path validation.
//!
//! Relative paths inside an artifact come from remote manifests and archive
//! entries, so they are attacker-controlled. Everything handed to a backend
//! goes through [`validate`] first.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates and normalizes a storage path.
///
/// Resolves `.` and `..` components lexically and rejects anything that would
/// climb above the storage root, contains a null byte, carries a Windows
/// prefix, or normalizes to nothing.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use modvault_storage::validate_path;
///
/// assert!(validate_path("351325790/modinfo.lua").is_ok());
/// assert!(validate_path("351325790/scripts/../modmain.lua").is_ok());
/// assert!(validate_path("../351325790/modinfo.lua").is_err());
/// assert!(validate_path("351325790/../../etc/passwd").is_err());
/// assert_eq!(
///     validate_path("./351325790//images/./icon.tex/").unwrap(),
///     Path::new("351325790/images/icon.tex")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(segment) => {
                // Null bytes survive Path::components() on Unix but truncate
                // paths in the underlying syscalls.
                if segment.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(segment);
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(invalid());
    }
    Ok(components.into_iter().collect())
}
