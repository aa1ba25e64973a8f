//! Persisted records and the cascading integrity check.
//!
//! Layout under the storage root, one directory per artifact id:
//!
//! ```text
//! 351325790/
//! ├── .store.json      record document
//! ├── .manifest.json   depot manifest (UGC only)
//! ├── modinfo.lua      tracked
//! ├── modmain.lua      tracked
//! └── ...              everything else the artifact ships
//! ```

use crate::error::{ErrorKind, Result};
use crate::models::{Manifest, ModRecord, RecordDocument};
use async_stream::stream;
use derive_more::Display;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use modvault_digest::{Digest, TrackedDigest};
use modvault_intern::InternPool;
use modvault_storage::BackendHandle;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::UtcDateTime;

pub const RECORD_FILE: &str = ".store.json";
pub const MANIFEST_FILE: &str = ".manifest.json";
pub const INFO_FILE: &str = "modinfo.lua";
pub const MAIN_FILE: &str = "modmain.lua";

/// Why a record failed verification.
///
/// A miss is an ordinary outcome, not an error: the caller re-downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Miss {
    #[display("no record file")]
    NoRecord,
    #[display("record file could not be parsed")]
    Unreadable,
    #[display("record is from a different remote update")]
    Stale,
    #[display("manifest digest presence disagrees with the UGC flag")]
    UgcMismatch,
    #[display("manifest file is missing")]
    ManifestMissing,
    #[display("manifest file does not match its recorded digest")]
    ManifestDigest,
    #[display("manifest filenames are still encrypted")]
    ManifestEncrypted,
    #[display("manifest has no entry for {_0}")]
    ManifestEntryMissing(&'static str),
    #[display("manifest hash for {_0} does not match the record")]
    ManifestEntryDigest(&'static str),
    #[display("{_0} is missing")]
    FileMissing(&'static str),
    #[display("{_0} does not match its recorded digest")]
    FileDigest(&'static str),
}

/// Outcome of [`Repository::check`].
#[derive(Debug)]
pub enum Verdict {
    Verified(Box<ModRecord>),
    Miss(Miss),
}

impl Verdict {
    pub fn into_record(self) -> Option<ModRecord> {
        match self {
            Self::Verified(record) => Some(*record),
            Self::Miss(_) => None,
        }
    }
}

/// Either the value a verification step produced, or the reason it failed.
type Checked<T> = std::result::Result<T, Miss>;

/// Loads, saves and verifies per-artifact records.
///
/// The files on disk are the source of truth. Verification only ever reads
/// them; a record that fails any step is reported as a [`Miss`] and it is up
/// to the caller to replace it.
#[derive(Clone)]
pub struct Repository {
    backend: BackendHandle,
    pool: Arc<InternPool>,
}

impl Repository {
    pub fn new(backend: BackendHandle, pool: Arc<InternPool>) -> Self {
        Self { backend, pool }
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn pool(&self) -> &Arc<InternPool> {
        &self.pool
    }

    /// Path of a file inside an artifact's directory.
    pub fn artifact_path(id: u64, name: impl AsRef<Path>) -> PathBuf {
        PathBuf::from(id.to_string()).join(name)
    }

    /// Whether a record file exists for `id`, verified or not.
    pub async fn exists(&self, id: u64) -> Result<bool> {
        self.backend.exists(&Self::artifact_path(id, RECORD_FILE)).await.or_raise(|| ErrorKind::Storage)
    }

    // =========================================================================
    // Load/Save
    // =========================================================================

    /// Load a record without verifying it.
    ///
    /// Returns `Ok(None)` if there is no record file, and
    /// [`ErrorKind::InvalidData`] if there is one but it can't be parsed or is
    /// missing required fields.
    pub async fn load(&self, id: u64) -> Result<Option<ModRecord>> {
        let path = Self::artifact_path(id, RECORD_FILE);
        let bytes = match self.backend.read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
        };
        let doc: RecordDocument = serde_json::from_slice(&bytes).or_raise(|| ErrorKind::InvalidData("record"))?;
        let mut record = ModRecord::try_from(doc)?;
        if record.id != id {
            exn::bail!(ErrorKind::InvalidData("record id"));
        }
        record.metadata.intern(&self.pool);
        Ok(Some(record))
    }

    /// Persist a record, replacing any previous one.
    ///
    /// The document is written next to its final location and renamed over
    /// it, so a crash mid-write never leaves a truncated record behind.
    #[tracing::instrument(level = "debug", skip_all, fields(id = record.id))]
    pub async fn save(&self, record: &ModRecord) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&RecordDocument::from(record))
            .or_raise(|| ErrorKind::InvalidData("record"))?;
        let path = Self::artifact_path(record.id, RECORD_FILE);
        let temp = Self::artifact_path(record.id, format!("{RECORD_FILE}.tmp"));
        self.backend.write(&temp, &bytes).await.or_raise(|| ErrorKind::Storage)?;
        self.backend.rename(&temp, &path).await.or_raise(|| ErrorKind::Storage)?;
        Ok(())
    }

    /// Persist a manifest and return the digest to record for it.
    pub async fn write_manifest(&self, id: u64, manifest: &Manifest) -> Result<Digest> {
        let bytes = serde_json::to_vec(manifest).or_raise(|| ErrorKind::InvalidData("manifest"))?;
        self.backend.write(&Self::artifact_path(id, MANIFEST_FILE), &bytes).await.or_raise(|| ErrorKind::Storage)?;
        Ok(Digest::of(&bytes))
    }

    /// Load the manifest belonging to a UGC record.
    ///
    /// Returns `Ok(None)` for non-UGC records, and for manifests that no
    /// longer match the record's digest or are still encrypted.
    pub async fn load_manifest(&self, record: &ModRecord) -> Result<Option<Manifest>> {
        let Some(expected) = &record.manifest_digest else {
            return Ok(None);
        };
        Ok(self.read_manifest(record.id, expected).await?.ok())
    }

    async fn read_manifest(&self, id: u64, expected: &Digest) -> Result<Checked<Manifest>> {
        let bytes = match self.backend.read(&Self::artifact_path(id, MANIFEST_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(Err(Miss::ManifestMissing)),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
        };
        if Digest::of(&bytes) != *expected {
            return Ok(Err(Miss::ManifestDigest));
        }
        // The digest matched what we wrote, so a parse failure here means the
        // record itself is inconsistent.
        let manifest: Manifest = match serde_json::from_slice(&bytes) {
            Ok(manifest) => manifest,
            Err(_) => return Ok(Err(Miss::ManifestDigest)),
        };
        if manifest.filenames_encrypted {
            return Ok(Err(Miss::ManifestEncrypted));
        }
        Ok(Ok(manifest))
    }

    /// Hash a stored file. Returns `Ok(None)` if it doesn't exist.
    pub async fn hash_file(&self, path: &Path) -> Result<Option<Digest>> {
        let reader = match self.backend.reader(path).await {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
        };
        let digest = tokio::task::spawn_blocking(move || Digest::from_reader(reader))
            .await
            .or_raise(|| ErrorKind::Hashing)?
            .or_raise(|| ErrorKind::Hashing)?;
        Ok(Some(digest))
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Run the full verification cascade for `id`, stopping at the first
    /// failed step:
    ///
    /// 1. **Record**: the record file must exist and parse, with both tracked
    ///    digests and the metadata snapshot present.
    /// 2. **Freshness**: if `expected_update` is given, it must equal the
    ///    stored update time (compared in whole seconds).
    /// 3. **UGC consistency**: a record with a manifest digest must describe
    ///    a UGC artifact, and one without must not.
    /// 4. **Manifest** (UGC only): the manifest file must hash to the stored
    ///    digest, have decrypted filenames, and declare the same hash as the
    ///    record for every tracked file that isn't the absent sentinel.
    /// 5. **Content**: every tracked file that isn't the absent sentinel must
    ///    exist and hash to its recorded digest.
    ///
    /// On success, the record's extended size is recomputed: the manifest's
    /// total for UGC, the declared package size otherwise.
    ///
    /// Integrity problems are a [`Verdict::Miss`]; `Err` is reserved for the
    /// backend failing outright.
    pub async fn check(&self, id: u64, expected_update: Option<UtcDateTime>) -> Result<Verdict> {
        let mut record = match self.load(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(Verdict::Miss(Miss::NoRecord)),
            Err(e) if matches!(&*e, ErrorKind::InvalidData(_)) => return Ok(Verdict::Miss(Miss::Unreadable)),
            Err(e) => return Err(e),
        };
        if let Some(expected) = expected_update
            && expected.unix_timestamp() != record.updated_time.unix_timestamp()
        {
            return Ok(Verdict::Miss(Miss::Stale));
        }
        if record.is_ugc() != record.metadata.is_ugc() {
            return Ok(Verdict::Miss(Miss::UgcMismatch));
        }
        let size = match &record.manifest_digest {
            Some(expected) => {
                let manifest = match self.read_manifest(id, expected).await? {
                    Ok(manifest) => manifest,
                    Err(miss) => return Ok(Verdict::Miss(miss)),
                };
                if let Err(miss) = Self::check_manifest_entries(&record, &manifest) {
                    return Ok(Verdict::Miss(miss));
                }
                manifest.total_size()
            },
            None => record.metadata.file_size,
        };
        for (name, tracked) in Self::tracked(&record) {
            if let Err(miss) = self.check_file(id, name, tracked).await? {
                return Ok(Verdict::Miss(miss));
            }
        }
        record.extended.size = size;
        Ok(Verdict::Verified(Box::new(record)))
    }

    /// Like [`check`](Self::check), but reduced to "usable record or not".
    /// Backend errors are logged and treated as a miss.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn verify(&self, id: u64, expected_update: Option<UtcDateTime>) -> Option<ModRecord> {
        match self.check(id, expected_update).await {
            Ok(Verdict::Verified(record)) => Some(*record),
            Ok(Verdict::Miss(miss)) => {
                tracing::debug!(%miss, "Local record failed verification");
                None
            },
            Err(e) => {
                tracing::warn!(error = ?e, "Could not verify local record");
                None
            },
        }
    }

    fn tracked(record: &ModRecord) -> [(&'static str, TrackedDigest); 2] {
        [(INFO_FILE, record.info_digest), (MAIN_FILE, record.main_digest)]
    }

    fn check_manifest_entries(record: &ModRecord, manifest: &Manifest) -> Checked<()> {
        for (name, tracked) in Self::tracked(record) {
            let Some(expected) = tracked.digest() else {
                continue;
            };
            let entry = manifest.entry(name).ok_or(Miss::ManifestEntryMissing(name))?;
            if entry.hash.as_ref() != Some(expected) {
                return Err(Miss::ManifestEntryDigest(name));
            }
        }
        Ok(())
    }

    async fn check_file(&self, id: u64, name: &'static str, tracked: TrackedDigest) -> Result<Checked<()>> {
        let Some(expected) = tracked.digest() else {
            return Ok(Ok(()));
        };
        Ok(match self.hash_file(&Self::artifact_path(id, name)).await? {
            None => Err(Miss::FileMissing(name)),
            Some(actual) if actual != *expected => Err(Miss::FileDigest(name)),
            Some(_) => Ok(()),
        })
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// Stream the id of every artifact directory holding a record file.
    /// Whether those records verify is not checked.
    pub fn list_ids(&self) -> impl Stream<Item = Result<u64>> + '_ {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            for await info in self.backend.list_stream(None) {
                match info.or_raise(|| ErrorKind::Storage) {
                    Ok(info) => {
                        if let Some(id) = Self::record_owner(&info.path) {
                            yield Ok(id);
                        }
                    },
                    Err(e) => yield Err(e),
                }
            }
        })
    }

    fn record_owner(path: &Path) -> Option<u64> {
        if path.file_name()? != RECORD_FILE {
            return None;
        }
        let parent = path.parent()?;
        if parent.parent()? != Path::new("") {
            return None;
        }
        parent.to_str()?.parse().ok()
    }

    /// Stream every record that passes verification, ignoring update times.
    ///
    /// Records are checked `concurrency` at a time; misses are skipped.
    pub fn verify_all(&self, concurrency: usize) -> impl Stream<Item = Result<ModRecord>> + '_ {
        self.list_ids()
            .map(move |id| async move {
                match id {
                    Ok(id) => Ok(self.verify(id, None).await),
                    Err(e) => Err(e),
                }
            })
            .buffer_unordered(concurrency.max(1))
            .filter_map(|result| async move { result.transpose() })
    }
}
