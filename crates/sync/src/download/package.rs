//! Non-UGC artifacts: one zip package per version.

use super::{Fetched, remove_stale};
use crate::context::Context;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use modvault_digest::{Digest, TrackedDigest};
use modvault_remote::PackageBuffer;
use modvault_store::{INFO_FILE, MAIN_FILE, ModMetadata, Repository};
use std::io::{Read, Seek};
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;
use zip::result::ZipError;

const TRACKED: [&str; 2] = [INFO_FILE, MAIN_FILE];

pub(super) async fn fetch(ctx: &Context, metadata: &ModMetadata, cancel: &CancellationToken) -> Result<Fetched> {
    let url = metadata
        .file_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or_raise(|| ErrorKind::InvalidItem(metadata.id))?;
    let timeout = ctx.settings.download.package_timeout(metadata.file_size);
    let package =
        ctx.packages.fetch(url, metadata.file_size, timeout, cancel).await.map_err(ErrorKind::remote)?;
    tracing::debug!(bytes = package.len(), spooled = package.is_spooled(), "Fetched package");

    let entries = tokio::task::spawn_blocking(move || extract_tracked(package))
        .await
        .or_raise(|| ErrorKind::CorruptArchive)??;

    let mut digests = [TrackedDigest::Absent; 2];
    for ((name, data), digest) in TRACKED.into_iter().zip(entries).zip(&mut digests) {
        let path = Repository::artifact_path(metadata.id, name);
        match data {
            Some(data) => {
                ctx.repo.backend().write(&path, &data).await.or_raise(|| ErrorKind::Storage)?;
                *digest = TrackedDigest::Present(Digest::of(&data));
            },
            None => remove_stale(ctx, &path).await?,
        }
    }
    let [info_digest, main_digest] = digests;
    Ok(Fetched { manifest_digest: None, info_digest, main_digest, size: metadata.file_size })
}

/// Pull the tracked files out of the archive root. Files the package lacks
/// come back as `None`; lacking both means the package is useless.
fn extract_tracked(mut package: PackageBuffer) -> Result<[Option<Vec<u8>>; 2]> {
    package.rewind().or_raise(|| ErrorKind::CorruptArchive)?;
    let mut archive = ZipArchive::new(package).or_raise(|| ErrorKind::CorruptArchive)?;
    let info = read_entry(&mut archive, INFO_FILE)?;
    let main = read_entry(&mut archive, MAIN_FILE)?;
    if info.is_none() && main.is_none() {
        exn::bail!(ErrorKind::CorruptArchive);
    }
    Ok([info, main])
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).or_raise(|| ErrorKind::CorruptArchive),
    };
    let mut data = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
    file.read_to_end(&mut data).or_raise(|| ErrorKind::CorruptArchive)?;
    Ok(Some(data))
}
