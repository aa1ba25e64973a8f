//! Shared fixtures for the crate's tests.

use crate::context::Context;
use modvault_config::Settings;
use modvault_remote::{MockContentClient, MockPackageSource, MockResolver};
use modvault_script::error::ErrorKind as ScriptError;
use modvault_script::{FnEvaluator, RawTable, ScriptGlobals};
use modvault_storage::backend::MockBackend;
use modvault_store::ModMetadata;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use time::UtcDateTime;
use zip::write::SimpleFileOptions;

pub(crate) const INFO_SOURCE: &str = "name = \"Test Mod\"\nauthor = \"tester\"\n";

pub(crate) struct Harness {
    pub backend: Arc<MockBackend>,
    pub resolver: Arc<MockResolver>,
    pub content: Arc<MockContentClient>,
    pub packages: Arc<MockPackageSource>,
    pub ctx: Arc<Context>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        Self::build(configure, MockResolver::default(), MockPackageSource::new())
    }

    /// Start from a prepared catalog, e.g. one listing the same item twice.
    pub fn with_resolver(resolver: MockResolver, configure: impl FnOnce(&mut Settings)) -> Self {
        Self::build(configure, resolver, MockPackageSource::new())
    }

    pub fn with_packages(packages: MockPackageSource, configure: impl FnOnce(&mut Settings)) -> Self {
        Self::build(configure, MockResolver::default(), packages)
    }

    fn build(configure: impl FnOnce(&mut Settings), resolver: MockResolver, packages: MockPackageSource) -> Self {
        let mut settings = Settings { mods_root: PathBuf::from("/mods"), ..Default::default() };
        configure(&mut settings);
        let backend = Arc::new(MockBackend::default());
        let resolver = Arc::new(resolver);
        let content = Arc::new(MockContentClient::new());
        let packages = Arc::new(packages);
        let ctx = Context::new(
            settings,
            backend.clone(),
            resolver.clone(),
            content.clone(),
            packages.clone(),
            Arc::new(FnEvaluator(assignments)),
        );
        Self { backend, resolver, content, packages, ctx: Arc::new(ctx) }
    }
}

/// A toy evaluator understanding `key = "value"` lines.
pub(crate) fn assignments(source: &str, _globals: &ScriptGlobals) -> modvault_script::error::Result<RawTable> {
    let mut table = RawTable::new();
    for line in source.lines() {
        let Some((key, value)) = line.split_once('=') else {
            exn::bail!(ScriptError::Evaluation);
        };
        table.insert(key.trim(), value.trim().trim_matches('"'));
    }
    Ok(table)
}

fn snapshot(id: u64) -> ModMetadata {
    ModMetadata {
        id,
        result: 1,
        title: Some(format!("Mod {id}")),
        description: Some("A test mod".to_string()),
        file_url: None,
        file_size: 0,
        preview_url: Some(format!("https://images.example.com/{id}.png")),
        preview_size: 2048,
        created: UtcDateTime::from_unix_timestamp(1_600_000_000).unwrap(),
        updated: UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        creator: 76_561_198_000_000_000,
        views: 100,
        subscriptions: 10,
        favorited: 1,
        comments: 0,
        vote_score: 0.5,
        tags: vec!["item".into()],
        content_file: 0,
        can_subscribe: true,
    }
}

/// A catalog entry whose content comes from the depot.
pub(crate) fn ugc_item(id: u64) -> ModMetadata {
    ModMetadata { content_file: 900 + id, ..snapshot(id) }
}

/// A catalog entry whose content is a zip package.
pub(crate) fn packaged_item(id: u64) -> ModMetadata {
    ModMetadata {
        file_url: Some(format!("https://cdn.example.com/{id}.zip")),
        file_size: 4096,
        ..snapshot(id)
    }
}

pub(crate) fn zip(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
