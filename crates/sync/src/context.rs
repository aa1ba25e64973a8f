use crate::error::{ErrorKind, Result};
use crate::refresh::RefreshCache;
use exn::ResultExt;
use modvault_config::Settings;
use modvault_intern::InternPool;
use modvault_remote::{BufferPool, ContentClient, MetadataResolver, PackageSource};
use modvault_script::{Normalizer, ScriptEvaluator};
use modvault_storage::BackendHandle;
use modvault_storage::backend::LocalBackend;
use modvault_store::{ModRecord, Repository};
use std::sync::Arc;

/// Everything the download pipeline and the synchronizer share.
///
/// Built once and passed by reference; the refresh cache inside is the only
/// mutable state and guards itself.
pub struct Context {
    pub repo: Repository,
    pub resolver: Arc<dyn MetadataResolver>,
    pub content: Arc<dyn ContentClient>,
    pub packages: Arc<dyn PackageSource>,
    pub normalizer: Normalizer,
    pub settings: Settings,
    pub(crate) buffers: Arc<BufferPool>,
    pub(crate) cache: RefreshCache,
}

impl Context {
    pub fn new(
        settings: Settings,
        backend: BackendHandle,
        resolver: Arc<dyn MetadataResolver>,
        content: Arc<dyn ContentClient>,
        packages: Arc<dyn PackageSource>,
        evaluator: Arc<dyn ScriptEvaluator>,
    ) -> Self {
        let pool = Arc::new(InternPool::new(settings.intern_capacity));
        let normalizer = Normalizer::new(evaluator, Arc::clone(&pool), settings.script.locale.clone());
        tracing::debug!(backend = backend.name(), ttl = ?settings.cache_ttl(), "Creating sync context");
        Self {
            repo: Repository::new(backend, pool),
            resolver,
            content,
            packages,
            normalizer,
            cache: RefreshCache::new(settings.cache_ttl()),
            buffers: Arc::new(BufferPool::default()),
            settings,
        }
    }

    /// Build a context over the local directory named by
    /// `settings.mods_root`, creating it if needed.
    pub fn open(
        settings: Settings,
        resolver: Arc<dyn MetadataResolver>,
        content: Arc<dyn ContentClient>,
        packages: Arc<dyn PackageSource>,
        evaluator: Arc<dyn ScriptEvaluator>,
    ) -> Result<Self> {
        let backend = LocalBackend::new("local", &settings.mods_root).or_raise(|| ErrorKind::Storage)?;
        Ok(Self::new(settings, Arc::new(backend), resolver, content, packages, evaluator))
    }

    /// Share download buffers with other components (e.g. an HTTP package
    /// source built from the same settings).
    pub fn with_buffers(mut self, buffers: Arc<BufferPool>) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn buffers(&self) -> &Arc<BufferPool> {
        &self.buffers
    }

    pub fn cache(&self) -> &RefreshCache {
        &self.cache
    }

    /// See [`RefreshCache::get_or_refresh`].
    pub async fn get_or_refresh(&self, id: u64) -> Option<ModRecord> {
        self.cache.get_or_refresh(self, id).await
    }
}
