//! Catalog loading with cache invalidation.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use atelier_core::OrchestratorError;

use crate::catalog::Catalog;
use crate::source::{CatalogSource, Revision};

struct CachedCatalog {
    revision: Revision,
    catalog: Arc<Catalog>,
}

/// Loads and caches the agent catalog.
///
/// The cached snapshot is swapped atomically as an `Arc<Catalog>`; a load
/// that fails validation leaves the previous snapshot in place. Lookups
/// re-parse only when the source revision marker changes.
pub struct CatalogLoader {
    source: Box<dyn CatalogSource>,
    cached: RwLock<Option<CachedCatalog>>,
}

impl CatalogLoader {
    /// Create a loader over the given source. Nothing is parsed until the
    /// first `load`/`catalog` call.
    pub fn new(source: impl CatalogSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: RwLock::new(None),
        }
    }

    /// Parse, validate, and cache a fresh catalog. All-or-nothing: on any
    /// validation failure the cache keeps its previous snapshot.
    pub async fn load(&self) -> Result<Arc<Catalog>, OrchestratorError> {
        let revision = self.source.revision()?;
        let definitions = self.source.fetch()?;
        let catalog = Arc::new(Catalog::build(definitions, revision.clone())?);

        info!(
            revision = revision.as_str(),
            agents = catalog.len(),
            "Loaded agent catalog"
        );

        *self.cached.write().await = Some(CachedCatalog {
            revision,
            catalog: catalog.clone(),
        });

        Ok(catalog)
    }

    /// Return the cached catalog, reloading only if the source revision
    /// changed since the last successful load.
    pub async fn catalog(&self) -> Result<Arc<Catalog>, OrchestratorError> {
        let revision = self.source.revision()?;

        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.revision == revision {
                    return Ok(entry.catalog.clone());
                }
                debug!(
                    from = entry.revision.as_str(),
                    to = revision.as_str(),
                    "Catalog revision changed, reloading"
                );
            }
        }

        self.load().await
    }
}
