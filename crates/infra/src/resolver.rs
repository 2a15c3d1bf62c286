//! SKU → product id resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use larder_core::{ProductId, Sku, SyncError, SyncResult};
use larder_events::ProductRef;

use crate::external::catalog::CatalogApi;
use crate::retry::RetryExecutor;

/// Resolves the product an event refers to.
///
/// An explicit product id short-circuits (no network call). Otherwise the SKU
/// is looked up through the catalog, with transient failures retried.
/// `NotFound` means the catalog answered "no such SKU"; `Unavailable` means it
/// could not be asked.
pub struct SkuResolver<C> {
    catalog: Arc<C>,
    retry: RetryExecutor,
    cache: Option<ResolutionCache>,
}

struct ResolutionCache {
    ttl: Duration,
    entries: RwLock<HashMap<Sku, (ProductId, Instant)>>,
}

impl<C: CatalogApi> SkuResolver<C> {
    pub fn new(catalog: Arc<C>, retry: RetryExecutor) -> Self {
        Self {
            catalog,
            retry,
            cache: None,
        }
    }

    /// Remember successful lookups for `ttl`.
    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache = Some(ResolutionCache {
            ttl,
            entries: RwLock::new(HashMap::new()),
        });
        self
    }

    pub async fn resolve<R>(&self, target: &R) -> SyncResult<ProductId>
    where
        R: ProductRef + ?Sized,
    {
        if let Some(id) = target.product_id() {
            return Ok(id.clone());
        }

        let sku = target
            .sku()
            .ok_or_else(|| SyncError::validation("event carries neither product id nor sku"))?;

        if let Some(id) = self.cached(sku).await {
            debug!(%sku, product_id = %id, "sku resolved from cache");
            return Ok(id);
        }

        let product = self
            .retry
            .run("catalog.get_by_sku", || self.catalog.get_by_sku(sku))
            .await?;

        debug!(%sku, product_id = %product.id, "sku resolved via catalog");
        if let Some(cache) = &self.cache {
            let mut entries = cache.entries.write().await;
            // Sweep on insert so SKUs that are never seen again do not pile up.
            entries.retain(|_, (_, stored_at)| stored_at.elapsed() < cache.ttl);
            entries.insert(sku.clone(), (product.id.clone(), Instant::now()));
        }

        Ok(product.id)
    }

    /// Drop any cached mapping for `sku`.
    pub async fn forget(&self, sku: &Sku) {
        if let Some(cache) = &self.cache {
            cache.entries.write().await.remove(sku);
        }
    }

    async fn cached(&self, sku: &Sku) -> Option<ProductId> {
        let cache = self.cache.as_ref()?;
        {
            let entries = cache.entries.read().await;
            match entries.get(sku) {
                Some((id, stored_at)) if stored_at.elapsed() < cache.ttl => {
                    return Some(id.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = cache.entries.write().await;
        if entries
            .get(sku)
            .is_some_and(|(_, stored_at)| stored_at.elapsed() >= cache.ttl)
        {
            entries.remove(sku);
        }
        None
    }

    #[cfg(test)]
    async fn cached_len(&self) -> usize {
        match &self.cache {
            Some(cache) => cache.entries.read().await.len(),
            None => 0,
        }
    }
}
