//! Per-topic reconciliation of ERP events into the catalog.
//!
//! Every entry point runs the same pipeline:
//!
//! 1. parse/validate the decoded JSON (no side effects on failure)
//! 2. resolve the target product id
//! 3. build a patch holding only the fields the event carries
//! 4. `PUT` the patch through the retry executor
//!
//! Calls are independent of each other. Price and stock are absolute values
//! applied last-write-wins; no timestamp comparison happens here.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use larder_core::{ProductId, Sku, SyncError, SyncResult};
use larder_events::{
    EventSchema, InboundEvent, PriceUpdateEvent, ProductRef, ProductUpdateEvent, StockUpdateEvent,
    Topic,
};

use crate::external::catalog::{CatalogApi, ProductPatch};
use crate::resolver::SkuResolver;
use crate::retry::RetryExecutor;

/// What an applied event changed.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSummary {
    pub topic: Topic,
    pub product_id: ProductId,
    pub sku: Option<Sku>,
    pub patch: ProductPatch,
}

/// Successful end of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// One `PUT` was issued and accepted.
    Updated(UpdateSummary),
    /// The event carried nothing to write; no call was made.
    NoChanges { topic: Topic, sku: Option<Sku> },
}

pub struct MessageProcessor<C> {
    catalog: Arc<C>,
    resolver: SkuResolver<C>,
    retry: RetryExecutor,
}

impl<C: CatalogApi> MessageProcessor<C> {
    pub fn new(catalog: Arc<C>, resolver: SkuResolver<C>, retry: RetryExecutor) -> Self {
        Self {
            catalog,
            resolver,
            retry,
        }
    }

    /// Route decoded JSON to the entry point for `topic`.
    pub async fn process(&self, topic: Topic, payload: &Value) -> SyncResult<Outcome> {
        match InboundEvent::parse(topic, payload)? {
            InboundEvent::Product(event) => self.apply_product(event).await,
            InboundEvent::Price(event) => self.apply_price(event).await,
            InboundEvent::Stock(event) => self.apply_stock(event).await,
        }
    }

    pub async fn process_product_update(&self, payload: &Value) -> SyncResult<Outcome> {
        self.apply_product(ProductUpdateEvent::from_json(payload)?).await
    }

    pub async fn process_price_update(&self, payload: &Value) -> SyncResult<Outcome> {
        self.apply_price(PriceUpdateEvent::from_json(payload)?).await
    }

    pub async fn process_stock_update(&self, payload: &Value) -> SyncResult<Outcome> {
        self.apply_stock(StockUpdateEvent::from_json(payload)?).await
    }

    async fn apply_product(&self, event: ProductUpdateEvent) -> SyncResult<Outcome> {
        let patch = ProductPatch {
            name: event.name.clone(),
            description: event.description.clone(),
            category: event.category.clone(),
            brand: event.brand.clone(),
            weight: event.weight,
            unit: event.unit.clone(),
            is_active: event.is_active,
            ..Default::default()
        };

        if patch.is_empty() {
            debug!(sku = ?event.sku, id = ?event.id, "product update carries no fields");
            return Ok(Outcome::NoChanges {
                topic: Topic::Product,
                sku: event.sku,
            });
        }

        self.apply(Topic::Product, &event, patch).await
    }

    async fn apply_price(&self, event: PriceUpdateEvent) -> SyncResult<Outcome> {
        let patch = ProductPatch {
            price: Some(event.price),
            ..Default::default()
        };
        self.apply(Topic::Price, &event, patch).await
    }

    async fn apply_stock(&self, event: StockUpdateEvent) -> SyncResult<Outcome> {
        let patch = ProductPatch {
            stock: Some(event.stock),
            ..Default::default()
        };
        self.apply(Topic::Stock, &event, patch).await
    }

    async fn apply<R>(&self, topic: Topic, target: &R, patch: ProductPatch) -> SyncResult<Outcome>
    where
        R: ProductRef + Sync,
    {
        let product_id = self.resolver.resolve(target).await?;

        let result = self
            .retry
            .run("catalog.update_product", || {
                self.catalog.update_product(&product_id, &patch)
            })
            .await;

        if let Err(SyncError::NotFound(_)) = &result {
            // A cached mapping may point at a product that has since gone away.
            if let (None, Some(sku)) = (target.product_id(), target.sku()) {
                self.resolver.forget(sku).await;
            }
        }
        result?;

        Ok(Outcome::Updated(UpdateSummary {
            topic,
            product_id,
            sku: target.sku().cloned(),
            patch,
        }))
    }
}
