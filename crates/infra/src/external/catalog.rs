//! Typed façade over the catalog service HTTP API.
//!
//! Status mapping:
//! - `404` → `NotFound`
//! - `408`, `429`, `5xx`, timeouts and connection failures → `Unavailable`
//! - any other `4xx` → `RejectedInput` (the catalog's own business rules)

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use larder_core::{ProductId, Sku, SyncError, SyncResult};

use crate::config::CatalogConfig;

/// Product as returned by the SKU lookup (only the fields the worker reads).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogProduct {
    pub id: ProductId,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Field-level partial update. Absent fields are omitted from the body, never
/// sent as `null`, so the catalog keeps whatever it already has for them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<u64>,
}

impl ProductPatch {
    /// Wire names of the fields this patch sets.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let present = [
            ("name", self.name.is_some()),
            ("description", self.description.is_some()),
            ("category", self.category.is_some()),
            ("brand", self.brand.is_some()),
            ("weight", self.weight.is_some()),
            ("unit", self.unit.is_some()),
            ("isActive", self.is_active.is_some()),
            ("price", self.price.is_some()),
            ("stock", self.stock.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(field, set)| set.then_some(field))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }
}

/// Operations the worker needs from the catalog service.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn get_by_sku(&self, sku: &Sku) -> SyncResult<CatalogProduct>;

    async fn update_product(&self, id: &ProductId, patch: &ProductPatch) -> SyncResult<()>;
}

#[async_trait]
impl<T> CatalogApi for Arc<T>
where
    T: CatalogApi + ?Sized,
{
    async fn get_by_sku(&self, sku: &Sku) -> SyncResult<CatalogProduct> {
        (**self).get_by_sku(sku).await
    }

    async fn update_product(&self, id: &ProductId, patch: &ProductPatch) -> SyncResult<()> {
        (**self).update_product(id, patch).await
    }
}

#[derive(Deserialize)]
struct LookupResponse {
    data: LookupData,
}

#[derive(Deserialize)]
struct LookupData {
    product: Option<CatalogProduct>,
}

/// `CatalogApi` over HTTP (reqwest).
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpCatalogClient {
    pub fn new(config: &CatalogConfig) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        })
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SyncError::fatal(format!("catalog base URL {} cannot have a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogClient {
    async fn get_by_sku(&self, sku: &Sku) -> SyncResult<CatalogProduct> {
        let url = self.endpoint(&["products", "sku", sku.as_str()])?;
        debug!(%url, "catalog lookup by sku");

        let resp = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body, &format!("sku {sku}")));
        }

        let body: LookupResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::unavailable(format!("malformed catalog response: {e}")))?;

        body.data
            .product
            .ok_or_else(|| SyncError::not_found(format!("sku {sku}")))
    }

    async fn update_product(&self, id: &ProductId, patch: &ProductPatch) -> SyncResult<()> {
        let url = self.endpoint(&["products", id.as_str()])?;
        debug!(%url, fields = ?patch.changed_fields(), "catalog product update");

        let resp = self
            .authorize(self.http.put(url).json(patch))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, body, &format!("product {id}")))
    }
}

fn transport_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::unavailable(format!("catalog request timed out: {err}"))
    } else {
        SyncError::unavailable(format!("catalog request failed: {err}"))
    }
}

fn status_error(status: StatusCode, body: String, subject: &str) -> SyncError {
    match status {
        StatusCode::NOT_FOUND => SyncError::not_found(subject.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SyncError::unavailable(format!("catalog returned {status} for {subject}"))
        }
        s if s.is_client_error() => {
            SyncError::rejected(format!("catalog returned {status} for {subject}: {body}"))
        }
        _ => SyncError::unavailable(format!("catalog returned {status} for {subject}")),
    }
}
