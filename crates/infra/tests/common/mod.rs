#![allow(dead_code)]

//! Stub catalog service bound to an ephemeral port.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{Value, json};

use larder_infra::{CatalogConfig, HttpCatalogClient};

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub target: String,
    pub body: Option<Value>,
    pub authorization: Option<String>,
}

#[derive(Default)]
pub struct CatalogState {
    /// sku → product id
    pub products: HashMap<String, String>,
    pub lookup_failures: VecDeque<StatusCode>,
    pub put_failures: VecDeque<StatusCode>,
    pub lookups: Vec<Recorded>,
    pub puts: Vec<Recorded>,
}

type Shared = Arc<Mutex<CatalogState>>;

pub struct StubCatalog {
    pub base_url: String,
    state: Shared,
    handle: tokio::task::JoinHandle<()>,
}

impl StubCatalog {
    pub async fn spawn(products: &[(&str, &str)]) -> Self {
        let state: Shared = Arc::new(Mutex::new(CatalogState {
            products: products
                .iter()
                .map(|(sku, id)| (sku.to_string(), id.to_string()))
                .collect(),
            ..Default::default()
        }));

        let app = Router::new()
            .route("/api/products/sku/:sku", get(lookup))
            .route("/api/products/:id", put(update))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{addr}/api/");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            state,
            handle,
        }
    }

    pub fn client(&self, token: Option<&str>) -> HttpCatalogClient {
        HttpCatalogClient::new(&CatalogConfig {
            base_url: self.base_url.parse().unwrap(),
            token: token.map(str::to_string),
            request_timeout: Duration::from_secs(2),
        })
        .expect("failed to build catalog client")
    }

    pub fn fail_next_lookups(&self, statuses: impl IntoIterator<Item = StatusCode>) {
        self.state.lock().unwrap().lookup_failures.extend(statuses);
    }

    pub fn fail_next_puts(&self, statuses: impl IntoIterator<Item = StatusCode>) {
        self.state.lock().unwrap().put_failures.extend(statuses);
    }

    pub fn lookups(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().lookups.clone()
    }

    pub fn puts(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().puts.clone()
    }
}

impl Drop for StubCatalog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn lookup(
    State(state): State<Shared>,
    Path(sku): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    state.lookups.push(Recorded {
        target: sku.clone(),
        body: None,
        authorization: authorization(&headers),
    });

    if let Some(status) = state.lookup_failures.pop_front() {
        return (status, Json(json!({ "error": "injected failure" })));
    }

    match state.products.get(&sku) {
        Some(id) => (
            StatusCode::OK,
            Json(json!({ "data": { "product": { "id": id, "sku": sku, "name": "stub" } } })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "product not found" })),
        ),
    }
}

async fn update(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    state.puts.push(Recorded {
        target: id.clone(),
        body: Some(body.clone()),
        authorization: authorization(&headers),
    });

    if let Some(status) = state.put_failures.pop_front() {
        return (status, Json(json!({ "error": "injected failure" })));
    }

    if !state.products.values().any(|known| *known == id) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "product not found" })),
        );
    }

    if body.get("price").and_then(Value::as_f64).is_some_and(|p| p > 100_000.0) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "price out of range" })),
        );
    }

    (StatusCode::OK, Json(json!({ "data": { "product": { "id": id } } })))
}
