mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::StubCatalog;
use larder_core::{ProductId, Sku, SyncError};
use larder_infra::{CatalogApi, CatalogConfig, HttpCatalogClient, ProductPatch};

fn sku(value: &str) -> Sku {
    Sku::parse(value).unwrap()
}

fn id(value: &str) -> ProductId {
    ProductId::parse(value).unwrap()
}

#[tokio::test]
async fn lookup_by_sku_returns_product_and_sends_token() {
    let catalog = StubCatalog::spawn(&[("MILK-1L", "p42")]).await;
    let client = catalog.client(Some("t0ken"));

    let product = client.get_by_sku(&sku("MILK-1L")).await.unwrap();
    assert_eq!(product.id, id("p42"));
    assert_eq!(product.sku.as_deref(), Some("MILK-1L"));

    let lookups = catalog.lookups();
    assert_eq!(lookups.len(), 1);
    assert_eq!(lookups[0].target, "MILK-1L");
    assert_eq!(lookups[0].authorization.as_deref(), Some("Bearer t0ken"));
}

#[tokio::test]
async fn sku_is_percent_encoded_in_the_path() {
    let catalog = StubCatalog::spawn(&[("OAT MILK", "p7")]).await;
    let client = catalog.client(None);

    let product = client.get_by_sku(&sku("OAT MILK")).await.unwrap();
    assert_eq!(product.id, id("p7"));
    assert_eq!(catalog.lookups()[0].authorization, None);
}

#[tokio::test]
async fn unknown_sku_is_not_found() {
    let catalog = StubCatalog::spawn(&[]).await;
    let err = catalog.client(None).get_by_sku(&sku("GHOST")).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn update_sends_only_present_fields() {
    let catalog = StubCatalog::spawn(&[("MILK-1L", "p42")]).await;
    let client = catalog.client(Some("t0ken"));

    let patch = ProductPatch {
        name: Some("Whole milk 1L".to_string()),
        is_active: Some(false),
        ..Default::default()
    };
    client.update_product(&id("p42"), &patch).await.unwrap();

    let puts = catalog.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].target, "p42");
    assert_eq!(
        puts[0].body,
        Some(json!({ "name": "Whole milk 1L", "isActive": false }))
    );
    assert_eq!(puts[0].authorization.as_deref(), Some("Bearer t0ken"));
}

#[tokio::test]
async fn update_statuses_map_onto_error_kinds() {
    let catalog = StubCatalog::spawn(&[("MILK-1L", "p42")]).await;
    let client = catalog.client(None);
    let patch = ProductPatch {
        stock: Some(3),
        ..Default::default()
    };

    let err = client.update_product(&id("p404"), &patch).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)), "{err:?}");

    let too_expensive = ProductPatch {
        price: Some(250_000.0),
        ..Default::default()
    };
    let err = client.update_product(&id("p42"), &too_expensive).await.unwrap_err();
    assert!(
        matches!(err, SyncError::RejectedInput(ref m) if m.contains("price out of range")),
        "{err:?}"
    );

    catalog.fail_next_puts([StatusCode::SERVICE_UNAVAILABLE, StatusCode::TOO_MANY_REQUESTS]);
    for _ in 0..2 {
        let err = client.update_product(&id("p42"), &patch).await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
    client.update_product(&id("p42"), &patch).await.unwrap();
}

#[tokio::test]
async fn unreachable_catalog_is_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpCatalogClient::new(&CatalogConfig {
        base_url: format!("http://{addr}/").parse().unwrap(),
        token: None,
        request_timeout: Duration::from_millis(500),
    })
    .unwrap();

    let err = client.get_by_sku(&sku("MILK-1L")).await.unwrap_err();
    assert!(matches!(err, SyncError::Unavailable(_)), "{err:?}");
}
