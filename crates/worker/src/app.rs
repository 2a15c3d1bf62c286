//! Process wiring, shared by the binary and tests.

use std::sync::Arc;

use tracing::{info, warn};

use larder_core::SyncResult;
use larder_events::MessageSource;
use larder_infra::{
    HttpCatalogClient, MessageProcessor, RetryExecutor, RetryPolicy, SkuResolver, SyncWorker,
    SyncWorkerConfig, WorkerConfig,
};

/// Build the production pipeline on top of `source`.
pub fn build_worker<S: MessageSource>(
    config: &WorkerConfig,
    source: S,
) -> SyncResult<SyncWorker<S, HttpCatalogClient>> {
    let catalog = Arc::new(HttpCatalogClient::new(&config.catalog)?);
    let retry = RetryExecutor::new(RetryPolicy::default());

    let mut resolver = SkuResolver::new(catalog.clone(), retry.clone());
    if let Some(ttl) = config.sku_cache_ttl {
        resolver = resolver.with_cache(ttl);
    }

    info!(
        catalog = %config.catalog.base_url,
        authenticated = config.catalog.token.is_some(),
        sku_cache_ttl_secs = config.sku_cache_ttl.map(|ttl| ttl.as_secs()),
        "catalog client ready"
    );

    let processor = MessageProcessor::new(catalog, resolver, retry);
    Ok(SyncWorker::new(source, processor, SyncWorkerConfig::from(config)))
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
