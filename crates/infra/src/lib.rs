//! Infrastructure layer: configuration, catalog API client, retry policy,
//! message processing and the bus-driven sync worker.

pub mod config;
pub mod event_bus;
pub mod external;
pub mod processor;
pub mod resolver;
pub mod retry;
pub mod workers;

pub use config::{AppEnv, BusConfig, CatalogConfig, ConfigError, SaslCredentials, WorkerConfig};
#[cfg(feature = "kafka")]
pub use event_bus::KafkaMessageSource;
pub use external::catalog::{CatalogApi, CatalogProduct, HttpCatalogClient, ProductPatch};
pub use processor::{MessageProcessor, Outcome, UpdateSummary};
pub use resolver::SkuResolver;
pub use retry::{RetryExecutor, RetryPolicy};
pub use workers::sync_worker::{
    ShutdownHandle, StatsHandle, SyncWorker, SyncWorkerConfig, WorkerState, WorkerStats,
};
