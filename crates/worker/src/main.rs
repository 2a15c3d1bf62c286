use anyhow::Context;
use tracing::{error, info};

use larder_infra::{KafkaMessageSource, WorkerConfig};
use larder_observability::{LogFormat, LogSettings};
use larder_worker::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("invalid configuration")?;
    larder_observability::init(&LogSettings {
        service: env!("CARGO_BIN_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        default_directive: config.env.default_log_directive(),
        format: if config.env.is_production() {
            LogFormat::Json
        } else {
            LogFormat::Compact
        },
    });

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        error!(%panic, "panic");
        default_hook(panic);
    }));

    info!(
        env = ?config.env,
        brokers = %config.bus.brokers,
        group_id = %config.bus.group_id,
        concurrency = config.concurrency,
        "starting ERP sync worker"
    );

    let source = KafkaMessageSource::new(config.bus.clone());
    let mut worker = app::build_worker(&config, source)?;

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        app::shutdown_signal().await;
        shutdown.trigger();
    });

    let stats = worker.run().await.context("sync worker stopped with a fault")?;
    info!(
        applied = stats.applied,
        dropped = stats.dropped,
        "ERP sync worker exited"
    );
    Ok(())
}
