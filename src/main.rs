//! The `wiregate` gateway binary.
//!
//! Loads configuration, installs logging and the optional metrics exporter,
//! connects the configured bus and serves clients until Ctrl+C or SIGTERM.

mod cli;

use std::sync::Arc;

use clap::Parser;
use log::info;
use wiregate::{
    GatewayError,
    bus::{BusBridge, MessageBus, memory::MemoryBus},
    config::{BusBackend, DEFAULT_CONFIG_PATH, GatewayConfig},
    connection::GatewayContext,
    logging,
    server::GatewayServer,
};

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    let cli = cli::Cli::parse();
    let mut config = match &cli.conf {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::load_or_default(DEFAULT_CONFIG_PATH.as_ref())?,
    };
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    config.validate()?;
    logging::init(&config.log)?;

    #[cfg(feature = "metrics")]
    if let Some(addr) = config.metrics.listen {
        wiregate::metrics::install_prometheus(addr)?;
        info!("metrics exporter listening: addr={addr}");
    }

    let bus = connect_bus(&config)?;
    let bridge = BusBridge::new(bus, config.bridge_settings()).await?;
    let ctx = GatewayContext::new(Arc::new(bridge), config.connection_settings());
    let server = GatewayServer::bind(config.server.listen, ctx)
        .await?
        .workers(config.server.workers);
    info!(
        "gateway listening: addr={}, backend={:?}, workers={}",
        server.local_addr().map_err(wiregate::server::ServerError::from)?,
        config.bus.backend,
        server.worker_count()
    );
    server.run().await?;
    Ok(())
}

fn connect_bus(config: &GatewayConfig) -> Result<Arc<dyn MessageBus>, GatewayError> {
    match config.bus.backend {
        BusBackend::Memory => Ok(Arc::new(MemoryBus::new(config.bus.partitions))),
        #[cfg(feature = "kafka")]
        BusBackend::Kafka => Ok(Arc::new(wiregate::bus::kafka::KafkaBus::new(&config.bus.servers)?)),
        #[cfg(not(feature = "kafka"))]
        BusBackend::Kafka => Err(GatewayError::BackendUnavailable("kafka")),
    }
}
