use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use events_relay::bus::EventBus;
use events_relay::config::AppCfg;
use events_relay::db::PgEventStore;
use events_relay::nats;
use events_relay::registry::SchemaRegistry;
use events_relay::supervisor::Supervisor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    let cfg_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("APP_CONF").ok())
        .unwrap_or_else(|| "./config.yaml".to_string());
    let cfg = AppCfg::load(&cfg_path)?;
    info!("Starting {} with config {}", cfg.get_name(), cfg_path);

    let db_schema_path = std::env::args()
        .nth(2)
        .unwrap_or_else(|| cfg.postgres.schema.clone());
    let db_schema = std::fs::read_to_string(Path::new(&db_schema_path))?;

    let registry = SchemaRegistry::load(&cfg.interfaces)?;
    info!("Loaded interface descriptions: {}", registry.contract_types().collect::<Vec<_>>().join(", "));

    // deps
    let store = Arc::new(PgEventStore::connect(&cfg.postgres.dsn, &db_schema).await?);
    let bus: Option<Arc<dyn EventBus>> = if cfg.is_nats_enabled() {
        Some(Arc::new(nats::connect(&cfg.nats.url).await))
    } else {
        warn!("NATS is disabled, event logs are stored without being published");
        None
    };

    let supervisor = Supervisor::from_config(&cfg, &registry, store, bus).await?;
    let interval = Duration::from_secs(cfg.scan.interval_secs());

    supervisor
        .run(interval, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("{} stopped", cfg.get_name());
    Ok(())
}
