//! Analytics Runtime
//!
//! Tails a JSONL event feed into the aggregation pipeline and periodically
//! logs every category summary plus a health report.
//!
//! Usage:
//!   cargo run --release --bin analytics_runtime
//!
//! Environment variables (see `PipelineConfig::from_env`):
//!   ANALYTICS_EVENTS_PATH - JSONL feed to tail (default: events.jsonl)
//!   ANALYTICS_FROM_BEGINNING - Replay existing lines first (default: false)
//!   ANALYTICS_STORE_CAPACITY - Records kept per category (default: 10000)
//!   ANALYTICS_CACHE_TTL_SECS - Summary cache TTL (default: 3600)
//!   ANALYTICS_REPORT_INTERVAL_MS - Summary report interval (default: 30000)

use dotenv::dotenv;
use eventlens::pipeline::{
    config::PipelineConfig, engine::AggregationService, ingestion::start_ingestion,
    query::QueryFacade, types::BrokerMessage, Category, IngestionPipeline,
};
use eventlens::source::{supervise_source, ExponentialBackoff, JsonlSource};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::init();

    info!("🚀 Analytics Runtime");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::from_env();

    info!("✅ Configuration loaded");
    info!("   ├─ Events feed: {}", config.events_path);
    info!("   ├─ Replay from beginning: {}", config.from_beginning);
    info!("   ├─ Store capacity: {} records/category", config.store_capacity);
    info!(
        "   ├─ Cache TTL: {}s (overrides: {})",
        config.default_ttl_secs,
        config.ttl_overrides.len()
    );
    if config.dedup_window > 0 {
        info!("   ├─ Dedup window: {} ids", config.dedup_window);
    } else {
        info!("   ├─ Dedup window: disabled");
    }
    info!("   ├─ Channel buffer: {} messages", config.channel_buffer);
    info!("   └─ Report interval: {}ms", config.report_interval_ms);

    let service = Arc::new(AggregationService::new(&config));
    let pipeline = Arc::new(IngestionPipeline::new(service.clone(), config.dedup_window));
    let facade = QueryFacade::new(service);
    info!("✅ AggregationService created");

    let (tx, rx) = mpsc::channel::<BrokerMessage>(config.channel_buffer);

    // Task 1: Source supervisor (reconnects with backoff)
    let source_path = config.events_path.clone();
    let from_beginning = config.from_beginning;
    let source_task = tokio::spawn(async move {
        run_source(source_path, from_beginning, tx).await;
    });

    // Task 2: Ingestion
    let stats_interval = config.stats_interval_ms;
    let ingestion_task = tokio::spawn(start_ingestion(rx, pipeline, stats_interval));

    // Task 3: Periodic summary report
    let report_interval = Duration::from_millis(config.report_interval_ms.max(1));
    let report_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(report_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            report(&facade).await;
        }
    });

    info!("✅ All background tasks running");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    // Dropping the source closes the channel, which ends ingestion
    source_task.abort();
    report_task.abort();
    if tokio::time::timeout(Duration::from_secs(2), ingestion_task)
        .await
        .is_err()
    {
        warn!("⚠️  Ingestion did not drain within 2s");
    }

    info!("✅ Analytics runtime stopped");
    Ok(())
}

async fn run_source(path: String, from_beginning: bool, tx: mpsc::Sender<BrokerMessage>) {
    let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30), 10);
    // One source for the whole run: reconnects resume at its last offset
    let mut source = JsonlSource::new(&path).from_beginning(from_beginning);

    if let Err(err) = supervise_source(&mut source, &tx, &mut backoff).await {
        error!("❌ Giving up on {}: {}", path, err);
    }
}

async fn report(facade: &QueryFacade) {
    info!("📊 Summary report");
    for category in Category::all() {
        match facade.get_summary(category).await {
            Ok(summary) => match serde_json::to_string(&summary) {
                Ok(json) => info!("   ├─ {}: {}", category, json),
                Err(err) => error!("   ├─ {}: cannot serialize summary: {}", category, err),
            },
            Err(err) => warn!("   ├─ {}: {}", category, err),
        }
    }

    let health = facade.health();
    info!(
        "   └─ Health: {} (accepted: {}, rejected: {}, duplicates: {}, cache hits: {}, recomputations: {})",
        health.status,
        health.ingestion.accepted,
        health.ingestion.rejected,
        health.ingestion.duplicates,
        health.cache.hits,
        health.cache.recomputations
    );
}
