//! Pipeline ingestion - validates broker messages and feeds the category stores
//!
//! Per event:
//!
//! ```text
//! Idle --message--> Validating --ok--> Appending --> Idle
//!                        |
//!                        +--invalid / unknown / duplicate--> Rejected (logged, dropped)
//! ```
//!
//! Side effects are ordered append-then-invalidate: by the time a view key
//! is invalidated the new record is already visible to snapshots, so the
//! next reader can never recompute from data that predates the event.

use super::dedup::DedupWindow;
use super::engine::AggregationService;
use super::types::{BrokerMessage, Category, EventEnvelope};
use super::validation::{decode_message, validate};
use crate::error::AnalyticsError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Result of handling one event
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted { category: Category, evicted: usize },
    Rejected(AnalyticsError),
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted { .. })
    }
}

pub struct IngestionPipeline {
    service: Arc<AggregationService>,
    dedup: Option<Mutex<DedupWindow>>,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl IngestionPipeline {
    /// Create a pipeline writing into `service`
    ///
    /// `dedup_window` of 0 disables id-based deduplication.
    pub fn new(service: Arc<AggregationService>, dedup_window: usize) -> Self {
        Self::new_with_clock(service, dedup_window, Box::new(Utc::now))
    }

    /// Create a pipeline with a custom clock for events without a timestamp
    pub fn new_with_clock(
        service: Arc<AggregationService>,
        dedup_window: usize,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        let dedup = (dedup_window > 0).then(|| Mutex::new(DedupWindow::new(dedup_window)));
        Self {
            service,
            dedup,
            now_fn,
        }
    }

    pub fn service(&self) -> &Arc<AggregationService> {
        &self.service
    }

    /// Decode and handle a raw broker message
    pub fn handle_message(&self, message: &BrokerMessage) -> IngestOutcome {
        match decode_message(message, (self.now_fn)()) {
            Ok(envelope) => self.handle(envelope),
            Err(err) => self.reject(err),
        }
    }

    /// Validate, append and invalidate for one envelope
    ///
    /// Never fails outward: validation problems are logged and reported
    /// as `Rejected`.
    pub fn handle(&self, envelope: EventEnvelope) -> IngestOutcome {
        let record = match validate(&envelope) {
            Ok(record) => record,
            Err(err) => return self.reject(err),
        };

        if let (Some(dedup), Some(id)) = (&self.dedup, &envelope.id) {
            if !dedup.lock().check_and_record(id) {
                return self.reject(AnalyticsError::Duplicate(id.clone()));
            }
        }

        let (category, evicted) = self.service.append(record);
        self.service.invalidate_category(category);
        self.service.record_accepted();

        log::debug!(
            "✅ Ingested {} event at {}{}",
            category,
            envelope.timestamp,
            if evicted > 0 { " (store full, oldest evicted)" } else { "" }
        );

        IngestOutcome::Accepted { category, evicted }
    }

    fn reject(&self, err: AnalyticsError) -> IngestOutcome {
        if matches!(err, AnalyticsError::Duplicate(_)) {
            self.service.record_duplicate();
            log::debug!("🔁 Dropped duplicate event: {}", err);
        } else {
            self.service.record_rejected();
            log::warn!("⚠️  Rejected event: {}", err);
        }
        IngestOutcome::Rejected(err)
    }
}

/// Consume broker messages until the channel closes
///
/// Messages are handled strictly in arrival order, one at a time, which
/// preserves per-category ordering. A bad message is logged and skipped;
/// it never stops the loop. Throughput is logged every `stats_interval_ms`.
pub async fn start_ingestion(
    mut rx: mpsc::Receiver<BrokerMessage>,
    pipeline: Arc<IngestionPipeline>,
    stats_interval_ms: u64,
) {
    log::info!("🚀 Starting event ingestion");
    log::info!("   ├─ Stats interval: {}ms", stats_interval_ms);
    log::info!("   └─ Waiting for events...");

    let mut stats_timer = interval(Duration::from_millis(stats_interval_ms.max(1)));
    stats_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut accepted = 0u64;
    let mut rejected = 0u64;
    let mut window_start = std::time::Instant::now();

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    log::warn!("⚠️  Event channel closed, stopping ingestion");
                    break;
                };
                if pipeline.handle_message(&message).is_accepted() {
                    accepted += 1;
                } else {
                    rejected += 1;
                }
            }

            _ = stats_timer.tick() => {
                let elapsed = window_start.elapsed().as_secs_f64();
                if accepted + rejected > 0 && elapsed > 0.0 {
                    log::info!(
                        "📊 Ingestion rate: {:.1} events/sec (accepted: {}, rejected: {}) | channel backlog: {}",
                        (accepted + rejected) as f64 / elapsed,
                        accepted,
                        rejected,
                        rx.len()
                    );
                }
                accepted = 0;
                rejected = 0;
                window_start = std::time::Instant::now();
            }
        }
    }

    let totals = pipeline.service().ingest_stats();
    log::info!(
        "✅ Ingestion stopped (accepted: {}, rejected: {}, duplicates: {})",
        totals.accepted,
        totals.rejected,
        totals.duplicates
    );
}
