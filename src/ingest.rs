//! Ingestion coordinator
//!
//! Fans provider fetches out into concurrent tasks, funnels their IOCs
//! through a bounded channel, and persists them in batches. The bounded
//! channel applies backpressure from slow persistence onto fast producers;
//! the timer flush bounds latency when providers trickle; the catalog's
//! unique key makes re-runs safe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::ioc::Ioc;
use crate::metrics::Metrics;
use crate::providers::ThreatProvider;
use crate::repository::Database;

/// Tuning knobs for one ingestion run
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Channel capacity between producers and the batch writer
    pub channel_capacity: usize,
    /// Flush when this many items are buffered
    pub batch_size: usize,
    /// Flush a non-empty buffer at least this often
    pub flush_interval: Duration,
    /// Overall deadline for the run
    pub deadline: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 2000,
            batch_size: 2000,
            flush_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(600),
        }
    }
}

/// Summary of a completed ingestion run
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Items produced by providers and accepted onto the channel
    pub fetched: u64,
    /// Rows newly inserted into the catalog
    pub saved: u64,
    /// Providers whose fetch failed
    pub provider_failures: u64,
    /// Batches flushed (including failed ones)
    pub batches: u64,
    pub duration_ms: u64,
}

/// Run one full ingestion pass over the given providers.
///
/// A failing provider is logged and skipped; a failing batch save is logged
/// and dropped. Partial ingestion is preferred to no ingestion.
pub async fn run_ingestion(
    db: Database,
    providers: Vec<Box<dyn ThreatProvider>>,
    client: reqwest::Client,
    config: IngestConfig,
    metrics: Arc<Metrics>,
) -> IngestReport {
    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + config.deadline;

    let (tx, mut rx) = mpsc::channel::<Ioc>(config.channel_capacity);
    let fetched = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));

    info!("ingestion started with {} providers", providers.len());

    let mut handles = Vec::with_capacity(providers.len());
    for provider in providers {
        let tx = tx.clone();
        let client = client.clone();
        let fetched = fetched.clone();
        let failures = failures.clone();
        let metrics = metrics.clone();

        handles.push(tokio::spawn(async move {
            let name = provider.name().to_string();

            let result = tokio::time::timeout_at(deadline, provider.fetch(&client)).await;
            let iocs = match result {
                Ok(Ok(iocs)) => iocs,
                Ok(Err(e)) => {
                    warn!("provider {} failed: {}", name, e);
                    failures.fetch_add(1, Ordering::Relaxed);
                    metrics.inc_provider_failures();
                    return;
                }
                Err(_) => {
                    warn!("provider {} hit the ingestion deadline", name);
                    failures.fetch_add(1, Ordering::Relaxed);
                    metrics.inc_provider_failures();
                    return;
                }
            };

            info!("provider {} returned {} IOCs", name, iocs.len());

            for ioc in iocs {
                tokio::select! {
                    sent = tx.send(ioc) => {
                        if sent.is_err() {
                            return;
                        }
                        fetched.fetch_add(1, Ordering::Relaxed);
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        warn!("provider {} abandoned sending at the deadline", name);
                        return;
                    }
                }
            }
        }));
    }
    // The producers hold the only senders; the channel closes when the last
    // one finishes.
    drop(tx);

    let join_all = tokio::spawn(async move {
        for handle in handles {
            let _ = handle.await;
        }
    });

    let mut report = IngestReport::default();
    let mut buffer: Vec<Ioc> = Vec::with_capacity(config.batch_size);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = rx.recv() => {
                match item {
                    Some(ioc) => {
                        buffer.push(ioc);
                        if buffer.len() >= config.batch_size {
                            flush(&db, &mut buffer, &mut report, &metrics);
                        }
                    }
                    None => {
                        // All producers finished; drain what is left
                        flush(&db, &mut buffer, &mut report, &metrics);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&db, &mut buffer, &mut report, &metrics);
                }
            }
        }
    }

    let _ = join_all.await;

    report.fetched = fetched.load(Ordering::Relaxed);
    report.provider_failures = failures.load(Ordering::Relaxed);
    report.duration_ms = start.elapsed().as_millis() as u64;

    info!(
        "ingestion finished: {} fetched, {} saved, {} provider failures in {}ms",
        report.fetched, report.saved, report.provider_failures, report.duration_ms
    );

    report
}

fn flush(db: &Database, buffer: &mut Vec<Ioc>, report: &mut IngestReport, metrics: &Metrics) {
    if buffer.is_empty() {
        return;
    }

    let batch_len = buffer.len();
    report.batches += 1;

    match db.save_batch(buffer) {
        Ok(inserted) => {
            report.saved += inserted as u64;
            metrics.add_iocs_ingested(inserted as u64);
            metrics.inc_batches_flushed();
            info!("batch saved: {} items, {} new", batch_len, inserted);
        }
        Err(e) => {
            // The batch is dropped; the next run will pick the items up again
            error!("failed to save batch of {}: {}", batch_len, e);
            metrics.inc_batch_failures();
        }
    }

    buffer.clear();
}
