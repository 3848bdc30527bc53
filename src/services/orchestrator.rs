//! Startup scan, live watch and the single-flight drain loop

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::services::classification::is_ingestible;
use crate::services::ingest::{FileIngestor, FileOutcome};
use crate::services::queue::{IngestQueue, WorkItem, WorkReason};
use crate::services::watcher::RootWatcher;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub root: PathBuf,
    /// Tick of the drain loop
    pub drain_interval: Duration,
    /// Wait before reading a file reported by the watcher
    pub settle_delay: Duration,
}

/// Counters for one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub processed: usize,
    pub linked: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub unresolvable: usize,
    pub failed: usize,
    pub catch_up_scheduled: usize,
}

impl DrainSummary {
    fn record(&mut self, outcome: &FileOutcome) {
        self.processed += 1;
        match outcome {
            FileOutcome::Linked { .. } => self.linked += 1,
            FileOutcome::SkippedDuplicate
            | FileOutcome::RecentlyProcessed
            | FileOutcome::NotIngestible => self.skipped += 1,
            FileOutcome::Deferred => self.deferred += 1,
            FileOutcome::Unresolvable(_) => self.unresolvable += 1,
            FileOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Clears the drain flag when the pass ends, however it ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    ingestor: FileIngestor,
    queue: Arc<IngestQueue>,
    draining: AtomicBool,
    stopping: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, ingestor: FileIngestor) -> Self {
        Self {
            config,
            ingestor,
            queue: Arc::new(IngestQueue::new()),
            draining: AtomicBool::new(false),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn queue(&self) -> &Arc<IngestQueue> {
        &self.queue
    }

    /// Enqueue every ingestible file under the root; returns how many were queued
    pub fn startup_scan(&self) -> usize {
        info!(root = %self.config.root.display(), "Starting startup scan");

        let items = WalkDir::new(&self.config.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_ingestible(e.path()))
            .map(|e| WorkItem::startup(e.into_path()));

        let queued = self.queue.push_all(items);
        info!(queued, "Startup scan queued files");
        queued
    }

    /// Process queued items until the queue is empty or a stop is requested.
    /// Returns None when another drain is already running.
    pub async fn drain(&self) -> Option<DrainSummary> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already in flight");
            return None;
        }
        let _guard = DrainGuard(&self.draining);

        let mut summary = DrainSummary::default();
        while !self.stopping.load(Ordering::Acquire) {
            let Some(item) = self.queue.pop() else {
                break;
            };

            if item.reason == WorkReason::Change && !self.config.settle_delay.is_zero() {
                tokio::time::sleep(self.config.settle_delay).await;
            }

            match self.ingestor.process(&item).await {
                Ok(report) => {
                    debug!(
                        path = %item.path.display(),
                        reason = item.reason.label(),
                        outcome = report.outcome.label(),
                        "Processed work item"
                    );
                    summary.record(&report.outcome);
                    summary.catch_up_scheduled += self.queue.push_all(report.follow_ups);
                }
                Err(e) => {
                    error!(
                        path = %item.path.display(),
                        reason = item.reason.label(),
                        error = %format!("{e:#}"),
                        "Work item failed"
                    );
                    summary.processed += 1;
                    summary.failed += 1;
                }
            }
        }

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                linked = summary.linked,
                skipped = summary.skipped,
                deferred = summary.deferred,
                unresolvable = summary.unresolvable,
                failed = summary.failed,
                catch_up = summary.catch_up_scheduled,
                "Drain pass finished"
            );
        }
        Some(summary)
    }

    /// Startup scan plus one full drain, without watching
    pub async fn run_once(&self) -> DrainSummary {
        self.startup_scan();
        self.drain().await.unwrap_or_default()
    }

    /// Watch, scan, then drain on every tick until `shutdown` resolves.
    /// The in-flight item always finishes before this returns.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Registered before the scan so changes during it are buffered
        let _watcher = RootWatcher::start(&self.config.root, self.queue.clone())?;

        let stopping = self.stopping.clone();
        let signal = tokio::spawn(async move {
            shutdown.await;
            info!("Shutdown requested, finishing current item");
            stopping.store(true, Ordering::Release);
        });

        self.startup_scan();
        self.drain().await;

        let mut ticker = tokio::time::interval(self.config.drain_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while !self.stopping.load(Ordering::Acquire) {
            ticker.tick().await;
            if !self.queue.is_empty() {
                self.drain().await;
            }
        }

        signal.abort();
        info!(pending = self.queue.len(), "Ingestion loop stopped");
        Ok(())
    }
}
