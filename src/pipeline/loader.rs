//! Warehouse loading with retries
//!
//! Writes the outputs of a run in a fixed order: the cleaned dimension
//! snapshots (overwrite), then the fact table (append), then the dead-letter
//! rows (append). Every write is retried with an exponential backoff. Writes are
//! keyed by run id, so a retried write replaces whatever a failed attempt
//! may have left. When a write still fails the error names the tables that
//! were already written, leaving the operator to decide on a re-run.

use crate::config::LoadConfig;
use crate::error::{LoaderError, Result};
use crate::models::{LoadReceipt, LoadTarget};
use crate::warehouse::Warehouse;
use backon::{ExponentialBuilder, Retryable};
use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::DataFrame;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound of a single retry delay, as a multiple of the base delay
const MAX_BACKOFF_FACTOR: u64 = 16;

/// One dataset headed for one table
pub struct LoadStep<'a> {
    pub frame: &'a DataFrame,
    pub target: LoadTarget,
}

/// Writes datasets into a warehouse
pub struct WarehouseLoader {
    warehouse: Arc<dyn Warehouse>,
    config: LoadConfig,
    show_progress: bool,
}

impl WarehouseLoader {
    pub fn new(warehouse: Arc<dyn Warehouse>, config: LoadConfig) -> Self {
        Self {
            warehouse,
            config,
            show_progress: false,
        }
    }

    /// Show a progress bar while loading
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Execute `steps` in order, stopping at the first write that cannot be completed
    pub async fn load_all(&self, steps: &[LoadStep<'_>], run_id: &str) -> Result<Vec<LoadReceipt>> {
        let progress = self.progress_bar(steps.len() as u64);
        let mut receipts = Vec::with_capacity(steps.len());

        for step in steps {
            progress.set_message(format!("{} ({})", step.target.table, step.target.mode));

            match self.load_with_retry(step, run_id).await {
                Ok(receipt) => receipts.push(receipt),
                Err((attempts, error)) => {
                    progress.abandon_with_message(format!("failed on {}", step.target.table));
                    return Err(LoaderError::Load {
                        table: step.target.table.clone(),
                        attempts,
                        reason: error.to_string(),
                        completed: receipts.iter().map(|r: &LoadReceipt| r.table.clone()).collect(),
                    });
                }
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        Ok(receipts)
    }

    async fn load_with_retry(
        &self,
        step: &LoadStep<'_>,
        run_id: &str,
    ) -> std::result::Result<LoadReceipt, (u32, LoaderError)> {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let warehouse = &self.warehouse;
        let (frame, target) = (step.frame, &step.target);

        let written = (|| async move {
            counter.fetch_add(1, Ordering::Relaxed);
            warehouse.write(frame, target, run_id).await
        })
        .retry(self.backoff())
        // Bad names never succeed on retry
        .when(|e| !matches!(e, LoaderError::InvalidIdentifier { .. }))
        .notify(|e: &LoaderError, delay: Duration| {
            warn!(
                "Write to {} failed (attempt {}/{}): {}; retrying in {:?}",
                target.table,
                counter.load(Ordering::Relaxed),
                self.config.max_attempts.max(1),
                e,
                delay
            );
        })
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match written {
            Ok(rows) => {
                info!(
                    "Wrote {} rows to {} ({}, {} backend)",
                    rows,
                    target.table,
                    target.mode,
                    self.warehouse.name()
                );
                Ok(LoadReceipt {
                    table: target.table.clone(),
                    mode: target.mode,
                    rows,
                    attempts,
                })
            }
            Err(e) => Err((attempts, e)),
        }
    }

    /// Delay doubles from `retry_backoff_ms` until `max_attempts` writes were made
    fn backoff(&self) -> ExponentialBuilder {
        let retries = self.config.max_attempts.max(1) - 1;
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.config.retry_backoff_ms))
            .with_max_delay(Duration::from_millis(
                self.config.retry_backoff_ms.saturating_mul(MAX_BACKOFF_FACTOR),
            ))
            .with_max_times(retries as usize)
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb.set_message("Loading warehouse tables...");
        pb
    }
}
