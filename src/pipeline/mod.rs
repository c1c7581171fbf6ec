//! Lake to warehouse pipeline
//!
//! Orchestrates one run: resolve the newest snapshot of every entity, clean
//! the three datasets concurrently, assemble the fact table, then load the
//! dimensions, facts and dead-letter rows into the warehouse.

pub mod discovery;
pub mod join;
pub mod loader;

#[cfg(test)]
mod tests;

pub use discovery::{LocalObjectStore, SourceStore};
pub use join::{JoinOutcome, assemble_fact};
pub use loader::{LoadStep, WarehouseLoader};

use crate::config::PipelineConfig;
use crate::error::{LoaderError, Result};
use crate::models::{Entity, Imputation, LoadTarget, RunStats};
use crate::warehouse::{self, SecretProvider, Warehouse, validate_run_id};
use colored::*;
use futures::future::try_join_all;
use polars::prelude::DataFrame;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task;
use tracing::info;

/// Per-run options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Key of every write made by this run
    pub run_id: String,
    /// Resolve, clean and join without writing anything
    pub dry_run: bool,
}

impl RunOptions {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new(default_run_id())
    }
}

/// Run id derived from the current UTC time, e.g. `20240315T020000Z`
pub fn default_run_id() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

struct CleanedEntity {
    entity: Entity,
    frame: DataFrame,
    imputations: Vec<Imputation>,
}

/// The batch job
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn SourceStore>,
    warehouse: Arc<dyn Warehouse>,
    console: bool,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn SourceStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            config,
            store,
            warehouse,
            console: false,
        }
    }

    /// Build the source store and warehouse described by `config`
    pub fn from_config(config: PipelineConfig, secrets: &dyn SecretProvider) -> Result<Self> {
        config.validate()?;
        let store = LocalObjectStore::new(config.sources.root.clone(), &config.sources.pattern)?;
        let warehouse = warehouse::from_config(&config.warehouse, secrets)?;
        Ok(Self::new(config, Arc::new(store), warehouse))
    }

    /// Print progress and a run summary to the terminal
    pub fn with_console_output(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run
    pub async fn run(&self, options: RunOptions) -> Result<RunStats> {
        let start_time = Instant::now();
        validate_run_id(&options.run_id)?;

        info!(
            "Starting job '{}' run {}{}",
            self.config.job_name,
            options.run_id,
            if options.dry_run { " (dry run)" } else { "" }
        );
        if self.console {
            println!("{}", "Starting lakehouse load".bright_green().bold());
            println!("  {} {}", "Run:".bright_cyan(), options.run_id);
            println!(
                "  {} {}",
                "Lake:".bright_cyan(),
                self.config.sources.root.display()
            );
        }

        // Every source must resolve before anything is read
        let sources = self.resolve_sources()?;

        self.announce("Cleaning datasets...");
        let cleaned = try_join_all(
            sources
                .iter()
                .map(|(entity, object)| self.clean_entity(*entity, object.clone())),
        )
        .await?;

        let mut stats = RunStats {
            run_id: options.run_id.clone(),
            job_name: self.config.job_name.clone(),
            sources,
            dry_run: options.dry_run,
            ..Default::default()
        };
        for entity in &cleaned {
            info!("Cleaned {} {} rows", entity.frame.height(), entity.entity);
            stats.cleaned_rows.push((entity.entity, entity.frame.height()));
            stats.imputations.extend(entity.imputations.iter().cloned());
        }

        let customers = find(&cleaned, Entity::Customers)?;
        let articles = find(&cleaned, Entity::Articles)?;
        let transactions = find(&cleaned, Entity::Transactions)?;

        self.announce("Assembling fact table...");
        let outcome = assemble_fact(transactions, customers, articles, &self.config.join).await?;
        stats.fact_rows = outcome.fact.height();
        stats.rejected = outcome.counts;
        info!(
            "Fact table has {} rows ({} unmatched transactions)",
            stats.fact_rows, stats.rejected.total
        );

        if options.dry_run {
            info!("Dry run, skipping warehouse load");
        } else {
            self.announce("Loading warehouse...");
            let steps = self.load_plan(&cleaned, &outcome);
            let loader = WarehouseLoader::new(self.warehouse.clone(), self.config.load.clone())
                .with_progress(self.console);
            stats.loads = loader.load_all(&steps, &options.run_id).await?;
        }

        stats.processing_time_ms = start_time.elapsed().as_millis();
        if self.console {
            print_summary(&stats);
        }
        info!(
            "Run {} finished in {}ms",
            stats.run_id, stats.processing_time_ms
        );
        Ok(stats)
    }

    fn resolve_sources(&self) -> Result<Vec<(Entity, PathBuf)>> {
        Entity::ALL
            .iter()
            .map(|&entity| {
                let object = self
                    .store
                    .resolve_latest(self.config.sources.prefix(entity))?;
                info!("Using {} snapshot {}", entity, object.display());
                Ok((entity, object))
            })
            .collect()
    }

    async fn clean_entity(&self, entity: Entity, object: PathBuf) -> Result<CleanedEntity> {
        let store = self.store.clone();
        task::spawn_blocking(move || -> Result<CleanedEntity> {
            let raw = store.scan(&object)?;
            let cleaned = (entity.cleaner())(raw)?;
            Ok(CleanedEntity {
                entity,
                frame: cleaned.frame.collect()?,
                imputations: cleaned.imputations,
            })
        })
        .await?
    }

    /// Dimension overwrites, then the fact append, then the dead letter
    fn load_plan<'a>(
        &self,
        cleaned: &'a [CleanedEntity],
        outcome: &'a JoinOutcome,
    ) -> Vec<LoadStep<'a>> {
        let tables = &self.config.warehouse.tables;
        let mut steps: Vec<LoadStep<'a>> = cleaned
            .iter()
            .map(|entity| LoadStep {
                frame: &entity.frame,
                target: LoadTarget::overwrite(tables.dimension(entity.entity)),
            })
            .collect();

        steps.push(LoadStep {
            frame: &outcome.fact,
            target: LoadTarget::append(&tables.fact),
        });

        if let Some(dead_letter) = &tables.dead_letter {
            if outcome.rejected.height() > 0 {
                steps.push(LoadStep {
                    frame: &outcome.rejected,
                    target: LoadTarget::append(dead_letter),
                });
            }
        }
        steps
    }

    fn announce(&self, step: &str) {
        if self.console {
            println!("\n{}", step.bright_yellow());
        }
    }
}

fn find(cleaned: &[CleanedEntity], entity: Entity) -> Result<&DataFrame> {
    cleaned
        .iter()
        .find(|c| c.entity == entity)
        .map(|c| &c.frame)
        .ok_or_else(|| LoaderError::Task {
            message: format!("no cleaned {} dataset", entity),
        })
}

fn print_summary(stats: &RunStats) {
    println!("\n{}", "Run Summary".bright_green().bold());
    println!(
        "  {} {}ms",
        "Time elapsed:".bright_cyan(),
        stats.processing_time_ms.to_string().bright_white()
    );
    for (entity, rows) in &stats.cleaned_rows {
        println!(
            "  {} {}",
            format!("Cleaned {}:", entity).bright_cyan(),
            rows.to_string().bright_white()
        );
    }
    for imputation in &stats.imputations {
        println!(
            "  {} {} null {}.{} -> {}",
            "Imputed".bright_cyan(),
            imputation.filled,
            imputation.entity,
            imputation.column,
            imputation.value
        );
    }
    println!(
        "  {} {}",
        "Fact rows:".bright_cyan(),
        stats.fact_rows.to_string().bright_white().bold()
    );
    if stats.rejected.total > 0 {
        println!(
            "  {} {} (customer {}, article {})",
            "Unmatched:".bright_red(),
            stats.rejected.total.to_string().bright_red().bold(),
            stats.rejected.missing_customer,
            stats.rejected.missing_article
        );
    }
    if stats.dry_run {
        println!("  {}", "Dry run: nothing was written".bright_yellow());
    }
    for load in &stats.loads {
        println!(
            "  {} {} rows -> {} ({})",
            "Loaded".bright_cyan(),
            load.rows.to_string().bright_white(),
            load.table,
            load.mode
        );
    }
}
