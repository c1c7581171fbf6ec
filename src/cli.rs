//! Command-line interface components.

use crate::config::PipelineConfig;
use crate::models::{JoinKind, RunStats};
use crate::pipeline::{Pipeline, RunOptions, default_run_id};
use crate::warehouse::EnvSecretProvider;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "lakehouse-loader")]
#[command(about = "Clean lake snapshots, join them into a fact table and load the warehouse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Configuration file (defaults to lakehouse.toml, then the user config directory)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Job name reported in logs
    #[arg(long)]
    pub job_name: Option<String>,

    /// Run identifier keying every write (defaults to the current UTC time)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Resolve, clean and join, but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Join semantics for unmatched transactions (inner, left)
    #[arg(long, value_name = "KIND")]
    pub join_kind: Option<JoinKind>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    pub fn get_log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }

    /// Configuration from file and environment, with flags applied last
    pub fn resolve_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(job_name) = &self.job_name {
            config = config.with_job_name(job_name.clone());
        }
        if let Some(kind) = self.join_kind {
            config = config.with_join_kind(kind);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn run_options(&self) -> RunOptions {
        let run_id = self.run_id.clone().unwrap_or_else(default_run_id);
        RunOptions::new(run_id).dry_run(self.dry_run)
    }
}

/// Set up tracing to stderr, honouring `RUST_LOG` when set
pub fn init_logging(args: &Args) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lakehouse_loader={}", log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_timer(fmt::time::uptime())
                .with_writer(std::io::stderr),
        )
        .init();

    debug!("Logging initialized at level: {}", log_level);
}

/// Execute the job described by `args`
pub async fn run(args: Args) -> Result<RunStats> {
    let config = args.resolve_config()?;
    let pipeline = Pipeline::from_config(config, &EnvSecretProvider)
        .context("Failed to set up the pipeline")?
        .with_console_output(!args.quiet);

    let stats = pipeline.run(args.run_options()).await?;
    Ok(stats)
}
