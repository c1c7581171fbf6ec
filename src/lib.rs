//! Lakehouse Loader Library
//!
//! Batch job that takes the newest customer, article and transaction
//! snapshots from a data lake, cleans them, joins them into a fact table
//! and loads the results into a warehouse.
//!
//! This library provides tools for:
//! - Resolving the most recent snapshot under each source prefix
//! - Per-entity cleaning (median age imputation, status normalisation,
//!   calendar attributes, sales channel mode imputation)
//! - A partitioned broadcast join with counted, dead-lettered mismatches
//! - Idempotent, retried warehouse loads (Parquet directory or Redshift)

pub mod cleaning;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod warehouse;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{LoaderError, Result};
pub use models::{Entity, JoinKind, LoadTarget, RunStats, WriteMode};
pub use pipeline::{Pipeline, RunOptions};
