//! Error handling for lakehouse loading operations.
//!
//! Provides error types with context for source resolution, cleaning,
//! joining and warehouse load failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("No objects found under prefix '{prefix}' in {root}")]
    SourceNotFound { root: PathBuf, prefix: String },

    #[error("Column '{column}' is missing from the {entity} dataset")]
    MissingColumn { entity: String, column: String },

    #[error("Data validation failed for {entity}: {reason}")]
    DataValidation { entity: String, reason: String },

    #[error("Failed to parse {unparsed} value(s) of column '{column}' as dates ({reason})")]
    DateParse {
        column: String,
        unparsed: u64,
        reason: String,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Secret '{name}' is not available: {reason}")]
    Secret { name: String, reason: String },

    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Warehouse table not found: {table}")]
    TableNotFound { table: String },

    #[error(
        "Load of table '{table}' failed after {attempts} attempt(s): {reason}. Tables already written: [{}]",
        .completed.join(", ")
    )]
    Load {
        table: String,
        attempts: u32,
        reason: String,
        completed: Vec<String>,
    },

    #[error("Background task failed: {message}")]
    Task { message: String },

    #[cfg(feature = "redshift")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LoaderError {
    pub fn missing_column(entity: impl Into<String>, column: impl Into<String>) -> Self {
        Self::MissingColumn {
            entity: entity.into(),
            column: column.into(),
        }
    }

    pub fn data_validation(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataValidation {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl From<tokio::task::JoinError> for LoaderError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Task {
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoaderError>;
