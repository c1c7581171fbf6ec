//! Configuration management and validation.
//!
//! Provides the pipeline configuration: source prefixes, join options,
//! warehouse backend and table names, and load retry policy. Values are
//! layered as defaults, then a TOML file, then `LAKEHOUSE_*` environment
//! variables with `__` between nested keys (`LAKEHOUSE_JOIN__KIND=left`).
//! Secrets are never part of the configuration; it only names where to
//! find them.

use crate::constants::*;
use crate::error::{LoaderError, Result};
use crate::models::{Entity, JoinKind};
use crate::warehouse::validate_identifier;
use ::config::builder::{ConfigBuilder, DefaultState};
use ::config::{Config as ConfigLib, Environment, File, FileFormat};
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Supported compression algorithms for parquet files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Snappy compression - good balance of speed and compression
    #[default]
    Snappy,
    /// ZSTD compression - better compression ratio, slower
    Zstd,
    /// LZ4 compression - fastest, lower compression ratio
    Lz4,
    /// No compression
    Uncompressed,
}

impl CompressionAlgorithm {
    /// Convert to polars ParquetCompression type
    pub fn to_polars_compression(&self) -> ParquetCompression {
        match self {
            CompressionAlgorithm::Snappy => ParquetCompression::Snappy,
            CompressionAlgorithm::Zstd => ParquetCompression::Zstd(None),
            CompressionAlgorithm::Lz4 => ParquetCompression::Lz4Raw,
            CompressionAlgorithm::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

/// Where the raw snapshots live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Root of the lake (a local or mounted bucket)
    pub root: PathBuf,
    pub customers: String,
    pub articles: String,
    pub transactions: String,
    /// Glob matched against object file names
    pub pattern: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("lake"),
            customers: DEFAULT_CUSTOMERS_PREFIX.to_string(),
            articles: DEFAULT_ARTICLES_PREFIX.to_string(),
            transactions: DEFAULT_TRANSACTIONS_PREFIX.to_string(),
            pattern: DEFAULT_SOURCE_PATTERN.to_string(),
        }
    }
}

impl SourceConfig {
    /// Storage prefix holding the snapshots of `entity`
    pub fn prefix(&self, entity: Entity) -> &str {
        match entity {
            Entity::Customers => &self.customers,
            Entity::Articles => &self.articles,
            Entity::Transactions => &self.transactions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub kind: JoinKind,
    /// Number of transaction partitions joined in parallel
    pub partitions: usize,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            kind: JoinKind::Inner,
            partitions: DEFAULT_JOIN_PARTITIONS,
        }
    }
}

/// Warehouse table names for each output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub fact: String,
    pub customers: String,
    pub articles: String,
    pub transactions: String,
    /// Unmatched transactions are appended here when set
    pub dead_letter: Option<String>,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            fact: DEFAULT_FACT_TABLE.to_string(),
            customers: DEFAULT_CUSTOMERS_TABLE.to_string(),
            articles: DEFAULT_ARTICLES_TABLE.to_string(),
            transactions: DEFAULT_TRANSACTIONS_TABLE.to_string(),
            dead_letter: None,
        }
    }
}

impl TableNames {
    /// Dimension table receiving the cleaned `entity`
    pub fn dimension(&self, entity: Entity) -> &str {
        match entity {
            Entity::Customers => &self.customers,
            Entity::Articles => &self.articles,
            Entity::Transactions => &self.transactions,
        }
    }

    fn all(&self) -> impl Iterator<Item = &str> {
        [
            Some(self.fact.as_str()),
            Some(self.customers.as_str()),
            Some(self.articles.as_str()),
            Some(self.transactions.as_str()),
            self.dead_letter.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    /// Directory of Parquet tables
    #[default]
    Parquet,
    /// Amazon Redshift via staged Parquet and COPY
    Redshift,
}

/// Amazon Redshift connection and bulk-load settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedshiftConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Environment variable holding the password
    pub password_env: String,
    /// Role allowed to read the staging location and load the warehouse
    pub iam_role_arn: String,
    /// Local (mounted) directory the staged Parquet files are written to
    pub staging_dir: PathBuf,
    /// Object-store URI the warehouse reads `staging_dir` from
    pub staging_uri: String,
}

impl Default for RedshiftConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5439,
            database: "dev".to_string(),
            user: String::new(),
            password_env: "REDSHIFT_PASSWORD".to_string(),
            iam_role_arn: String::new(),
            staging_dir: PathBuf::from("staging"),
            staging_uri: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub backend: WarehouseBackend,
    /// Root directory of the Parquet warehouse
    pub root: PathBuf,
    pub compression: CompressionAlgorithm,
    pub tables: TableNames,
    pub redshift: RedshiftConfig,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::Parquet,
            root: PathBuf::from("warehouse"),
            compression: CompressionAlgorithm::Snappy,
            tables: TableNames::default(),
            redshift: RedshiftConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Attempts per table write, including the first
    pub max_attempts: u32,
    /// Delay before the first retry, doubled for every further retry
    pub retry_backoff_ms: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Global configuration for a pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Identifier reported to the orchestration layer
    pub job_name: String,
    pub sources: SourceConfig,
    pub join: JoinConfig,
    pub warehouse: WarehouseConfig,
    pub load: LoadConfig,
}

impl PipelineConfig {
    /// Parse a TOML configuration document
    pub fn from_toml(content: &str) -> Result<Self> {
        Self::build(ConfigLib::builder().add_source(File::from_str(content, FileFormat::Toml)))
    }

    /// Read a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::build(ConfigLib::builder().add_source(File::from(path).format(FileFormat::Toml)))
    }

    /// Load configuration from `path`, or from the first default location
    /// that exists, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Self::environment())
    }

    /// [`load`](Self::load) with an explicit environment source
    pub fn load_with_env(path: Option<&Path>, environment: Environment) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_locations().into_iter().find(|p| p.exists()),
        };

        let mut builder = ConfigLib::builder();
        match &file {
            Some(file) => {
                debug!("Using configuration file {}", file.display());
                builder = builder.add_source(File::from(file.as_path()).format(FileFormat::Toml));
            }
            None => debug!("No configuration file found, using defaults"),
        }

        let config = Self::build(builder.add_source(environment))?;
        config.validate()?;
        Ok(config)
    }

    /// `LAKEHOUSE_<SECTION>__<KEY>` overrides from the process environment
    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| LoaderError::configuration(format!("Invalid configuration: {}", e)))
    }

    /// Candidate configuration files, most specific first
    pub fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            locations.push(dir.join("lakehouse-loader").join("config.toml"));
        }
        locations
    }

    /// Check the configuration is usable before any data is touched
    pub fn validate(&self) -> Result<()> {
        if self.join.partitions == 0 {
            return Err(LoaderError::configuration(
                "join.partitions must be at least 1",
            ));
        }
        if self.load.max_attempts == 0 {
            return Err(LoaderError::configuration(
                "load.max_attempts must be at least 1",
            ));
        }
        for entity in Entity::ALL {
            if self.sources.prefix(entity).is_empty() {
                return Err(LoaderError::configuration(format!(
                    "sources.{} prefix must not be empty",
                    entity
                )));
            }
        }
        glob::Pattern::new(&self.sources.pattern).map_err(|e| {
            LoaderError::configuration(format!(
                "sources.pattern '{}' is not a valid glob: {}",
                self.sources.pattern, e
            ))
        })?;
        for table in self.warehouse.tables.all() {
            validate_identifier(table)?;
        }

        if self.warehouse.backend == WarehouseBackend::Redshift {
            let redshift = &self.warehouse.redshift;
            for (field, value) in [
                ("host", &redshift.host),
                ("user", &redshift.user),
                ("iam_role_arn", &redshift.iam_role_arn),
                ("staging_uri", &redshift.staging_uri),
            ] {
                if value.is_empty() {
                    return Err(LoaderError::configuration(format!(
                        "warehouse.redshift.{} is required for the redshift backend",
                        field
                    )));
                }
            }
        }
        Ok(())
    }

    /// Override the job name
    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = job_name.into();
        self
    }

    /// Override the join kind
    pub fn with_join_kind(mut self, kind: JoinKind) -> Self {
        self.join.kind = kind;
        self
    }

    /// Override the number of join partitions
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.join.partitions = partitions;
        self
    }

    /// Point the pipeline at a lake root
    pub fn with_lake_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sources.root = root.into();
        self
    }

    /// Use a Parquet warehouse rooted at `root`
    pub fn with_parquet_warehouse(mut self, root: impl Into<PathBuf>) -> Self {
        self.warehouse.backend = WarehouseBackend::Parquet;
        self.warehouse.root = root.into();
        self
    }

    /// Append unmatched transactions to `table`
    pub fn with_dead_letter_table(mut self, table: impl Into<String>) -> Self {
        self.warehouse.tables.dead_letter = Some(table.into());
        self
    }
}
