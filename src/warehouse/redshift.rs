//! Amazon Redshift bulk loading
//!
//! Datasets are staged as Parquet under the staging directory (mirrored to
//! the object store the cluster reads from) and loaded with `COPY`. Each
//! table load runs in a single transaction. Overwrite deletes every row
//! before copying. Appended rows carry a `load_run_id` column, and append
//! deletes the rows of its own run before copying, so retrying a write or
//! re-running a job with the same id never duplicates rows. The staged
//! files of a table are removed once its load has finished.
//!
//! Statement generation is independent of the database client and always
//! compiled; the client itself needs the `redshift` feature.

use super::parquet_store::write_parquet_file;
use super::validate_identifier;
use crate::config::CompressionAlgorithm;
use crate::constants::{LOAD_RUN_ID_COLUMN, STAGED_PART_NAME};
use crate::error::{LoaderError, Result};
use crate::models::{LoadTarget, WriteMode};
use polars::prelude::{DataFrame, DataType, IntoLazy, Schema, lit};
use std::fs;
use std::path::{Path, PathBuf};

/// Redshift column type for a Polars type
pub fn redshift_type(dtype: &DataType) -> Result<&'static str> {
    let sql_type = match dtype {
        DataType::Boolean => "BOOLEAN",
        DataType::Int32 => "INTEGER",
        DataType::Int64 | DataType::UInt32 => "BIGINT",
        DataType::UInt64 => "DECIMAL(20,0)",
        DataType::Float32 => "REAL",
        DataType::Float64 => "DOUBLE PRECISION",
        DataType::String => "VARCHAR(65535)",
        DataType::Date => "DATE",
        DataType::Datetime(_, None) => "TIMESTAMP",
        DataType::Datetime(_, Some(_)) => "TIMESTAMPTZ",
        other => {
            return Err(LoaderError::configuration(format!(
                "column type {} cannot be loaded into Redshift",
                other
            )));
        }
    };
    Ok(sql_type)
}

/// Quote a column name
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a validated, possibly schema-qualified, table name
pub fn quote_table(table: &str) -> Result<String> {
    validate_identifier(table)?;
    Ok(table
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join("."))
}

/// Quote a string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `CREATE TABLE IF NOT EXISTS` matching the frame schema
pub fn create_table_sql(table: &str, schema: &Schema) -> Result<String> {
    let columns = schema
        .iter()
        .map(|(name, dtype)| Ok(format!("{} {}", quote_ident(name), redshift_type(dtype)?)))
        .collect::<Result<Vec<_>>>()?;
    if columns.is_empty() {
        return Err(LoaderError::configuration(format!(
            "cannot create table {} without columns",
            table
        )));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_table(table)?,
        columns.join(", ")
    ))
}

/// `COPY` of staged Parquet files into `table`
pub fn copy_sql(table: &str, source_uri: &str, iam_role_arn: &str) -> Result<String> {
    Ok(format!(
        "COPY {} FROM {} IAM_ROLE {} FORMAT AS PARQUET",
        quote_table(table)?,
        quote_literal(source_uri),
        quote_literal(iam_role_arn)
    ))
}

/// Staging URI of one table for one run
pub fn staging_uri(base: &str, run_id: &str, table: &str) -> String {
    format!("{}/{}/{}/", base.trim_end_matches('/'), run_id, table)
}

/// Statements executed, in one transaction, to load a staged table.
///
/// `schema` is the schema of the staged frame, so appended tables must
/// already carry the run id column.
pub fn load_statements(
    target: &LoadTarget,
    schema: &Schema,
    source_uri: &str,
    iam_role_arn: &str,
    run_id: &str,
) -> Result<Vec<String>> {
    let table = quote_table(&target.table)?;
    let mut statements = vec![create_table_sql(&target.table, schema)?];
    // DELETE rather than TRUNCATE: TRUNCATE commits the transaction
    match target.mode {
        WriteMode::Overwrite => statements.push(format!("DELETE FROM {}", table)),
        WriteMode::Append => {
            if !schema.contains(LOAD_RUN_ID_COLUMN) {
                return Err(LoaderError::missing_column(&target.table, LOAD_RUN_ID_COLUMN));
            }
            statements.push(format!(
                "DELETE FROM {} WHERE {} = {}",
                table,
                quote_ident(LOAD_RUN_ID_COLUMN),
                quote_literal(run_id)
            ));
        }
    }
    statements.push(copy_sql(&target.table, source_uri, iam_role_arn)?);
    Ok(statements)
}

/// Frame as it is staged for `target`: appended rows are stamped with the run id
pub fn staged_frame(frame: &DataFrame, target: &LoadTarget, run_id: &str) -> Result<DataFrame> {
    match target.mode {
        WriteMode::Overwrite => Ok(frame.clone()),
        WriteMode::Append => Ok(frame
            .clone()
            .lazy()
            .with_column(lit(run_id).alias(LOAD_RUN_ID_COLUMN))
            .collect()?),
    }
}

/// Local staging directory of one table for one run
pub fn staging_path(staging_dir: &Path, run_id: &str, table: &str) -> PathBuf {
    staging_dir.join(run_id).join(table)
}

/// Write `frame` as the single staged part of `table`, replacing earlier attempts
pub fn stage_frame(
    staging_dir: &Path,
    run_id: &str,
    table: &str,
    frame: &mut DataFrame,
    compression: CompressionAlgorithm,
) -> Result<PathBuf> {
    let staged = staging_path(staging_dir, run_id, table);
    if staged.exists() {
        fs::remove_dir_all(&staged)?;
    }
    fs::create_dir_all(&staged)?;
    write_parquet_file(&staged.join(STAGED_PART_NAME), frame, compression)?;
    Ok(staged)
}

/// Remove the staged files of `table`, and the run directory once it is empty
pub fn clear_staging(staging_dir: &Path, run_id: &str, table: &str) -> Result<()> {
    let staged = staging_path(staging_dir, run_id, table);
    if staged.exists() {
        fs::remove_dir_all(&staged)?;
    }

    let run_dir = staging_dir.join(run_id);
    if run_dir.is_dir() && fs::read_dir(&run_dir)?.next().is_none() {
        fs::remove_dir(&run_dir)?;
    }
    Ok(())
}

#[cfg(feature = "redshift")]
pub use client::RedshiftWarehouse;

#[cfg(feature = "redshift")]
mod client {
    use super::{clear_staging, load_statements, quote_table, stage_frame, staged_frame, staging_uri};
    use crate::config::{CompressionAlgorithm, RedshiftConfig};
    use crate::error::Result;
    use crate::models::LoadTarget;
    use crate::warehouse::{Warehouse, validate_identifier, validate_run_id};
    use async_trait::async_trait;
    use polars::prelude::DataFrame;
    use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
    use tokio::task;
    use tracing::{debug, info, warn};

    /// Warehouse loading into an Amazon Redshift cluster
    pub struct RedshiftWarehouse {
        config: RedshiftConfig,
        pool: PgPool,
        compression: CompressionAlgorithm,
    }

    impl RedshiftWarehouse {
        /// Prepare a lazily connecting client; nothing is dialled until the first load
        pub fn connect(
            config: RedshiftConfig,
            password: String,
            compression: CompressionAlgorithm,
        ) -> Result<Self> {
            let options = PgConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .database(&config.database)
                .username(&config.user)
                .password(&password);
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_lazy_with(options);

            Ok(Self {
                config,
                pool,
                compression,
            })
        }

        async fn execute(&self, statements: &[String]) -> Result<()> {
            let mut tx = self.pool.begin().await?;
            for statement in statements {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            tx.commit().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl Warehouse for RedshiftWarehouse {
        fn name(&self) -> &'static str {
            "redshift"
        }

        async fn write(
            &self,
            frame: &DataFrame,
            target: &LoadTarget,
            run_id: &str,
        ) -> Result<usize> {
            validate_identifier(&target.table)?;
            validate_run_id(run_id)?;

            let staging_dir = self.config.staging_dir.clone();
            let compression = self.compression;
            let (frame, target_owned, run) = (frame.clone(), target.clone(), run_id.to_string());
            let staged = task::spawn_blocking(move || -> Result<DataFrame> {
                let mut staged = staged_frame(&frame, &target_owned, &run)?;
                let dir =
                    stage_frame(&staging_dir, &run, &target_owned.table, &mut staged, compression)?;
                debug!("Staged {} rows in {}", staged.height(), dir.display());
                Ok(staged)
            })
            .await??;

            let source = staging_uri(&self.config.staging_uri, run_id, &target.table);
            let statements = load_statements(
                target,
                staged.schema(),
                &source,
                &self.config.iam_role_arn,
                run_id,
            )?;
            let loaded = self.execute(&statements).await;

            let staging_dir = self.config.staging_dir.clone();
            let (run, table) = (run_id.to_string(), target.table.clone());
            let cleared =
                task::spawn_blocking(move || clear_staging(&staging_dir, &run, &table)).await?;
            if let Err(e) = cleared {
                warn!("Failed to remove staged files of {}: {}", target.table, e);
            }
            loaded?;

            info!(
                "Loaded {} rows into Redshift table {} ({})",
                staged.height(),
                target.table,
                target.mode
            );
            Ok(staged.height())
        }

        async fn row_count(&self, table: &str) -> Result<usize> {
            let sql = format!("SELECT COUNT(*) FROM {}", quote_table(table)?);
            let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
            Ok(count.max(0) as usize)
        }
    }
}
