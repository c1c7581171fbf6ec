//! Parquet directory warehouse
//!
//! Each table is a directory of Parquet part files under the warehouse
//! root. Writes are first materialised in a `_staging` directory and then
//! moved into place with renames, so a failed write never leaves a
//! half-written table behind:
//!
//! ```text
//! warehouse/
//!   _staging/            in-flight writes
//!   customers/
//!     part-<run_id>.parquet
//!   warehouse/
//!     part-<run_a>.parquet
//!     part-<run_b>.parquet
//! ```

use super::{Warehouse, validate_identifier, validate_run_id};
use crate::config::CompressionAlgorithm;
use crate::constants::STAGING_DIR_NAME;
use crate::error::{LoaderError, Result};
use crate::models::{LoadTarget, WriteMode};
use async_trait::async_trait;
use polars::prelude::{
    DataFrame, LazyFrame, ParquetWriter as PolarsParquetWriter, StatisticsOptions, UnionArgs,
    concat, len,
};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::debug;

/// Warehouse backed by a directory of Parquet tables
#[derive(Debug, Clone)]
pub struct ParquetWarehouse {
    root: PathBuf,
    compression: CompressionAlgorithm,
}

impl ParquetWarehouse {
    pub fn new(root: PathBuf, compression: CompressionAlgorithm) -> Self {
        Self { root, compression }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read every part file of `table` into one frame
    pub async fn read_table(&self, table: &str) -> Result<DataFrame> {
        validate_identifier(table)?;
        let root = self.root.clone();
        let table = table.to_string();

        // Parquet scans block on Polars' own runtime
        task::spawn_blocking(move || -> Result<DataFrame> {
            Ok(scan_table(&root, &table)?.collect()?)
        })
        .await?
    }
}

#[async_trait]
impl Warehouse for ParquetWarehouse {
    fn name(&self) -> &'static str {
        "parquet"
    }

    async fn write(&self, frame: &DataFrame, target: &LoadTarget, run_id: &str) -> Result<usize> {
        validate_identifier(&target.table)?;
        validate_run_id(run_id)?;

        let root = self.root.clone();
        let compression = self.compression;
        let target = target.clone();
        let run_id = run_id.to_string();
        let mut frame = frame.clone();

        task::spawn_blocking(move || -> Result<usize> {
            write_table(&root, &mut frame, &target, &run_id, compression)?;
            Ok(frame.height())
        })
        .await?
    }

    async fn row_count(&self, table: &str) -> Result<usize> {
        validate_identifier(table)?;
        let root = self.root.clone();
        let table = table.to_string();

        task::spawn_blocking(move || -> Result<usize> {
            let counted = scan_table(&root, &table)?.select([len()]).collect()?;
            Ok(counted.column("len")?.get(0)?.try_extract::<usize>()?)
        })
        .await?
    }
}

fn scan_table(root: &Path, table: &str) -> Result<LazyFrame> {
    let parts = part_files(&root.join(table))?;
    if parts.is_empty() {
        return Err(LoaderError::TableNotFound {
            table: table.to_string(),
        });
    }

    let frames = parts
        .iter()
        .map(|part| LazyFrame::scan_parquet(part, Default::default()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(concat(frames, UnionArgs::default())?)
}

fn write_table(
    root: &Path,
    frame: &mut DataFrame,
    target: &LoadTarget,
    run_id: &str,
    compression: CompressionAlgorithm,
) -> Result<()> {
    let table_dir = root.join(&target.table);
    let staging_root = root.join(STAGING_DIR_NAME);
    let staging = staging_root.join(format!("{}-{}", target.table, run_id));
    let part_name = format!("part-{}.parquet", run_id);

    // Leftovers of an earlier failed attempt
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let bytes = write_parquet_file(&staging.join(&part_name), frame, compression)?;
    debug!(
        "Staged {} rows ({} bytes) for {} ({})",
        frame.height(),
        bytes,
        target.table,
        target.mode
    );

    match target.mode {
        WriteMode::Overwrite => {
            let previous = staging_root.join(format!("{}-{}.previous", target.table, run_id));
            if previous.exists() {
                fs::remove_dir_all(&previous)?;
            }
            if table_dir.exists() {
                fs::rename(&table_dir, &previous)?;
            }
            fs::rename(&staging, &table_dir)?;
            if previous.exists() {
                fs::remove_dir_all(&previous)?;
            }
        }
        WriteMode::Append => {
            fs::create_dir_all(&table_dir)?;
            // Same run id replaces its own earlier part
            fs::rename(staging.join(&part_name), table_dir.join(&part_name))?;
            fs::remove_dir_all(&staging)?;
        }
    }

    Ok(())
}

/// Write `frame` to a single Parquet file, returning its size in bytes
pub(crate) fn write_parquet_file(
    path: &Path,
    frame: &mut DataFrame,
    compression: CompressionAlgorithm,
) -> Result<u64> {
    let file = fs::File::create(path)?;
    let bytes = PolarsParquetWriter::new(file)
        .with_compression(compression.to_polars_compression())
        .with_statistics(StatisticsOptions::full())
        .finish(frame)?;
    Ok(bytes)
}

/// Part files of a table directory in name order
fn part_files(table_dir: &Path) -> Result<Vec<PathBuf>> {
    if !table_dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = table_dir.join("*.parquet");
    let mut parts = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| LoaderError::configuration(format!("Invalid table path pattern: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LoaderError::Io(e.into_error()))?;
    parts.sort();
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use tempfile::TempDir;

    fn warehouse(temp_dir: &TempDir) -> ParquetWarehouse {
        ParquetWarehouse::new(temp_dir.path().join("wh"), CompressionAlgorithm::Snappy)
    }

    fn frame(ids: &[i64]) -> DataFrame {
        df!("id" => ids).unwrap()
    }

    #[tokio::test]
    async fn test_overwrite_replaces_table() {
        let temp_dir = TempDir::new().unwrap();
        let wh = warehouse(&temp_dir);
        let target = LoadTarget::overwrite("customers");

        wh.write(&frame(&[1, 2, 3]), &target, "run1").await.unwrap();
        wh.write(&frame(&[4, 5]), &target, "run2").await.unwrap();

        let table = wh.read_table("customers").await.unwrap();
        assert!(table.equals(&frame(&[4, 5])));
        assert_eq!(wh.row_count("customers").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_accumulates_runs() {
        let temp_dir = TempDir::new().unwrap();
        let wh = warehouse(&temp_dir);
        let target = LoadTarget::append("warehouse");

        wh.write(&frame(&[1, 2, 3]), &target, "run1").await.unwrap();
        wh.write(&frame(&[4, 5]), &target, "run2").await.unwrap();

        assert_eq!(wh.row_count("warehouse").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_append_is_idempotent_per_run() {
        let temp_dir = TempDir::new().unwrap();
        let wh = warehouse(&temp_dir);
        let target = LoadTarget::append("warehouse");

        wh.write(&frame(&[1, 2, 3]), &target, "run1").await.unwrap();
        wh.write(&frame(&[1, 2, 3]), &target, "run1").await.unwrap();

        assert_eq!(wh.row_count("warehouse").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_staging_is_cleaned_up() {
        let temp_dir = TempDir::new().unwrap();
        let wh = warehouse(&temp_dir);

        wh.write(&frame(&[1]), &LoadTarget::overwrite("a"), "run1")
            .await
            .unwrap();
        wh.write(&frame(&[1]), &LoadTarget::append("b"), "run1")
            .await
            .unwrap();

        let staging = wh.root().join(STAGING_DIR_NAME);
        assert_eq!(fs::read_dir(staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_read_table_concatenates_parts() {
        let temp_dir = TempDir::new().unwrap();
        let wh = warehouse(&temp_dir);
        let target = LoadTarget::append("warehouse");

        wh.write(&frame(&[1, 2]), &target, "run1").await.unwrap();
        wh.write(&frame(&[3]), &target, "run2").await.unwrap();

        let table = wh.read_table("warehouse").await.unwrap();
        assert!(table.equals(&frame(&[1, 2, 3])));
    }

    #[tokio::test]
    async fn test_missing_table() {
        let temp_dir = TempDir::new().unwrap();
        let wh = warehouse(&temp_dir);

        assert!(matches!(
            wh.row_count("nothing_here").await,
            Err(LoaderError::TableNotFound { .. })
        ));
        assert!(matches!(
            wh.read_table("nothing_here").await,
            Err(LoaderError::TableNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_unsafe_names() {
        let temp_dir = TempDir::new().unwrap();
        let wh = warehouse(&temp_dir);

        let bad_table = wh
            .write(&frame(&[1]), &LoadTarget::overwrite("../outside"), "run1")
            .await;
        assert!(matches!(bad_table, Err(LoaderError::InvalidIdentifier { .. })));

        let reserved = wh
            .write(&frame(&[1]), &LoadTarget::overwrite(STAGING_DIR_NAME), "run1")
            .await;
        assert!(matches!(reserved, Err(LoaderError::InvalidIdentifier { .. })));

        let bad_run = wh
            .write(&frame(&[1]), &LoadTarget::overwrite("ok"), "../run")
            .await;
        assert!(matches!(bad_run, Err(LoaderError::InvalidIdentifier { .. })));
    }
}
