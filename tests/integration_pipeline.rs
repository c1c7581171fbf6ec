//! Integration tests for the lakehouse loader public API

use lakehouse_loader::pipeline::{LocalObjectStore, Pipeline, RunOptions};
use lakehouse_loader::warehouse::{ParquetWarehouse, Warehouse};
use lakehouse_loader::{Entity, JoinKind, LoaderError, PipelineConfig};
use polars::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write_object(root: &Path, key: &str, mut frame: DataFrame) {
    let path = root.join(key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    ParquetWriter::new(fs::File::create(&path).unwrap())
        .finish(&mut frame)
        .unwrap();
}

fn create_lake(root: &Path) {
    write_object(
        root,
        "Customers/Customers_historic/part-0.parquet",
        df!(
            "customer_id" => ["a", "b", "c"],
            "FN" => [None::<f64>, None, None],
            "Active" => [Some(1.0), None, None],
            "club_member_status" => [Some("ACTIVE"), None, Some("LEFT CLUB")],
            "fashion_news_frequency" => [Some("none"), None, Some("Regularly")],
            "age" => [Some(21i64), Some(52), None],
        )
        .unwrap(),
    );
    write_object(
        root,
        "Articles/Articles_historic/part-0.parquet",
        df!(
            "article_id" => [1i64, 2],
            "prod_name" => ["Tee", "Jeans"],
            "detail_desc" => ["Soft tee", "Slim jeans"],
        )
        .unwrap(),
    );
    write_object(
        root,
        "Transactions/Transactions_historic/part-0.parquet",
        df!(
            "t_dat" => ["2020-03-31", "2020-04-01", "2020-07-04", "2020-10-10"],
            "customer_id" => ["a", "b", "c", "unknown"],
            "article_id" => [1i64, 2, 1, 2],
            "price" => [0.01, 0.02, 0.01, 0.02],
            "sales_channel_id" => [Some(1i64), None, Some(2), Some(2)],
        )
        .unwrap(),
    );
}

fn config(temp_dir: &TempDir) -> PipelineConfig {
    PipelineConfig::default()
        .with_job_name("integration")
        .with_lake_root(temp_dir.path().join("lake"))
        .with_parquet_warehouse(temp_dir.path().join("warehouse"))
        .with_dead_letter_table("dead_letter")
}

#[tokio::test]
async fn test_end_to_end_with_injected_collaborators() {
    let temp_dir = TempDir::new().unwrap();
    create_lake(&temp_dir.path().join("lake"));
    let config = config(&temp_dir);

    let store = LocalObjectStore::new(config.sources.root.clone(), "*.parquet").unwrap();
    let warehouse = Arc::new(ParquetWarehouse::new(
        config.warehouse.root.clone(),
        config.warehouse.compression,
    ));
    let pipeline = Pipeline::new(config, Arc::new(store), warehouse.clone());

    let stats = pipeline.run(RunOptions::new("it-1")).await.unwrap();

    assert_eq!(stats.cleaned_rows_for(Entity::Transactions), Some(4));
    assert_eq!(stats.fact_rows, 3);
    assert_eq!(stats.rejected.missing_customer, 1);

    assert_eq!(warehouse.row_count("warehouse").await.unwrap(), 3);
    assert_eq!(warehouse.row_count("customers").await.unwrap(), 3);
    assert_eq!(warehouse.row_count("dead_letter").await.unwrap(), 1);

    let fact = warehouse.read_table("warehouse").await.unwrap();
    let quarters: Vec<i32> = fact
        .sort(["t_dat"], SortMultipleOptions::default())
        .unwrap()
        .column("quarter")
        .unwrap()
        .i32()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(quarters, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_left_join_from_config() {
    let temp_dir = TempDir::new().unwrap();
    create_lake(&temp_dir.path().join("lake"));
    let config = config(&temp_dir).with_join_kind(JoinKind::Left);

    let pipeline =
        Pipeline::from_config(config, &lakehouse_loader::warehouse::EnvSecretProvider).unwrap();
    let stats = pipeline.run(RunOptions::new("it-2")).await.unwrap();

    assert_eq!(stats.fact_rows, 4);
    assert_eq!(stats.rejected.total, 1);
}

#[tokio::test]
async fn test_missing_lake_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline =
        Pipeline::from_config(config(&temp_dir), &lakehouse_loader::warehouse::EnvSecretProvider)
            .unwrap();

    let result = pipeline.run(RunOptions::new("it-3")).await;
    assert!(matches!(result, Err(LoaderError::SourceNotFound { .. })));
}

#[test]
fn test_config_from_toml() {
    let config = PipelineConfig::from_toml(
        r#"
        job_name = "nightly"

        [sources]
        root = "/mnt/lake"
        pattern = "*.parquet"

        [join]
        kind = "left"
        partitions = 4

        [warehouse]
        backend = "parquet"
        root = "/mnt/warehouse"
        compression = "zstd"

        [warehouse.tables]
        fact = "analytics.sales_fact"
        dead_letter = "analytics.sales_rejects"

        [load]
        max_attempts = 5
        "#,
    )
    .unwrap();

    config.validate().unwrap();
    assert_eq!(config.join.kind, JoinKind::Left);
    assert_eq!(config.join.partitions, 4);
    assert_eq!(config.warehouse.tables.fact, "analytics.sales_fact");
    assert_eq!(config.warehouse.tables.customers, "customers");
    assert_eq!(config.load.max_attempts, 5);
    assert_eq!(config.load.retry_backoff_ms, 500);
}
