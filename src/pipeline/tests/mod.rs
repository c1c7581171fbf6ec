//! Pipeline tests
//!
//! Runs the whole job against a small lake written to a temporary directory
//! and a Parquet warehouse next to it.


use crate::config::PipelineConfig;
use crate::pipeline::{Pipeline, RunOptions};
use crate::warehouse::{EnvSecretProvider, ParquetWarehouse};
use polars::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A lake and warehouse under one temporary directory
pub struct TestLake {
    pub dir: TempDir,
}

impl TestLake {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Lake populated with consistent customers, articles and transactions
    pub fn populated() -> Self {
        let lake = Self::new();
        lake.put("Customers/Customers_historic/customers.parquet", &mut customers());
        lake.put("Articles/Articles_historic/articles.parquet", &mut articles());
        lake.put(
            "Transactions/Transactions_historic/transactions.parquet",
            &mut transactions(),
        );
        lake
    }

    pub fn lake_root(&self) -> PathBuf {
        self.dir.path().join("lake")
    }

    pub fn warehouse_root(&self) -> PathBuf {
        self.dir.path().join("warehouse")
    }

    /// Write `frame` as an object under the lake root
    pub fn put(&self, key: &str, frame: &mut DataFrame) {
        let path = self.lake_root().join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        ParquetWriter::new(fs::File::create(&path).unwrap())
            .finish(frame)
            .unwrap();
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_job_name("test-job")
            .with_lake_root(self.lake_root())
            .with_parquet_warehouse(self.warehouse_root())
    }

    pub fn pipeline(&self, config: PipelineConfig) -> Pipeline {
        Pipeline::from_config(config, &EnvSecretProvider).unwrap()
    }

    pub fn warehouse(&self) -> ParquetWarehouse {
        ParquetWarehouse::new(self.warehouse_root(), Default::default())
    }

    pub async fn table(&self, table: &str) -> DataFrame {
        self.warehouse().read_table(table).await.unwrap()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.warehouse_root().join(table).is_dir()
    }
}

pub fn run_options(run_id: &str) -> RunOptions {
    RunOptions::new(run_id)
}

pub fn customers() -> DataFrame {
    df!(
        "customer_id" => ["c1", "c2", "c3", "c4"],
        "FN" => [Some(1.0), None, None, Some(1.0)],
        "Active" => [Some(1.0), None, Some(1.0), None],
        "club_member_status" => [Some("ACTIVE"), None, Some("PRE-CREATE"), Some("ACTIVE")],
        "fashion_news_frequency" => [Some("Regularly"), Some("NONE"), None, Some("Monthly")],
        "age" => [Some(19.0), Some(30.0), None, Some(66.0)],
        "postal_code" => ["p1", "p2", "p3", "p4"],
    )
    .unwrap()
}

pub fn articles() -> DataFrame {
    df!(
        "article_id" => [108775015i64, 110065001, 111565001],
        "prod_name" => ["Strap top", "OP T-shirt", "20 den 1p Stockings"],
        "product_type_name" => ["Vest top", "Bra", "Underwear Tights"],
        "detail_desc" => [Some("Jersey top"), None, Some("Semi shiny tights")],
    )
    .unwrap()
}

pub fn transactions() -> DataFrame {
    df!(
        "t_dat" => ["2018-09-20", "2018-09-20", "2019-01-15", "2019-05-02", "2020-11-30", "2020-12-31"],
        "customer_id" => ["c1", "c1", "c2", "c3", "c4", "c2"],
        "article_id" => [108775015i64, 110065001, 111565001, 108775015, 110065001, 111565001],
        "price" => [0.0508, 0.0305, 0.0152, 0.0508, 0.0305, 0.0152],
        "sales_channel_id" => [Some(2i64), Some(2), None, Some(1), Some(2), None],
    )
    .unwrap()
}
