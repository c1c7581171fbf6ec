//! Warehouse backends.
//!
//! A [`Warehouse`] persists a materialised dataset into a named table with
//! an explicit [`WriteMode`](crate::models::WriteMode). Every write is keyed
//! by the run id so that retrying a write, or re-running a whole job with
//! the same id, replaces rather than duplicates what that run wrote.

pub mod parquet_store;
pub mod redshift;
pub mod secrets;

pub use parquet_store::ParquetWarehouse;
pub use secrets::{EnvSecretProvider, SecretProvider};

use crate::config::{WarehouseBackend, WarehouseConfig};
use crate::constants::STAGING_DIR_NAME;
use crate::error::{LoaderError, Result};
use crate::models::LoadTarget;
use async_trait::async_trait;
use polars::prelude::DataFrame;
use regex::Regex;
use std::sync::{Arc, LazyLock};

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Write `frame` into `target.table`, returning the rows written
    async fn write(&self, frame: &DataFrame, target: &LoadTarget, run_id: &str) -> Result<usize>;

    /// Current row count of `table`
    async fn row_count(&self, table: &str) -> Result<usize>;
}

/// Build the configured backend
pub fn from_config(
    config: &WarehouseConfig,
    secrets: &dyn SecretProvider,
) -> Result<Arc<dyn Warehouse>> {
    match config.backend {
        WarehouseBackend::Parquet => Ok(Arc::new(ParquetWarehouse::new(
            config.root.clone(),
            config.compression,
        ))),
        #[cfg(feature = "redshift")]
        WarehouseBackend::Redshift => {
            let password = secrets.secret(&config.redshift.password_env)?;
            Ok(Arc::new(redshift::RedshiftWarehouse::connect(
                config.redshift.clone(),
                password,
                config.compression,
            )?))
        }
        #[cfg(not(feature = "redshift"))]
        WarehouseBackend::Redshift => {
            let _ = secrets;
            Err(LoaderError::configuration(
                "the redshift backend requires building with the `redshift` feature",
            ))
        }
    }
}

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("identifier pattern is valid")
});

/// Accept plain or schema-qualified table names only
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.len() > 127 {
        return Err(LoaderError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: "longer than 127 characters".to_string(),
        });
    }
    if !IDENTIFIER.is_match(identifier) {
        return Err(LoaderError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: "expected [schema.]name made of letters, digits and underscores".to_string(),
        });
    }
    if identifier.eq_ignore_ascii_case(STAGING_DIR_NAME) {
        return Err(LoaderError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: format!("{} is reserved for in-flight writes", STAGING_DIR_NAME),
        });
    }
    Ok(())
}

/// Run ids become file names, so they are restricted to a safe alphabet
pub fn validate_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(LoaderError::InvalidIdentifier {
            identifier: run_id.to_string(),
            reason: "run ids may only contain letters, digits, '-' and '_'".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    #[test]
    fn test_identifier_validation() {
        for valid in [
            "warehouse",
            "public.customers",
            "_tmp_1",
            "Fact2024",
            "_staging_history",
            "public._staging",
        ] {
            assert!(validate_identifier(valid).is_ok(), "{}", valid);
        }
        for invalid in [
            "",
            "1table",
            "a.b.c",
            "drop table x",
            "customers;--",
            "quoted\"name",
            "_staging",
            "_STAGING",
        ] {
            assert!(validate_identifier(invalid).is_err(), "{}", invalid);
        }
        assert!(validate_identifier(&"a".repeat(128)).is_err());
    }

    #[test]
    fn test_run_id_validation() {
        assert!(validate_run_id("20240101T000000Z").is_ok());
        assert!(validate_run_id("backfill_2-a").is_ok());
        assert!(validate_run_id("").is_err());
        assert!(validate_run_id("../escape").is_err());
    }

    #[test]
    fn test_parquet_backend_from_config() {
        let config = PipelineConfig::default();
        let warehouse = from_config(&config.warehouse, &EnvSecretProvider).unwrap();
        assert_eq!(warehouse.name(), "parquet");
    }
}
