//! Core data structures and types for lakehouse loading.
//!
//! Defines the entities, load targets, join options and run statistics
//! used throughout the library.

use crate::cleaning::{self, CleanFn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Raw datasets ingested from the lake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Customers,
    /// Catalog items
    Articles,
    Transactions,
}

impl Entity {
    pub const ALL: [Entity; 3] = [Entity::Customers, Entity::Articles, Entity::Transactions];

    pub fn name(&self) -> &'static str {
        match self {
            Entity::Customers => "customers",
            Entity::Articles => "articles",
            Entity::Transactions => "transactions",
        }
    }

    /// The dedicated cleaning function for this entity
    pub fn cleaner(&self) -> CleanFn {
        match self {
            Entity::Customers => cleaning::customers::clean_customers,
            Entity::Articles => cleaning::articles::clean_articles,
            Entity::Transactions => cleaning::transactions::clean_transactions,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a dataset is persisted into its warehouse table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Add rows, keeping everything already in the table
    Append,
    /// Replace the table contents with the new snapshot
    Overwrite,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => f.write_str("append"),
            WriteMode::Overwrite => f.write_str("overwrite"),
        }
    }
}

/// A table to write and the mode to write it with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    pub table: String,
    pub mode: WriteMode,
}

impl LoadTarget {
    pub fn append(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            mode: WriteMode::Append,
        }
    }

    pub fn overwrite(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            mode: WriteMode::Overwrite,
        }
    }
}

/// Join semantics for transactions whose customer or article is unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// Drop unmatched transactions from the fact table
    #[default]
    Inner,
    /// Keep unmatched transactions with null dimension attributes
    Left,
}

impl std::str::FromStr for JoinKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinKind::Inner),
            "left" => Ok(JoinKind::Left),
            other => Err(format!("unknown join kind '{}' (expected inner or left)", other)),
        }
    }
}

/// A null-filling decision taken while cleaning
#[derive(Debug, Clone, PartialEq)]
pub struct Imputation {
    pub entity: Entity,
    pub column: String,
    /// Rendered fill value
    pub value: String,
    /// Number of nulls replaced
    pub filled: usize,
}

/// Transactions that did not resolve against the dimension tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectCounts {
    pub missing_customer: usize,
    pub missing_article: usize,
    /// Distinct transactions affected (a row missing both counts once)
    pub total: usize,
}

impl RejectCounts {
    pub fn merge(self, other: RejectCounts) -> Self {
        Self {
            missing_customer: self.missing_customer + other.missing_customer,
            missing_article: self.missing_article + other.missing_article,
            total: self.total + other.total,
        }
    }
}

/// Outcome of one warehouse write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReceipt {
    pub table: String,
    pub mode: WriteMode,
    pub rows: usize,
    pub attempts: u32,
}

/// Processing statistics for one pipeline run
#[derive(Debug, Default)]
pub struct RunStats {
    pub run_id: String,
    pub job_name: String,
    pub sources: Vec<(Entity, PathBuf)>,
    pub cleaned_rows: Vec<(Entity, usize)>,
    pub imputations: Vec<Imputation>,
    pub fact_rows: usize,
    pub rejected: RejectCounts,
    pub loads: Vec<LoadReceipt>,
    pub dry_run: bool,
    pub processing_time_ms: u128,
}

impl RunStats {
    pub fn cleaned_rows_for(&self, entity: Entity) -> Option<usize> {
        self.cleaned_rows
            .iter()
            .find(|(e, _)| *e == entity)
            .map(|(_, rows)| *rows)
    }
}
