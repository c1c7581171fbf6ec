//! Per-entity cleaning rules.
//!
//! Each cleaner is a pure function from a raw [`LazyFrame`] to a cleaned
//! plan. Statistics that need the whole dataset (median age, channel mode)
//! are materialised once inside the cleaner and baked into the plan as
//! literals, so the returned frame can be collected any number of times
//! with the same result.

pub mod articles;
pub mod customers;
pub mod transactions;

use crate::error::{LoaderError, Result};
use crate::models::{Entity, Imputation};
use polars::prelude::*;

/// Signature shared by every entity cleaner
pub type CleanFn = fn(LazyFrame) -> Result<Cleaned>;

/// A cleaned dataset plan and the imputations applied to it
pub struct Cleaned {
    pub frame: LazyFrame,
    pub imputations: Vec<Imputation>,
}

impl Cleaned {
    pub fn new(frame: LazyFrame) -> Self {
        Self {
            frame,
            imputations: Vec::new(),
        }
    }
}

/// Project away `columns`, ignoring names the frame does not have
pub(crate) fn without_columns(mut frame: LazyFrame, columns: &[&str]) -> Result<LazyFrame> {
    let schema = frame.collect_schema()?;
    if !columns.iter().any(|c| schema.contains(c)) {
        return Ok(frame);
    }

    let kept: Vec<Expr> = schema
        .iter_names()
        .filter(|name| !columns.contains(&name.as_str()))
        .map(|name| col(name.clone()))
        .collect();
    Ok(frame.select(kept))
}

/// Look up a column's type, failing with a descriptive error when absent
pub(crate) fn column_type(schema: &Schema, entity: Entity, column: &str) -> Result<DataType> {
    schema
        .get(column)
        .cloned()
        .ok_or_else(|| LoaderError::missing_column(entity.name(), column))
}
