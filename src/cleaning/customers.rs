//! Customer cleaning
//!
//! Imputes missing ages with the dataset median, normalises the active flag,
//! membership status and news frequency, and derives the generational
//! age group.

use super::{Cleaned, column_type, without_columns};
use crate::constants::customer_columns::*;
use crate::constants::{
    ACTIVE_STATUS_DEFAULT, AGE_GROUP_BINS, AGE_GROUP_FALLBACK, CLUB_MEMBER_STATUS_DEFAULT,
    NEWS_FREQUENCY_NEVER, NEWS_FREQUENCY_NONE_VARIANTS,
};
use crate::error::{LoaderError, Result};
use crate::models::{Entity, Imputation};
use polars::prelude::*;
use tracing::debug;

/// Clean a raw customer snapshot.
///
/// Safe to apply to its own output: the dropped attribute may already be
/// absent and the active flag may already carry its final name.
pub fn clean_customers(mut frame: LazyFrame) -> Result<Cleaned> {
    let schema = frame.collect_schema()?;
    column_type(&schema, Entity::Customers, AGE)?;

    let active_source = if schema.contains(ACTIVE) {
        ACTIVE
    } else if schema.contains(ACTIVE_STATUS) {
        ACTIVE_STATUS
    } else {
        return Err(LoaderError::missing_column(Entity::Customers.name(), ACTIVE));
    };
    let active_type = column_type(&schema, Entity::Customers, active_source)?;

    let (median_age, missing_ages) = median_age(frame.clone())?;
    debug!(
        "Customer median age {:?}, {} missing ages",
        median_age, missing_ages
    );

    let mut imputations = Vec::new();
    let age = match median_age {
        Some(median) => {
            if missing_ages > 0 {
                imputations.push(Imputation {
                    entity: Entity::Customers,
                    column: AGE.to_string(),
                    value: median.to_string(),
                    filled: missing_ages,
                });
            }
            observed_age().fill_null(lit(median))
        }
        None if missing_ages == 0 => observed_age(),
        None => {
            return Err(LoaderError::data_validation(
                Entity::Customers.name(),
                format!(
                    "all {} ages are missing, no median to impute from",
                    missing_ages
                ),
            ));
        }
    };

    let cleaned = frame
        .with_columns([age.alias(AGE)])
        .with_columns([
            age_group_expr(col(AGE)).alias(AGE_GROUP),
            col(AGE).cast(DataType::Int32).alias(AGE),
            active_status_expr(active_source, &active_type).alias(ACTIVE_STATUS),
            col(CLUB_MEMBER_STATUS)
                .fill_null(lit(CLUB_MEMBER_STATUS_DEFAULT))
                .alias(CLUB_MEMBER_STATUS),
            news_frequency_expr().alias(FASHION_NEWS_FREQUENCY),
        ]);

    let frame = without_columns(cleaned, &[FN, ACTIVE])?;

    Ok(Cleaned { frame, imputations })
}

/// Ages as floats with NaN folded into null, so both count as missing
fn observed_age() -> Expr {
    col(AGE).cast(DataType::Float64).fill_nan(lit(NULL))
}

/// Lower median of the observed ages and the number of missing ages.
///
/// The lower median is always an observed age, so an even-sized sample
/// picks the smaller of its two middle values.
pub fn median_age(frame: LazyFrame) -> Result<(Option<f64>, usize)> {
    let ages = frame.select([observed_age().alias(AGE)]).collect()?;
    let ages = ages.column(AGE)?.as_materialized_series();
    let missing = ages.null_count();

    let mut observed: Vec<f64> = ages.f64()?.into_iter().flatten().collect();
    if observed.is_empty() {
        return Ok((None, missing));
    }

    observed.sort_by(|a, b| a.total_cmp(b));
    let median = observed[(observed.len() - 1) / 2];
    Ok((Some(median), missing))
}

/// Map an age expression onto its generational label, first match wins
pub fn age_group_expr(age: Expr) -> Expr {
    AGE_GROUP_BINS
        .iter()
        .rev()
        .fold(lit(AGE_GROUP_FALLBACK), |otherwise, &(lower, upper, label)| {
            when(
                age.clone()
                    .gt_eq(lit(lower))
                    .and(age.clone().lt(lit(upper))),
            )
            .then(lit(label))
            .otherwise(otherwise)
        })
}

/// Label for a single age, matching [`age_group_expr`]
pub fn age_group(age: f64) -> &'static str {
    AGE_GROUP_BINS
        .iter()
        .find(|(lower, upper, _)| age >= *lower && age < *upper)
        .map(|(_, _, label)| *label)
        .unwrap_or(AGE_GROUP_FALLBACK)
}

fn active_status_expr(source: &str, source_type: &DataType) -> Expr {
    let value = col(source);
    let normalised = match source_type {
        DataType::String => {
            let lowered = value.clone().str().to_lowercase();
            when(
                lowered
                    .clone()
                    .eq(lit("true"))
                    .or(lowered.clone().eq(lit("1")))
                    .or(lowered.clone().eq(lit("1.0"))),
            )
            .then(lit("1"))
            .when(
                lowered
                    .clone()
                    .eq(lit("false"))
                    .or(lowered.clone().eq(lit("0")))
                    .or(lowered.eq(lit("0.0"))),
            )
            .then(lit("0"))
            .otherwise(value)
        }
        dt if dt == &DataType::Boolean || dt.is_float() || dt.is_integer() => value
            .cast(DataType::Int64)
            .cast(DataType::String),
        _ => value.cast(DataType::String),
    };

    normalised.fill_null(lit(ACTIVE_STATUS_DEFAULT))
}

fn news_frequency_expr() -> Expr {
    let value = col(FASHION_NEWS_FREQUENCY);
    let is_none_variant = NEWS_FREQUENCY_NONE_VARIANTS
        .iter()
        .map(|variant| value.clone().eq(lit(*variant)))
        .reduce(|acc, matched| acc.or(matched))
        .unwrap_or_else(|| lit(false));

    when(is_none_variant)
        .then(lit(NEWS_FREQUENCY_NEVER))
        .otherwise(value)
        .fill_null(lit(NEWS_FREQUENCY_NEVER))
}
