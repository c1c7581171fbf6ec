//! Transaction cleaning
//!
//! Casts the transaction date, derives calendar attributes from it and
//! fills missing sales channels with the most frequent channel of the run.

use super::{Cleaned, column_type};
use crate::constants::TRANSACTION_DATE_FORMAT;
use crate::constants::transaction_columns::*;
use crate::error::{LoaderError, Result};
use crate::models::{Entity, Imputation};
use polars::prelude::*;
use tracing::debug;

const COUNT: &str = "count";

/// Clean a raw transaction snapshot.
///
/// Fails when any non-null date cannot be parsed rather than dropping the
/// affected rows.
pub fn clean_transactions(mut frame: LazyFrame) -> Result<Cleaned> {
    let schema = frame.collect_schema()?;
    let date_type = column_type(&schema, Entity::Transactions, T_DAT)?;
    let channel_type = column_type(&schema, Entity::Transactions, SALES_CHANNEL_ID)?;

    let date = date_expr(&date_type)?;
    if date_type == DataType::String {
        ensure_dates_parse(frame.clone(), date.clone())?;
    }

    let mut imputations = Vec::new();
    let channel = match channel_mode(frame.clone())? {
        ChannelMode::Found { value, missing } => {
            debug!("Sales channel mode {} fills {} nulls", value, missing);
            if missing > 0 {
                imputations.push(Imputation {
                    entity: Entity::Transactions,
                    column: SALES_CHANNEL_ID.to_string(),
                    value: value.to_string(),
                    filled: missing,
                });
            }
            col(SALES_CHANNEL_ID).fill_null(lit(Scalar::new(channel_type, value)))
        }
        ChannelMode::Empty { missing: 0 } => col(SALES_CHANNEL_ID),
        ChannelMode::Empty { missing } => {
            return Err(LoaderError::data_validation(
                Entity::Transactions.name(),
                format!(
                    "all {} sales channels are missing, no mode to impute from",
                    missing
                ),
            ));
        }
    };

    let frame = frame
        .with_columns([date.alias(T_DAT), channel.alias(SALES_CHANNEL_ID)])
        .with_columns([
            col(T_DAT).dt().strftime("%B").alias(MONTH),
            col(T_DAT).dt().strftime("%A").alias(DAY),
            col(T_DAT).dt().quarter().cast(DataType::Int32).alias(QUARTER),
            col(T_DAT).dt().year().alias(YEAR),
        ]);

    Ok(Cleaned { frame, imputations })
}

fn date_expr(source_type: &DataType) -> Result<Expr> {
    match source_type {
        DataType::Date => Ok(col(T_DAT)),
        DataType::Datetime(_, _) => Ok(col(T_DAT).cast(DataType::Date)),
        DataType::String => Ok(col(T_DAT).str().to_date(StrptimeOptions {
            format: Some(TRANSACTION_DATE_FORMAT.into()),
            strict: false,
            exact: true,
            cache: true,
        })),
        other => Err(LoaderError::DateParse {
            column: T_DAT.to_string(),
            unparsed: 0,
            reason: format!("unsupported source type {}", other),
        }),
    }
}

/// Compare raw and parsed non-null counts so unparseable dates fail the run
fn ensure_dates_parse(frame: LazyFrame, parsed: Expr) -> Result<()> {
    let counts = frame
        .select([
            col(T_DAT).is_not_null().sum().alias("raw"),
            parsed.is_not_null().sum().alias("parsed"),
        ])
        .collect()?;

    let raw = counts.column("raw")?.get(0)?.try_extract::<u64>()?;
    let parsed = counts.column("parsed")?.get(0)?.try_extract::<u64>()?;
    if parsed < raw {
        return Err(LoaderError::DateParse {
            column: T_DAT.to_string(),
            unparsed: raw - parsed,
            reason: format!("expected format {}", TRANSACTION_DATE_FORMAT),
        });
    }
    Ok(())
}

/// Most frequent non-null sales channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMode {
    Found {
        value: AnyValue<'static>,
        missing: usize,
    },
    /// No channel was observed
    Empty { missing: usize },
}

/// Find the sales channel mode.
///
/// Equally frequent channels are resolved to the smallest value, so the
/// result never depends on partitioning or hash order.
pub fn channel_mode(frame: LazyFrame) -> Result<ChannelMode> {
    let channels = frame.select([col(SALES_CHANNEL_ID)]);

    let missing = channels
        .clone()
        .select([col(SALES_CHANNEL_ID).null_count()])
        .collect()?
        .column(SALES_CHANNEL_ID)?
        .get(0)?
        .try_extract::<usize>()?;

    let ranked = channels
        .filter(col(SALES_CHANNEL_ID).is_not_null())
        .group_by([col(SALES_CHANNEL_ID)])
        .agg([len().alias(COUNT)])
        .sort_by_exprs(
            [col(COUNT), col(SALES_CHANNEL_ID)],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .limit(1)
        .collect()?;

    if ranked.height() == 0 {
        return Ok(ChannelMode::Empty { missing });
    }

    let value = ranked.column(SALES_CHANNEL_ID)?.get(0)?.into_static();
    Ok(ChannelMode::Found { value, missing })
}
