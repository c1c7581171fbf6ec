//! Fact table assembly
//!
//! Joins cleaned transactions to the customer and article dimensions. The
//! dimensions are small, so they are shared by every partition of the
//! transaction table (a broadcast join) and only the transactions are
//! split. Partitions are joined concurrently and concatenated back in
//! their original order; the partition count changes throughput only.
//!
//! Transactions whose customer or article is unknown are never lost
//! silently: they are counted, logged and returned as dead-letter rows,
//! and with [`JoinKind::Left`] they are kept in the fact table as well.

use crate::config::JoinConfig;
use crate::constants::REJECT_REASON;
use crate::constants::transaction_columns::{ARTICLE_ID, CUSTOMER_ID};
use crate::error::{LoaderError, Result};
use crate::models::{Entity, JoinKind, RejectCounts};
use futures::stream::{self, StreamExt, TryStreamExt};
use polars::prelude::*;
use tokio::task;
use tracing::{debug, warn};

const CUSTOMER_MATCH: &str = "__customer_match";
const ARTICLE_MATCH: &str = "__article_match";

pub const MISSING_CUSTOMER: &str = "missing_customer";
pub const MISSING_ARTICLE: &str = "missing_article";
pub const MISSING_CUSTOMER_AND_ARTICLE: &str = "missing_customer_and_article";

/// Result of assembling the fact table
#[derive(Debug)]
pub struct JoinOutcome {
    pub fact: DataFrame,
    /// Unmatched transactions with a `reject_reason` column
    pub rejected: DataFrame,
    pub counts: RejectCounts,
}

/// Join transactions with their customer and article attributes
pub async fn assemble_fact(
    transactions: &DataFrame,
    customers: &DataFrame,
    articles: &DataFrame,
    config: &JoinConfig,
) -> Result<JoinOutcome> {
    ensure_unique_key(customers, CUSTOMER_ID, Entity::Customers)?;
    ensure_unique_key(articles, ARTICLE_ID, Entity::Articles)?;

    let customers = customers
        .clone()
        .lazy()
        .with_column(lit(true).alias(CUSTOMER_MATCH))
        .collect()?;
    let articles = articles
        .clone()
        .lazy()
        .with_column(lit(true).alias(ARTICLE_MATCH))
        .collect()?;
    let transaction_columns = transactions.get_column_names_owned();

    let kind = config.kind;
    let partitions = partition(transactions, config.partitions);
    debug!(
        "Joining {} transactions in {} partitions ({:?} join)",
        transactions.height(),
        partitions.len(),
        kind
    );

    let parts: Vec<JoinOutcome> = stream::iter(partitions)
        .map(|part| {
            let customers = customers.clone();
            let articles = articles.clone();
            let transaction_columns = transaction_columns.clone();
            task::spawn_blocking(move || {
                join_partition(part, customers, articles, &transaction_columns, kind)
            })
        })
        .buffered(config.partitions.max(1))
        .map(|joined| joined.map_err(LoaderError::from).and_then(|r| r))
        .try_collect()
        .await?;

    let counts = parts
        .iter()
        .fold(RejectCounts::default(), |acc, p| acc.merge(p.counts));
    let (facts, rejects): (Vec<_>, Vec<_>) = parts
        .into_iter()
        .map(|p| (p.fact.lazy(), p.rejected.lazy()))
        .unzip();
    let fact = concat(facts, UnionArgs::default())?.collect()?;
    let rejected = concat(rejects, UnionArgs::default())?.collect()?;

    if counts.total > 0 {
        warn!(
            "{} transaction(s) did not match the dimensions ({} unknown customer, {} unknown article); {}",
            counts.total,
            counts.missing_customer,
            counts.missing_article,
            match kind {
                JoinKind::Inner => "dropped from the fact table",
                JoinKind::Left => "kept in the fact table with null attributes",
            }
        );
    }

    Ok(JoinOutcome {
        fact,
        rejected,
        counts,
    })
}

/// Split into at most `partitions` contiguous, non-empty slices
fn partition(frame: &DataFrame, partitions: usize) -> Vec<DataFrame> {
    let height = frame.height();
    if height == 0 {
        return vec![frame.clone()];
    }

    let size = height.div_ceil(partitions.max(1));
    (0..height)
        .step_by(size)
        .map(|offset| frame.slice(offset as i64, size))
        .collect()
}

fn join_partition(
    transactions: DataFrame,
    customers: DataFrame,
    articles: DataFrame,
    transaction_columns: &[PlSmallStr],
    kind: JoinKind,
) -> Result<JoinOutcome> {
    let joined = transactions
        .lazy()
        .join(
            customers.lazy(),
            [col(CUSTOMER_ID)],
            [col(CUSTOMER_ID)],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            articles.lazy(),
            [col(ARTICLE_ID)],
            [col(ARTICLE_ID)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    let customer_missing = col(CUSTOMER_MATCH).is_null();
    let article_missing = col(ARTICLE_MATCH).is_null();
    let unmatched = customer_missing.clone().or(article_missing.clone());

    let counts = joined
        .clone()
        .lazy()
        .select([
            customer_missing.clone().sum().alias(MISSING_CUSTOMER),
            article_missing.clone().sum().alias(MISSING_ARTICLE),
            unmatched.clone().sum().alias("total"),
        ])
        .collect()?;
    let count = |name: &str| -> Result<usize> {
        Ok(counts.column(name)?.get(0)?.try_extract::<usize>()?)
    };
    let counts = RejectCounts {
        missing_customer: count(MISSING_CUSTOMER)?,
        missing_article: count(MISSING_ARTICLE)?,
        total: count("total")?,
    };

    let reason = when(customer_missing.clone().and(article_missing.clone()))
        .then(lit(MISSING_CUSTOMER_AND_ARTICLE))
        .when(customer_missing)
        .then(lit(MISSING_CUSTOMER))
        .otherwise(lit(MISSING_ARTICLE));
    let mut reject_columns: Vec<Expr> = transaction_columns.iter().map(|c| col(c.clone())).collect();
    reject_columns.push(reason.alias(REJECT_REASON));

    let rejected = joined
        .clone()
        .lazy()
        .filter(unmatched.clone())
        .select(reject_columns)
        .collect()?;

    let fact = match kind {
        JoinKind::Inner => joined.lazy().filter(unmatched.not()),
        JoinKind::Left => joined.lazy(),
    };
    let fact = crate::cleaning::without_columns(fact, &[CUSTOMER_MATCH, ARTICLE_MATCH])?.collect()?;

    Ok(JoinOutcome {
        fact,
        rejected,
        counts,
    })
}

/// A duplicated dimension key would multiply fact rows
fn ensure_unique_key(frame: &DataFrame, key: &str, entity: Entity) -> Result<()> {
    let keys = frame
        .column(key)
        .map_err(|_| LoaderError::missing_column(entity.name(), key))?
        .as_materialized_series();
    let distinct = keys.n_unique()?;
    if distinct < frame.height() {
        return Err(LoaderError::data_validation(
            entity.name(),
            format!(
                "{} duplicate value(s) in join key '{}'",
                frame.height() - distinct,
                key
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers() -> DataFrame {
        df!(
            CUSTOMER_ID => ["c1", "c2", "c3"],
            "age" => [25, 40, 61],
            "age_group" => ["Millennials", "Gen-X", "Boomers"],
        )
        .unwrap()
    }

    fn articles() -> DataFrame {
        df!(
            ARTICLE_ID => [10i64, 20, 30],
            "prod_name" => ["Strap top", "Trousers", "Sneakers"],
        )
        .unwrap()
    }

    fn transactions(customer_ids: &[&str], article_ids: &[i64]) -> DataFrame {
        let n = customer_ids.len();
        df!(
            CUSTOMER_ID => customer_ids,
            ARTICLE_ID => article_ids,
            "price" => (0..n).map(|i| i as f64 / 100.0).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    fn options(kind: JoinKind, partitions: usize) -> JoinConfig {
        JoinConfig { kind, partitions }
    }

    #[tokio::test]
    async fn test_fact_row_count_equals_transactions() {
        let tx = transactions(
            &["c1", "c2", "c3", "c1", "c2", "c3", "c1", "c2", "c3", "c1"],
            &[10, 20, 30, 20, 30, 10, 30, 10, 20, 10],
        );
        let outcome = assemble_fact(&tx, &customers(), &articles(), &options(JoinKind::Inner, 8))
            .await
            .unwrap();

        assert_eq!(outcome.fact.height(), tx.height());
        assert_eq!(outcome.counts, RejectCounts::default());
        assert_eq!(outcome.rejected.height(), 0);

        let names: Vec<&str> = outcome.fact.get_column_names().iter().map(|n| n.as_str()).collect();
        assert!(names.contains(&"age_group"));
        assert!(names.contains(&"prod_name"));
        assert!(!names.contains(&CUSTOMER_MATCH));
        assert!(!names.contains(&ARTICLE_MATCH));
    }

    #[tokio::test]
    async fn test_partition_count_does_not_change_output() {
        let tx = transactions(
            &["c1", "c2", "c3", "c1", "c2", "c3", "c1"],
            &[10, 20, 30, 20, 30, 10, 30],
        );
        let sort = |df: DataFrame| {
            df.sort(["price"], SortMultipleOptions::default()).unwrap()
        };

        let single = assemble_fact(&tx, &customers(), &articles(), &options(JoinKind::Inner, 1))
            .await
            .unwrap();
        let many = assemble_fact(&tx, &customers(), &articles(), &options(JoinKind::Inner, 8))
            .await
            .unwrap();

        assert!(sort(single.fact).equals(&sort(many.fact)));
    }

    #[tokio::test]
    async fn test_unknown_customer_is_dropped_and_counted() {
        let tx = transactions(&["c1", "ghost", "c2"], &[10, 20, 30]);
        let outcome = assemble_fact(&tx, &customers(), &articles(), &options(JoinKind::Inner, 2))
            .await
            .unwrap();

        assert_eq!(outcome.fact.height(), 2);
        let fact_customers: Vec<&str> = outcome
            .fact
            .column(CUSTOMER_ID)
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert!(!fact_customers.contains(&"ghost"));

        assert_eq!(
            outcome.counts,
            RejectCounts {
                missing_customer: 1,
                missing_article: 0,
                total: 1,
            }
        );
        assert_eq!(outcome.rejected.height(), 1);
        let reason = outcome.rejected.column(REJECT_REASON).unwrap().get(0).unwrap();
        assert_eq!(reason, AnyValue::String(MISSING_CUSTOMER));
        assert_eq!(outcome.rejected.width(), tx.width() + 1);
    }

    #[tokio::test]
    async fn test_row_missing_both_keys_counts_once() {
        let tx = transactions(&["ghost", "c1"], &[99, 99]);
        let outcome = assemble_fact(&tx, &customers(), &articles(), &options(JoinKind::Inner, 8))
            .await
            .unwrap();

        assert_eq!(outcome.fact.height(), 0);
        assert_eq!(
            outcome.counts,
            RejectCounts {
                missing_customer: 1,
                missing_article: 2,
                total: 2,
            }
        );
        let reasons: Vec<&str> = outcome
            .rejected
            .column(REJECT_REASON)
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert!(reasons.contains(&MISSING_CUSTOMER_AND_ARTICLE));
        assert!(reasons.contains(&MISSING_ARTICLE));
    }

    #[tokio::test]
    async fn test_left_join_keeps_unmatched_rows() {
        let tx = transactions(&["c1", "ghost", "c2"], &[10, 20, 30]);
        let outcome = assemble_fact(&tx, &customers(), &articles(), &options(JoinKind::Left, 8))
            .await
            .unwrap();

        assert_eq!(outcome.fact.height(), 3);
        assert_eq!(outcome.counts.total, 1);
        assert_eq!(outcome.fact.column("age_group").unwrap().null_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_dimension_key_is_rejected() {
        let duplicated = df!(
            CUSTOMER_ID => ["c1", "c1"],
            "age" => [25, 26],
        )
        .unwrap();
        let tx = transactions(&["c1"], &[10]);

        let result =
            assemble_fact(&tx, &duplicated, &articles(), &options(JoinKind::Inner, 8)).await;
        assert!(matches!(result, Err(LoaderError::DataValidation { .. })));
    }

    #[tokio::test]
    async fn test_empty_transactions() {
        let tx = transactions(&[], &[]);
        let outcome = assemble_fact(&tx, &customers(), &articles(), &options(JoinKind::Inner, 8))
            .await
            .unwrap();
        assert_eq!(outcome.fact.height(), 0);
        assert_eq!(outcome.counts.total, 0);
    }

    #[test]
    fn test_partition_slices_cover_every_row() {
        let tx = transactions(
            &["c1", "c2", "c3", "c1", "c2", "c3", "c1", "c2", "c3", "c1"],
            &[10; 10],
        );
        let parts = partition(&tx, 8);
        assert!(parts.len() <= 8);
        assert_eq!(parts.iter().map(|p| p.height()).sum::<usize>(), 10);
        assert!(parts.iter().all(|p| p.height() > 0));
    }
}
