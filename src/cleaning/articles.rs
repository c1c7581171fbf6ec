//! Article (catalog item) cleaning

use super::{Cleaned, without_columns};
use crate::constants::article_columns::DETAIL_DESC;
use crate::error::Result;
use polars::prelude::*;

/// Drop the free-text description; every other attribute passes through
pub fn clean_articles(frame: LazyFrame) -> Result<Cleaned> {
    Ok(Cleaned::new(without_columns(frame, &[DETAIL_DESC])?))
}
