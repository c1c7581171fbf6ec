//! Application constants for the lakehouse loader
//!
//! Column names of the source datasets, cleaning vocabularies and
//! default table/prefix names used throughout the pipeline.

// =============================================================================
// Source Column Names
// =============================================================================

/// Columns of the customer dataset
pub mod customer_columns {
    pub const CUSTOMER_ID: &str = "customer_id";
    pub const AGE: &str = "age";
    /// Low-value attribute dropped during cleaning
    pub const FN: &str = "FN";
    pub const ACTIVE: &str = "Active";
    pub const ACTIVE_STATUS: &str = "active_status";
    pub const CLUB_MEMBER_STATUS: &str = "club_member_status";
    pub const FASHION_NEWS_FREQUENCY: &str = "fashion_news_frequency";
    pub const AGE_GROUP: &str = "age_group";
}

/// Columns of the article (catalog item) dataset
pub mod article_columns {
    pub const ARTICLE_ID: &str = "article_id";
    /// Free-text description dropped during cleaning
    pub const DETAIL_DESC: &str = "detail_desc";
}

/// Columns of the transaction dataset
pub mod transaction_columns {
    pub const CUSTOMER_ID: &str = "customer_id";
    pub const ARTICLE_ID: &str = "article_id";
    pub const T_DAT: &str = "t_dat";
    pub const SALES_CHANNEL_ID: &str = "sales_channel_id";
    pub const MONTH: &str = "month";
    pub const DAY: &str = "day";
    pub const QUARTER: &str = "quarter";
    pub const YEAR: &str = "year";
}

/// Column added to dead-letter rows
pub const REJECT_REASON: &str = "reject_reason";

// =============================================================================
// Cleaning Vocabularies
// =============================================================================

/// Active status used when the source value is missing
pub const ACTIVE_STATUS_DEFAULT: &str = "0";

/// Membership status used when the source value is missing (the majority category)
pub const CLUB_MEMBER_STATUS_DEFAULT: &str = "ACTIVE";

/// Canonical "no subscription" news frequency
pub const NEWS_FREQUENCY_NEVER: &str = "Never";

/// Spellings of "no subscription" found in the news frequency column
pub const NEWS_FREQUENCY_NONE_VARIANTS: &[&str] = &["None", "NONE", "none"];

/// Age group bins: half-open `[lower, upper)` ranges matched in order
pub const AGE_GROUP_BINS: &[(f64, f64, &str)] = &[
    (0.0, 22.0, "Gen-Z"),
    (22.0, 38.0, "Millennials"),
    (38.0, 54.0, "Gen-X"),
    (54.0, 73.0, "Boomers"),
];

/// Label for every age not matched by [`AGE_GROUP_BINS`]
pub const AGE_GROUP_FALLBACK: &str = "Silent";

/// Format of string transaction dates
pub const TRANSACTION_DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Defaults
// =============================================================================

/// Default source prefixes under the lake root
pub const DEFAULT_CUSTOMERS_PREFIX: &str = "Customers/Customers_historic/";
pub const DEFAULT_ARTICLES_PREFIX: &str = "Articles/Articles_historic/";
pub const DEFAULT_TRANSACTIONS_PREFIX: &str = "Transactions/Transactions_historic/";

/// Default object name pattern for source snapshots
pub const DEFAULT_SOURCE_PATTERN: &str = "*.parquet";

/// Default warehouse table names
pub const DEFAULT_FACT_TABLE: &str = "warehouse";
pub const DEFAULT_CUSTOMERS_TABLE: &str = "customers";
pub const DEFAULT_ARTICLES_TABLE: &str = "articles";
pub const DEFAULT_TRANSACTIONS_TABLE: &str = "transactions";

/// Number of transaction partitions joined in parallel
pub const DEFAULT_JOIN_PARTITIONS: usize = 8;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "LAKEHOUSE";

/// Separator between nested keys in override variables (`LAKEHOUSE_JOIN__KIND`)
pub const ENV_SEPARATOR: &str = "__";

/// Default configuration file name in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "lakehouse.toml";

/// Directory created inside a Parquet warehouse for in-flight writes
pub const STAGING_DIR_NAME: &str = "_staging";

/// Column stamped on rows appended to Redshift, naming the run that loaded them
pub const LOAD_RUN_ID_COLUMN: &str = "load_run_id";

/// File name of the single Parquet part staged for a Redshift load
pub const STAGED_PART_NAME: &str = "part-00000.parquet";
