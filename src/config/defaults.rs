//! Default constants for dimjoin configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Schema Defaults
// =============================================================================

/// Decimal places kept for `decimal` attributes (interest rates are stored as DECIMAL(5,2))
pub const DEFAULT_DECIMAL_SCALE: u32 = 2;

// =============================================================================
// Join Defaults
// =============================================================================

/// Number of group-key shards resolved in parallel (1 = sequential pass)
pub const DEFAULT_PARTITIONS: usize = 1;

/// Look-back length of the rolling transaction count, in days
/// The window covers the preceding days only; same-day transactions are excluded.
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

// =============================================================================
// Path Defaults
// =============================================================================

pub const DEFAULT_AGREEMENTS_PATH: &str = "data/dim_dep_agreement.csv";
pub const DEFAULT_USERS_PATH: &str = "data/user_data.csv";
pub const DEFAULT_TRANSACTIONS_PATH: &str = "data/transaction_data.csv";
pub const DEFAULT_OUTPUT_PATH: &str = "data/enriched_transactions.csv";
pub const DEFAULT_DEDUP_OUTPUT_PATH: &str = "data/dim_dep_agreement_dedup.csv";
pub const DEFAULT_SUMMARY_OUTPUT_PATH: &str = "data/category_summary.csv";

// =============================================================================
// Generator Defaults
// =============================================================================

pub const DEFAULT_SEED: u64 = 42;

/// Users in the generated user table
pub const DEFAULT_USER_COUNT: usize = 1_000;

/// Generated transactions
pub const DEFAULT_TRANSACTION_COUNT: usize = 10_000;

/// Users that receive at least one transaction
pub const DEFAULT_TRANSACTING_USERS: usize = 1_000;

/// Upper bound on versions per generated agreement chain
pub const DEFAULT_MAX_VERSIONS: usize = 6;

/// Fraction of users flagged active
pub const DEFAULT_ACTIVE_RATIO: f64 = 0.9;

/// Fraction of transactions flagged blocked
pub const DEFAULT_BLOCKED_RATIO: f64 = 0.01;

/// Probability that a transaction uses the user's preferred category
pub const DEFAULT_PREFERRED_CATEGORY_RATIO: f64 = 0.95;

/// Probability that a new agreement version repeats the previous terms
pub const DEFAULT_REPEAT_TERMS_RATIO: f64 = 0.4;

/// Transaction categories are drawn from `0..=DEFAULT_MAX_CATEGORY`
pub const DEFAULT_MAX_CATEGORY: u32 = 10;

/// Transactions are dated up to this many days before the reference date
pub const DEFAULT_LOOKBACK_DAYS: u32 = 100;

/// Maximum generated amount in cents
pub const DEFAULT_MAX_AMOUNT_CENTS: i64 = 5_000;
