//! Tabular ingestion: transaction CSV reading and aggregation into entity and
//! relation tables.
//!
//! The output is a [`TabularSnapshot`](crate::types::TabularSnapshot), which is
//! the only thing graph assembly consumes.

mod aggregate;
mod csv_reader;

pub use aggregate::{aggregate_transactions, merchant_risk_level};
pub use csv_reader::{read_transactions, read_transactions_csv, LoadedTransactions};

/// Column names shared by the aggregator and the default feature specs.
pub mod columns {
    // Input CSV headers.
    pub const TRANSACTION_ID: &str = "transaction_id";
    pub const ACCOUNT_ID: &str = "account_id";
    pub const MERCHANT_ID: &str = "merchant_id";
    pub const DEVICE_ID: &str = "device_id";
    pub const TRANSACTION_AMOUNT: &str = "transaction_amount";
    pub const TRANSACTION_TIMESTAMP: &str = "transaction_timestamp";
    pub const IS_FRAUD: &str = "is_fraud";
    pub const DEVICE_TYPE: &str = "device_type";
    pub const COUNTRY: &str = "country";
    pub const MERCHANT_CATEGORY: &str = "merchant_category";

    /// Headers without which no record can be built.
    pub const REQUIRED: [&str; 6] = [
        ACCOUNT_ID,
        MERCHANT_ID,
        DEVICE_ID,
        TRANSACTION_AMOUNT,
        TRANSACTION_TIMESTAMP,
        IS_FRAUD,
    ];

    // Aggregated entity columns.
    pub const TOTAL_TRANSACTIONS: &str = "total_transactions";
    pub const TOTAL_AMOUNT: &str = "total_amount";
    pub const AVG_AMOUNT: &str = "avg_amount";
    pub const AVG_TRANSACTION_AMOUNT: &str = "avg_transaction_amount";
    pub const FRAUD_COUNT: &str = "fraud_count";
    pub const TOTAL_FRAUD_TRANSACTIONS: &str = "total_fraud_transactions";
    pub const FRAUD_TRANSACTIONS: &str = "fraud_transactions";
    pub const FRAUD_RATE: &str = "fraud_rate";
    pub const RISK_SCORE: &str = "risk_score";
    pub const RISK_LEVEL: &str = "risk_level";
    pub const ACCOUNT_AGE_DAYS: &str = "account_age_days";
    pub const DISTINCT_MERCHANTS: &str = "distinct_merchants";
    pub const DISTINCT_DEVICES: &str = "distinct_devices";
    pub const TOTAL_USERS: &str = "total_users";
    pub const IS_SHARED: &str = "is_shared";

    // Edge columns.
    pub const TRANSACTION_HOUR: &str = "transaction_hour";
    pub const TRANSACTION_DAY_OF_WEEK: &str = "transaction_day_of_week";
    pub const TRANSACTION_COUNT: &str = "transaction_count";

    /// Merchant risk levels in ordinal order.
    pub const RISK_LEVELS: [&str; 4] = ["LOW", "MEDIUM", "HIGH", "CRITICAL"];
}
