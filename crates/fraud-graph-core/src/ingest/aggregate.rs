//! Aggregation of transaction records into entity and relation tables.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::info;

use super::columns;
use crate::error::{CoreError, CoreResult};
use crate::types::{EdgeRow, EntityRow, NodeType, RelationType, TabularSnapshot, TransactionRecord};

/// Merchant risk level from its fraud rate.
///
/// `LOW <= 0.05 < MEDIUM <= 0.15 < HIGH <= 0.30 < CRITICAL`
pub fn merchant_risk_level(fraud_rate: f64) -> &'static str {
    if fraud_rate <= 0.05 {
        "LOW"
    } else if fraud_rate <= 0.15 {
        "MEDIUM"
    } else if fraud_rate <= 0.30 {
        "HIGH"
    } else {
        "CRITICAL"
    }
}

#[derive(Default)]
struct AccountAcc<'a> {
    count: usize,
    amount: f64,
    frauds: usize,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    merchants: BTreeSet<&'a str>,
    devices: BTreeSet<&'a str>,
    country: Option<&'a str>,
}

#[derive(Default)]
struct MerchantAcc<'a> {
    count: usize,
    amount: f64,
    frauds: usize,
    category: Option<&'a str>,
    country: Option<&'a str>,
}

#[derive(Default)]
struct DeviceAcc<'a> {
    count: usize,
    frauds: usize,
    device_type: Option<&'a str>,
    /// account -> (transactions, frauds)
    users: BTreeMap<&'a str, (usize, usize)>,
}

fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Build entity tables and forward relation tables from raw transactions.
///
/// Entities are emitted sorted by id. Edge rows keep transaction order, except
/// shared-device rows which are sorted by `(device, account)`.
pub fn aggregate_transactions(records: &[TransactionRecord]) -> CoreResult<TabularSnapshot> {
    if records.is_empty() {
        return Err(CoreError::EmptyDataset {
            source_name: "transactions".into(),
        });
    }

    let mut accounts: BTreeMap<&str, AccountAcc> = BTreeMap::new();
    let mut merchants: BTreeMap<&str, MerchantAcc> = BTreeMap::new();
    let mut devices: BTreeMap<&str, DeviceAcc> = BTreeMap::new();

    let mut transacts = Vec::with_capacity(records.len());
    let mut uses = Vec::new();

    for tx in records {
        let fraud = usize::from(tx.is_fraud);

        let account = accounts.entry(tx.account_id.as_str()).or_default();
        account.count += 1;
        account.amount += tx.transaction_amount;
        account.frauds += fraud;
        account.first_seen = Some(match account.first_seen {
            Some(seen) => seen.min(tx.transaction_timestamp),
            None => tx.transaction_timestamp,
        });
        account.last_seen = Some(match account.last_seen {
            Some(seen) => seen.max(tx.transaction_timestamp),
            None => tx.transaction_timestamp,
        });
        account.merchants.insert(tx.merchant_id.as_str());
        if account.country.is_none() {
            account.country = tx.country.as_deref();
        }

        let merchant = merchants.entry(tx.merchant_id.as_str()).or_default();
        merchant.count += 1;
        merchant.amount += tx.transaction_amount;
        merchant.frauds += fraud;
        if merchant.category.is_none() {
            merchant.category = tx.merchant_category.as_deref();
        }
        if merchant.country.is_none() {
            merchant.country = tx.country.as_deref();
        }

        transacts.push(
            EdgeRow::new(&tx.account_id, &tx.merchant_id)
                .with_numeric(columns::TRANSACTION_AMOUNT, tx.transaction_amount)
                .with_numeric(
                    columns::TRANSACTION_HOUR,
                    f64::from(tx.transaction_timestamp.hour()),
                )
                .with_numeric(
                    columns::TRANSACTION_DAY_OF_WEEK,
                    f64::from(tx.transaction_timestamp.weekday().num_days_from_monday()),
                )
                .with_label(tx.is_fraud),
        );

        if let Some(device_id) = tx.device_id.as_deref() {
            account.devices.insert(device_id);

            let device = devices.entry(device_id).or_default();
            device.count += 1;
            device.frauds += fraud;
            if device.device_type.is_none() {
                device.device_type = tx.device_type.as_deref();
            }
            let usage = device.users.entry(tx.account_id.as_str()).or_default();
            usage.0 += 1;
            usage.1 += fraud;

            uses.push(
                EdgeRow::new(&tx.account_id, device_id)
                    .with_numeric(columns::TRANSACTION_AMOUNT, tx.transaction_amount),
            );
        }
    }

    let account_rows: Vec<EntityRow> = accounts
        .iter()
        .map(|(id, acc)| {
            let fraud_rate = rate(acc.frauds, acc.count);
            let age_days = match (acc.first_seen, acc.last_seen) {
                (Some(first), Some(last)) => (last - first).num_seconds() as f64 / 86_400.0,
                _ => 0.0,
            };
            let mut row = EntityRow::new(*id)
                .with_numeric(columns::TOTAL_TRANSACTIONS, acc.count as f64)
                .with_numeric(columns::TOTAL_AMOUNT, acc.amount)
                .with_numeric(columns::AVG_AMOUNT, acc.amount / acc.count as f64)
                .with_numeric(columns::FRAUD_COUNT, acc.frauds as f64)
                .with_numeric(columns::FRAUD_RATE, fraud_rate)
                .with_numeric(columns::RISK_SCORE, fraud_rate.clamp(0.0, 1.0))
                .with_numeric(columns::ACCOUNT_AGE_DAYS, age_days)
                .with_numeric(columns::DISTINCT_MERCHANTS, acc.merchants.len() as f64)
                .with_numeric(columns::DISTINCT_DEVICES, acc.devices.len() as f64)
                .with_label(acc.frauds > 0);
            if let Some(country) = acc.country {
                row = row.with_categorical(columns::COUNTRY, country);
            }
            row
        })
        .collect();

    let merchant_rows: Vec<EntityRow> = merchants
        .iter()
        .map(|(id, acc)| {
            let fraud_rate = rate(acc.frauds, acc.count);
            let mut row = EntityRow::new(*id)
                .with_numeric(columns::TOTAL_TRANSACTIONS, acc.count as f64)
                .with_numeric(columns::TOTAL_AMOUNT, acc.amount)
                .with_numeric(columns::AVG_TRANSACTION_AMOUNT, acc.amount / acc.count as f64)
                .with_numeric(columns::TOTAL_FRAUD_TRANSACTIONS, acc.frauds as f64)
                .with_numeric(columns::FRAUD_RATE, fraud_rate)
                .with_categorical(columns::RISK_LEVEL, merchant_risk_level(fraud_rate));
            if let Some(category) = acc.category {
                row = row.with_categorical(columns::MERCHANT_CATEGORY, category);
            }
            if let Some(country) = acc.country {
                row = row.with_categorical(columns::COUNTRY, country);
            }
            row
        })
        .collect();

    let mut shares = Vec::new();
    let device_rows: Vec<EntityRow> = devices
        .iter()
        .map(|(id, acc)| {
            let fraud_rate = rate(acc.frauds, acc.count);
            let is_shared = acc.users.len() > 1;
            if is_shared {
                for (account_id, (tx_count, fraud_count)) in &acc.users {
                    shares.push(
                        EdgeRow::new(*account_id, *id)
                            .with_numeric(columns::TRANSACTION_COUNT, *tx_count as f64)
                            .with_numeric(columns::FRAUD_COUNT, *fraud_count as f64),
                    );
                }
            }
            let mut row = EntityRow::new(*id)
                .with_numeric(columns::TOTAL_TRANSACTIONS, acc.count as f64)
                .with_numeric(columns::FRAUD_TRANSACTIONS, acc.frauds as f64)
                .with_numeric(columns::FRAUD_RATE, fraud_rate)
                .with_numeric(columns::TOTAL_USERS, acc.users.len() as f64)
                .with_numeric(columns::IS_SHARED, if is_shared { 1.0 } else { 0.0 })
                .with_numeric(columns::RISK_SCORE, fraud_rate.clamp(0.0, 1.0));
            if let Some(device_type) = acc.device_type {
                row = row.with_categorical(columns::DEVICE_TYPE, device_type);
            }
            row
        })
        .collect();

    info!(
        transactions = records.len(),
        accounts = account_rows.len(),
        merchants = merchant_rows.len(),
        devices = device_rows.len(),
        shared_device_pairs = shares.len(),
        "Aggregated transactions into entity tables"
    );

    let mut snapshot = TabularSnapshot::default();
    snapshot.nodes.insert(NodeType::Account, account_rows);
    snapshot.nodes.insert(NodeType::Merchant, merchant_rows);
    snapshot.nodes.insert(NodeType::Device, device_rows);
    snapshot.edges.insert(RelationType::TransactsWith, transacts);
    snapshot.edges.insert(RelationType::Uses, uses);
    snapshot.edges.insert(RelationType::Shares, shares);
    Ok(snapshot)
}
