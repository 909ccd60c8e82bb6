//! Synthetic transaction data for tests.
//!
//! Generation is seeded with ChaCha8, so the same [`SyntheticConfig`] always
//! yields the same records. Fraudulent accounts spend more, transact at night
//! and concentrate on a small pool of devices, which gives models a learnable
//! signal without making the task trivial.

use chrono::{Duration, TimeZone, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use fraud_graph_core::TransactionRecord;

const DEVICE_TYPES: [&str; 3] = ["mobile", "desktop", "tablet"];
const COUNTRIES: [&str; 4] = ["US", "GB", "DE", "BR"];
const CATEGORIES: [&str; 4] = ["grocery", "electronics", "travel", "gaming"];

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub num_accounts: usize,
    pub num_merchants: usize,
    pub num_devices: usize,
    /// Fraction of accounts that are fraudulent (rounded, at least one when > 0).
    pub fraud_account_rate: f64,
    pub min_transactions: usize,
    pub max_transactions: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_accounts: 100,
            num_merchants: 12,
            num_devices: 40,
            fraud_account_rate: 0.05,
            min_transactions: 2,
            max_transactions: 6,
            seed: 42,
        }
    }
}

/// Number of fraudulent accounts the generator will produce.
pub fn fraud_account_count(config: &SyntheticConfig) -> usize {
    let n = (config.num_accounts as f64 * config.fraud_account_rate).round() as usize;
    if config.fraud_account_rate > 0.0 {
        n.clamp(1, config.num_accounts)
    } else {
        0
    }
}

/// Generate transactions. Account `ACC{i:04}` is fraudulent iff it was drawn
/// into the fraud set; every fraudulent account has at least one fraudulent
/// transaction and honest accounts have none.
pub fn generate_transactions(config: &SyntheticConfig) -> Vec<TransactionRecord> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let mut account_ids: Vec<usize> = (0..config.num_accounts).collect();
    account_ids.shuffle(&mut rng);
    let fraud_accounts: Vec<usize> = account_ids[..fraud_account_count(config)].to_vec();

    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();
    let fraud_devices = config.num_devices.clamp(1, 3);
    let mut records = Vec::new();
    let mut tx_counter = 0usize;

    for account in 0..config.num_accounts {
        let is_fraud_account = fraud_accounts.contains(&account);
        let n_tx = rng.gen_range(config.min_transactions..=config.max_transactions);
        let home_device = rng.gen_range(0..config.num_devices.max(1));
        let country = COUNTRIES[account % COUNTRIES.len()];

        for k in 0..n_tx {
            let merchant = rng.gen_range(0..config.num_merchants.max(1));
            let (amount, hour, device, fraud) = if is_fraud_account {
                let amount = rng.gen_range(400.0..2000.0);
                let hour = rng.gen_range(0..5);
                let device = rng.gen_range(0..fraud_devices);
                // first transaction is always fraudulent, the rest half the time
                let fraud = k == 0 || rng.gen_bool(0.5);
                (amount, hour, device, fraud)
            } else {
                let amount = rng.gen_range(5.0..150.0);
                let hour = rng.gen_range(8..22);
                (amount, hour, home_device, false)
            };
            let day = rng.gen_range(0..60);
            let minute = rng.gen_range(0..60);
            let timestamp = base
                + Duration::days(day)
                + Duration::hours(hour)
                + Duration::minutes(minute);

            let with_device = rng.gen_bool(0.9);
            let mut record = TransactionRecord::new(
                format!("ACC{:04}", account),
                format!("MER{:03}", merchant),
                with_device.then(|| format!("DEV{:03}", device)),
                (amount * 100.0f64).round() / 100.0,
                timestamp,
                fraud,
            )
            .with_transaction_id(format!("TX{:06}", tx_counter))
            .with_country(country)
            .with_merchant_category(CATEGORIES[merchant % CATEGORIES.len()]);
            if with_device {
                record = record.with_device_type(DEVICE_TYPES[device % DEVICE_TYPES.len()]);
            }
            records.push(record);
            tx_counter += 1;
        }
    }

    records
}

/// Render records in the CSV layout the reader expects.
pub fn to_csv(records: &[TransactionRecord]) -> String {
    let mut out = String::from(
        "transaction_id,account_id,merchant_id,device_id,transaction_amount,transaction_timestamp,is_fraud,device_type,country,merchant_category\n",
    );
    for r in records {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            r.transaction_id.as_deref().unwrap_or(""),
            r.account_id,
            r.merchant_id,
            r.device_id.as_deref().unwrap_or(""),
            r.transaction_amount,
            r.transaction_timestamp.format("%Y-%m-%d %H:%M:%S"),
            u8::from(r.is_fraud),
            r.device_type.as_deref().unwrap_or(""),
            r.country.as_deref().unwrap_or(""),
            r.merchant_category.as_deref().unwrap_or(""),
        ));
    }
    out
}
