use std::collections::HashMap;
use std::io::Read;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{Account, MetricRecord};
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct CsvRow {
    account: String,
    seats: i64,
    tier: Option<String>,
    mrr: Option<f64>,
    renewal_date: Option<NaiveDate>,
    csm_name: Option<String>,
    date: NaiveDate,
    dau: f64,
    wau: f64,
    mau: f64,
    active_seats: i64,
    feature_count: i64,
    api_calls: i64,
    support_tickets: i64,
    logins: i64,
    nps: Option<f64>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub accounts: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Loads daily usage rows. Accounts are upserted by name from the first
/// row that mentions them; a metric row for a day already on file is
/// left untouched.
pub async fn import_metrics(store: &dyn Store, source: impl Read) -> anyhow::Result<ImportStats> {
    let mut reader = csv::Reader::from_reader(source);
    let mut account_ids: HashMap<String, Uuid> = HashMap::new();
    let mut stats = ImportStats::default();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid csv row {}", line + 1))?;

        let account_id = match account_ids.get(&row.account) {
            Some(id) => *id,
            None => {
                let id = store
                    .upsert_account(&Account {
                        id: Uuid::new_v4(),
                        name: row.account.clone(),
                        tier: row
                            .tier
                            .clone()
                            .filter(|tier| !tier.is_empty())
                            .unwrap_or_else(|| "starter".to_string()),
                        seats: row.seats,
                        mrr: row.mrr.unwrap_or(0.0),
                        renewal_date: row.renewal_date,
                        csm_name: row.csm_name.clone(),
                    })
                    .await?;
                account_ids.insert(row.account.clone(), id);
                stats.accounts += 1;
                id
            }
        };

        let record = MetricRecord {
            date: row.date,
            dau: row.dau,
            wau: row.wau,
            mau: row.mau,
            active_seats: row.active_seats,
            feature_count: row.feature_count,
            api_calls: row.api_calls,
            support_tickets: row.support_tickets,
            logins: row.logins,
            nps: row.nps,
        };
        if store.insert_metric(account_id, &record).await? {
            stats.inserted += 1;
        } else {
            stats.duplicates += 1;
        }
    }

    Ok(stats)
}
