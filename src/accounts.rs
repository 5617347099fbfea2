//! Per-account drill-down and the monthly renewal calendar.

use std::collections::HashMap;

use anyhow::Context;
use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ModelError;
use crate::models::{Account, ActivityEvent, AnomalyRecord, MetricRecord, ScoreSnapshot, TenantConfig};
use crate::report::account_states;
use crate::scoring::{self, health_state, round1, HealthScore, HealthState};
use crate::store::Store;

pub const DETAIL_ANOMALY_LIMIT: usize = 10;
pub const DETAIL_EVENT_LIMIT: usize = 50;

/// One day of raw metrics next to that day's scores.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyPoint {
    pub metrics: MetricRecord,
    pub score: HealthScore,
}

#[derive(Debug, Clone)]
pub struct AccountDetail {
    pub account: Account,
    pub latest: Option<ScoreSnapshot>,
    pub state: HealthState,
    pub daily: Vec<DailyPoint>,
    pub anomalies: Vec<AnomalyRecord>,
    pub events: Vec<ActivityEvent>,
}

/// Resolves an account by id, falling back to an exact name match.
pub async fn find_account(store: &dyn Store, key: &str) -> anyhow::Result<Account> {
    let accounts = store.list_accounts().await?;
    let by_id = key.parse::<Uuid>().ok();
    accounts
        .into_iter()
        .find(|a| Some(a.id) == by_id || a.name == key)
        .ok_or_else(|| ModelError::AccountNotFound(key.to_string()).into())
}

pub async fn account_detail(
    store: &dyn Store,
    tenant: &TenantConfig,
    key: &str,
) -> anyhow::Result<AccountDetail> {
    let account = find_account(store, key).await?;
    let history = store.metric_history(account.id).await?;
    let snapshots = store.snapshots_for_account(account.id).await?;

    // Days without a stored snapshot are scored on their own.
    let by_date: HashMap<NaiveDate, &ScoreSnapshot> =
        snapshots.iter().map(|s| (s.snapshot_date, s)).collect();
    let daily = history
        .iter()
        .map(|m| {
            let score = match by_date.get(&m.date) {
                Some(s) => HealthScore {
                    composite: s.composite,
                    engagement: s.engagement,
                    adoption: s.adoption,
                    health: s.health,
                    support: s.support,
                    trend_delta: s.trend_delta,
                },
                None => scoring::score(std::slice::from_ref(m), account.seats, &tenant.weights),
            };
            DailyPoint {
                metrics: m.clone(),
                score,
            }
        })
        .collect();

    let latest = snapshots.last().cloned();
    let composite = latest.as_ref().map(|s| s.composite).unwrap_or(0.0);
    let state = health_state(composite, tenant.critical_threshold, tenant.at_risk_threshold);

    let anomalies = store
        .anomalies_for_account(account.id, DETAIL_ANOMALY_LIMIT)
        .await?;
    let events = store
        .events_for_account(account.id, DETAIL_EVENT_LIMIT)
        .await?;

    Ok(AccountDetail {
        account,
        latest,
        state,
        daily,
        anomalies,
        events,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenewalEntry {
    pub account_id: Uuid,
    pub account_name: String,
    pub renewal_date: NaiveDate,
    pub days_until_renewal: i64,
    pub composite: f64,
    pub health_state: HealthState,
}

/// Parses `YYYY-MM` into the first day of that month.
pub fn parse_month(value: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d")
        .with_context(|| format!("invalid month {value:?}, expected YYYY-MM"))
}

/// Accounts renewing within the month containing `month`, soonest first.
pub fn renewal_calendar(
    tenant: &TenantConfig,
    accounts: &[Account],
    snapshots: &[ScoreSnapshot],
    month: NaiveDate,
    today: NaiveDate,
) -> Vec<RenewalEntry> {
    let start = month.with_day(1).unwrap_or(month);
    let end = start.checked_add_months(Months::new(1));
    let scores: HashMap<Uuid, (f64, HealthState)> = account_states(tenant, accounts, snapshots)
        .into_iter()
        .map(|(id, composite, state)| (id, (composite, state)))
        .collect();

    let mut entries: Vec<RenewalEntry> = accounts
        .iter()
        .filter_map(|account| {
            let renewal_date = account.renewal_date?;
            if renewal_date < start || end.is_some_and(|end| renewal_date >= end) {
                return None;
            }
            let (composite, state) = scores
                .get(&account.id)
                .copied()
                .unwrap_or((0.0, HealthState::Critical));
            Some(RenewalEntry {
                account_id: account.id,
                account_name: account.name.clone(),
                renewal_date,
                days_until_renewal: (renewal_date - today).num_days(),
                composite: round1(composite),
                health_state: state,
            })
        })
        .collect();
    entries.sort_by(|a, b| {
        a.renewal_date
            .cmp(&b.renewal_date)
            .then_with(|| a.account_name.cmp(&b.account_name))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutreachStatus, Pattern, Severity};
    use crate::store::memory::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn account(name: &str, renewal_date: Option<NaiveDate>) -> Account {
        Account {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tier: "growth".to_string(),
            seats: 10,
            mrr: 500.0,
            renewal_date,
            csm_name: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn snapshot(account_id: Uuid, snapshot_date: NaiveDate, composite: f64) -> ScoreSnapshot {
        ScoreSnapshot {
            account_id,
            snapshot_date,
            composite,
            engagement: 1.0,
            adoption: 2.0,
            health: 3.0,
            support: 4.0,
            trend_delta: -1.5,
        }
    }

    #[test]
    fn month_parsing() {
        assert_eq!(parse_month("2026-07").unwrap(), date(2026, 7, 1));
        assert!(parse_month("July").is_err());
        assert!(parse_month("2026-13").is_err());
    }

    #[test]
    fn calendar_keeps_only_the_month() {
        let tenant = TenantConfig::default();
        let late = account("Zenith", Some(date(2026, 7, 28)));
        let early = account("Acme", Some(date(2026, 7, 3)));
        let accounts = vec![
            late.clone(),
            early.clone(),
            account("Globex", Some(date(2026, 8, 1))),
            account("Initech", Some(date(2026, 6, 30))),
            account("Hooli", None),
        ];
        let snapshots = vec![snapshot(early.id, date(2026, 6, 30), 88.04)];

        let entries = renewal_calendar(&tenant, &accounts, &snapshots, date(2026, 7, 1), date(2026, 6, 30));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].account_name, "Acme");
        assert_eq!(entries[0].days_until_renewal, 3);
        assert_eq!(entries[0].composite, 88.0);
        assert_eq!(entries[0].health_state, HealthState::Healthy);
        // never scanned
        assert_eq!(entries[1].account_id, late.id);
        assert_eq!(entries[1].composite, 0.0);
        assert_eq!(entries[1].health_state, HealthState::Critical);
    }

    #[test]
    fn december_rolls_into_next_year() {
        let accounts = vec![account("Acme", Some(date(2026, 12, 31)))];
        let entries = renewal_calendar(
            &TenantConfig::default(),
            &accounts,
            &[],
            date(2026, 12, 1),
            date(2026, 12, 1),
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].days_until_renewal, 30);
    }

    #[tokio::test]
    async fn detail_merges_snapshots_anomalies_and_events() {
        let store = MemoryStore::new();
        let acme = account("Acme", None);
        store.upsert_account(&acme).await.unwrap();
        for day in 1..=3 {
            store
                .insert_metric(
                    acme.id,
                    &MetricRecord {
                        date: date(2026, 5, day),
                        dau: 5.0,
                        wau: 8.0,
                        mau: 10.0,
                        active_seats: 10,
                        feature_count: 10,
                        api_calls: 1_000,
                        support_tickets: 0,
                        logins: 10,
                        nps: None,
                    },
                )
                .await
                .unwrap();
        }
        store
            .upsert_snapshot(&snapshot(acme.id, date(2026, 5, 3), 35.0))
            .await
            .unwrap();

        let t0 = Utc.with_ymd_and_hms(2026, 5, 3, 6, 0, 0).unwrap();
        for i in 0..12 {
            store
                .create_anomaly(&AnomalyRecord {
                    id: Uuid::new_v4(),
                    account_id: acme.id,
                    detected_at: t0 - Duration::days(i),
                    pattern: Pattern::SlowErosion,
                    severity: Severity::Medium,
                    z_score: None,
                    peer_delta: None,
                    explanation: String::new(),
                    outreach_draft: String::new(),
                    outreach_status: OutreachStatus::Pending,
                })
                .await
                .unwrap();
        }
        for (i, kind) in ["anomaly_detected", "outreach_approved"].iter().enumerate() {
            store
                .record_event(&crate::scan::event(
                    acme.id,
                    kind,
                    String::new(),
                    t0 + Duration::minutes(i as i64),
                ))
                .await
                .unwrap();
        }

        let detail = account_detail(&store, &TenantConfig::default(), "Acme").await.unwrap();
        assert_eq!(detail.account.id, acme.id);
        assert_eq!(detail.state, HealthState::Critical);
        assert_eq!(detail.latest.as_ref().map(|s| s.composite), Some(35.0));

        assert_eq!(detail.daily.len(), 3);
        assert_eq!(detail.daily[2].score.composite, 35.0);
        assert_eq!(detail.daily[2].score.trend_delta, -1.5);
        // scored from that day alone
        let expected = scoring::score(
            std::slice::from_ref(&detail.daily[0].metrics),
            10,
            &TenantConfig::default().weights,
        );
        assert_eq!(detail.daily[0].score, expected);

        assert_eq!(detail.anomalies.len(), DETAIL_ANOMALY_LIMIT);
        assert_eq!(detail.anomalies[0].detected_at, t0);
        assert_eq!(detail.events.len(), 2);
        assert_eq!(detail.events[0].event_type, "outreach_approved");
    }

    #[tokio::test]
    async fn detail_lookup_by_id_and_unknown_key() {
        let store = MemoryStore::new();
        let acme = account("Acme", None);
        store.upsert_account(&acme).await.unwrap();

        let detail = account_detail(&store, &TenantConfig::default(), &acme.id.to_string())
            .await
            .unwrap();
        assert_eq!(detail.account.name, "Acme");
        assert!(detail.latest.is_none());
        assert!(detail.daily.is_empty());

        let err = account_detail(&store, &TenantConfig::default(), "Nope")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::AccountNotFound(key)) if key == "Nope"
        ));
    }
}
