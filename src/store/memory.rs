//! In-memory [`Store`] used by tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Store;
use crate::models::{
    Account, ActivityEvent, Alert, AlertKind, AnomalyRecord, MetricRecord, OutreachStatus,
    RenewalSettings, ScoreSnapshot, TenantConfig, UpsertOutcome,
};

#[derive(Default)]
struct Tables {
    tenant: Option<TenantConfig>,
    renewal: Option<RenewalSettings>,
    accounts: Vec<Account>,
    metrics: HashMap<Uuid, BTreeMap<NaiveDate, MetricRecord>>,
    snapshots: BTreeMap<(Uuid, NaiveDate), ScoreSnapshot>,
    anomalies: Vec<AnomalyRecord>,
    events: Vec<ActivityEvent>,
    alerts: Vec<Alert>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn anomalies(&self) -> Vec<AnomalyRecord> {
        self.tables.read().await.anomalies.clone()
    }

    pub async fn events(&self) -> Vec<ActivityEvent> {
        self.tables.read().await.events.clone()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.tables.read().await.alerts.clone()
    }

    pub async fn snapshots(&self) -> Vec<ScoreSnapshot> {
        self.tables.read().await.snapshots.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn tenant_config(&self) -> anyhow::Result<Option<TenantConfig>> {
        Ok(self.tables.read().await.tenant.clone())
    }

    async fn save_tenant_config(&self, config: &TenantConfig) -> anyhow::Result<()> {
        self.tables.write().await.tenant = Some(config.clone());
        Ok(())
    }

    async fn renewal_settings(&self) -> anyhow::Result<Option<RenewalSettings>> {
        Ok(self.tables.read().await.renewal.clone())
    }

    async fn save_renewal_settings(&self, settings: &RenewalSettings) -> anyhow::Result<()> {
        self.tables.write().await.renewal = Some(settings.clone());
        Ok(())
    }

    async fn list_accounts(&self) -> anyhow::Result<Vec<Account>> {
        let mut accounts = self.tables.read().await.accounts.clone();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(accounts)
    }

    async fn upsert_account(&self, account: &Account) -> anyhow::Result<Uuid> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.accounts.iter_mut().find(|a| a.name == account.name) {
            let id = existing.id;
            *existing = Account {
                id,
                ..account.clone()
            };
            return Ok(id);
        }
        tables.accounts.push(account.clone());
        Ok(account.id)
    }

    async fn metric_history(&self, account_id: Uuid) -> anyhow::Result<Vec<MetricRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .metrics
            .get(&account_id)
            .map(|days| days.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_metric(&self, account_id: Uuid, record: &MetricRecord) -> anyhow::Result<bool> {
        let mut tables = self.tables.write().await;
        let days = tables.metrics.entry(account_id).or_default();
        if days.contains_key(&record.date) {
            return Ok(false);
        }
        days.insert(record.date, record.clone());
        Ok(true)
    }

    async fn upsert_snapshot(&self, snapshot: &ScoreSnapshot) -> anyhow::Result<UpsertOutcome> {
        let previous = self
            .tables
            .write()
            .await
            .snapshots
            .insert((snapshot.account_id, snapshot.snapshot_date), snapshot.clone());
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        })
    }

    async fn latest_snapshots(&self) -> anyhow::Result<Vec<ScoreSnapshot>> {
        let tables = self.tables.read().await;
        let mut latest: HashMap<Uuid, ScoreSnapshot> = HashMap::new();
        for snapshot in tables.snapshots.values() {
            // BTreeMap order is by (account, date), so later entries win
            latest.insert(snapshot.account_id, snapshot.clone());
        }
        Ok(latest.into_values().collect())
    }

    async fn snapshots_for_account(&self, account_id: Uuid) -> anyhow::Result<Vec<ScoreSnapshot>> {
        Ok(self
            .tables
            .read()
            .await
            .snapshots
            .values()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn has_anomaly_since(&self, account_id: Uuid, since: DateTime<Utc>) -> anyhow::Result<bool> {
        Ok(self
            .tables
            .read()
            .await
            .anomalies
            .iter()
            .any(|a| a.account_id == account_id && a.detected_at >= since))
    }

    async fn create_anomaly(&self, anomaly: &AnomalyRecord) -> anyhow::Result<()> {
        self.tables.write().await.anomalies.push(anomaly.clone());
        Ok(())
    }

    async fn anomaly(&self, id: Uuid) -> anyhow::Result<Option<AnomalyRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .anomalies
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn anomalies_with_status(&self, status: OutreachStatus) -> anyhow::Result<Vec<AnomalyRecord>> {
        let mut found: Vec<AnomalyRecord> = self
            .tables
            .read()
            .await
            .anomalies
            .iter()
            .filter(|a| a.outreach_status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(found)
    }

    async fn anomalies_for_account(&self, account_id: Uuid, limit: usize) -> anyhow::Result<Vec<AnomalyRecord>> {
        let mut found: Vec<AnomalyRecord> = self
            .tables
            .read()
            .await
            .anomalies
            .iter()
            .rev()
            .filter(|a| a.account_id == account_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        found.truncate(limit);
        Ok(found)
    }

    async fn transition_outreach_status(
        &self,
        id: Uuid,
        from: OutreachStatus,
        to: OutreachStatus,
    ) -> anyhow::Result<bool> {
        let mut tables = self.tables.write().await;
        match tables
            .anomalies
            .iter_mut()
            .find(|a| a.id == id && a.outreach_status == from)
        {
            Some(anomaly) => {
                anomaly.outreach_status = to;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_event(&self, event: &ActivityEvent) -> anyhow::Result<()> {
        self.tables.write().await.events.push(event.clone());
        Ok(())
    }

    async fn events_for_account(&self, account_id: Uuid, limit: usize) -> anyhow::Result<Vec<ActivityEvent>> {
        let mut found: Vec<ActivityEvent> = self
            .tables
            .read()
            .await
            .events
            .iter()
            .rev()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit);
        Ok(found)
    }

    async fn has_unresolved_alert(&self, account_id: Uuid, kind: AlertKind) -> anyhow::Result<bool> {
        Ok(self
            .tables
            .read()
            .await
            .alerts
            .iter()
            .any(|a| a.account_id == account_id && a.kind == kind && !a.resolved))
    }

    async fn create_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        self.tables.write().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn unresolved_alerts(&self, limit: usize) -> anyhow::Result<Vec<Alert>> {
        let mut open: Vec<Alert> = self
            .tables
            .read()
            .await
            .alerts
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        open.truncate(limit);
        Ok(open)
    }

    async fn resolve_alert(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.alerts.iter_mut().find(|a| a.id == id && !a.resolved) {
            Some(alert) => {
                alert.resolved = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
