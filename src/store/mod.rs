//! Persistence seam.
//!
//! The scan reads metric history and tenant settings through [`Store`]
//! and writes snapshots, anomalies, events and alerts one account at a
//! time. Every write commits on its own.

#[cfg(test)]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Account, ActivityEvent, Alert, AlertKind, AnomalyRecord, MetricRecord, OutreachStatus,
    RenewalSettings, ScoreSnapshot, TenantConfig, UpsertOutcome,
};

#[async_trait]
pub trait Store: Send + Sync {
    // Settings

    async fn tenant_config(&self) -> anyhow::Result<Option<TenantConfig>>;

    async fn save_tenant_config(&self, config: &TenantConfig) -> anyhow::Result<()>;

    async fn renewal_settings(&self) -> anyhow::Result<Option<RenewalSettings>>;

    async fn save_renewal_settings(&self, settings: &RenewalSettings) -> anyhow::Result<()>;

    // Accounts and metrics

    async fn list_accounts(&self) -> anyhow::Result<Vec<Account>>;

    /// Inserts or updates an account keyed by name and returns the
    /// stored id.
    async fn upsert_account(&self, account: &Account) -> anyhow::Result<Uuid>;

    /// Full history for an account, oldest first.
    async fn metric_history(&self, account_id: Uuid) -> anyhow::Result<Vec<MetricRecord>>;

    /// Returns false when a record already exists for that day.
    async fn insert_metric(&self, account_id: Uuid, record: &MetricRecord) -> anyhow::Result<bool>;

    // Snapshots

    async fn upsert_snapshot(&self, snapshot: &ScoreSnapshot) -> anyhow::Result<UpsertOutcome>;

    /// Most recent snapshot for every account that has one.
    async fn latest_snapshots(&self) -> anyhow::Result<Vec<ScoreSnapshot>>;

    /// Every snapshot for one account, oldest first.
    async fn snapshots_for_account(&self, account_id: Uuid) -> anyhow::Result<Vec<ScoreSnapshot>>;

    // Anomalies

    async fn has_anomaly_since(&self, account_id: Uuid, since: DateTime<Utc>) -> anyhow::Result<bool>;

    async fn create_anomaly(&self, anomaly: &AnomalyRecord) -> anyhow::Result<()>;

    async fn anomaly(&self, id: Uuid) -> anyhow::Result<Option<AnomalyRecord>>;

    async fn anomalies_with_status(&self, status: OutreachStatus) -> anyhow::Result<Vec<AnomalyRecord>>;

    /// Newest first.
    async fn anomalies_for_account(&self, account_id: Uuid, limit: usize) -> anyhow::Result<Vec<AnomalyRecord>>;

    /// Moves an anomaly's outreach status from `from` to `to`. Returns
    /// false when the stored status is no longer `from`.
    async fn transition_outreach_status(
        &self,
        id: Uuid,
        from: OutreachStatus,
        to: OutreachStatus,
    ) -> anyhow::Result<bool>;

    // Events and alerts

    async fn record_event(&self, event: &ActivityEvent) -> anyhow::Result<()>;

    /// Newest first.
    async fn events_for_account(&self, account_id: Uuid, limit: usize) -> anyhow::Result<Vec<ActivityEvent>>;

    async fn has_unresolved_alert(&self, account_id: Uuid, kind: AlertKind) -> anyhow::Result<bool>;

    async fn create_alert(&self, alert: &Alert) -> anyhow::Result<()>;

    /// Unresolved alerts, newest first.
    async fn unresolved_alerts(&self, limit: usize) -> anyhow::Result<Vec<Alert>>;

    /// Returns false when no unresolved alert has that id.
    async fn resolve_alert(&self, id: Uuid) -> anyhow::Result<bool>;
}
