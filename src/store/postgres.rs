use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::Store;
use crate::models::{
    Account, ActivityEvent, Alert, AlertKind, AnomalyRecord, MetricRecord, OutreachStatus,
    RenewalSettings, ScoreSnapshot, TenantConfig, UpsertOutcome, Weights,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn anomaly_from_row(row: &PgRow) -> anyhow::Result<AnomalyRecord> {
    Ok(AnomalyRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        detected_at: row.get("detected_at"),
        pattern: row.get::<String, _>("pattern").parse()?,
        severity: row.get::<String, _>("severity").parse()?,
        z_score: row.get("z_score"),
        peer_delta: row.get("peer_delta"),
        explanation: row.get("explanation"),
        outreach_draft: row.get("outreach_draft"),
        outreach_status: row.get::<String, _>("outreach_status").parse()?,
    })
}

fn alert_from_row(row: &PgRow) -> anyhow::Result<Alert> {
    Ok(Alert {
        id: row.get("id"),
        account_id: row.get("account_id"),
        kind: row.get::<String, _>("alert_type").parse()?,
        message: row.get("message"),
        severity: row.get::<String, _>("severity").parse()?,
        resolved: row.get("resolved"),
        created_at: row.get("created_at"),
    })
}

fn snapshot_from_row(row: &PgRow) -> ScoreSnapshot {
    ScoreSnapshot {
        account_id: row.get("account_id"),
        snapshot_date: row.get("snapshot_date"),
        composite: row.get("composite"),
        engagement: row.get("engagement"),
        adoption: row.get("adoption"),
        health: row.get("health"),
        support: row.get("support"),
        trend_delta: row.get("trend_delta"),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn tenant_config(&self) -> anyhow::Result<Option<TenantConfig>> {
        let row = sqlx::query(
            r#"
            SELECT name, autonomy_mode, weight_engagement, weight_adoption,
                   weight_health, weight_support, critical_threshold, at_risk_threshold
            FROM account_health.tenant_settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(TenantConfig {
            name: row.get("name"),
            autonomy_mode: row.get::<String, _>("autonomy_mode").parse()?,
            weights: Weights {
                engagement: row.get("weight_engagement"),
                adoption: row.get("weight_adoption"),
                health: row.get("weight_health"),
                support: row.get("weight_support"),
            },
            critical_threshold: row.get("critical_threshold"),
            at_risk_threshold: row.get("at_risk_threshold"),
        }))
    }

    async fn save_tenant_config(&self, config: &TenantConfig) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_health.tenant_settings
            (id, name, autonomy_mode, weight_engagement, weight_adoption,
             weight_health, weight_support, critical_threshold, at_risk_threshold)
            VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                autonomy_mode = EXCLUDED.autonomy_mode,
                weight_engagement = EXCLUDED.weight_engagement,
                weight_adoption = EXCLUDED.weight_adoption,
                weight_health = EXCLUDED.weight_health,
                weight_support = EXCLUDED.weight_support,
                critical_threshold = EXCLUDED.critical_threshold,
                at_risk_threshold = EXCLUDED.at_risk_threshold,
                updated_at = NOW()
            "#,
        )
        .bind(&config.name)
        .bind(config.autonomy_mode.as_str())
        .bind(config.weights.engagement)
        .bind(config.weights.adoption)
        .bind(config.weights.health)
        .bind(config.weights.support)
        .bind(config.critical_threshold)
        .bind(config.at_risk_threshold)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn renewal_settings(&self) -> anyhow::Result<Option<RenewalSettings>> {
        let row = sqlx::query(
            r#"
            SELECT enabled, notify_90_days, notify_30_days, notify_14_days, notify_7_days
            FROM account_health.renewal_settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let lead_times = [
                (90, "notify_90_days"),
                (30, "notify_30_days"),
                (14, "notify_14_days"),
                (7, "notify_7_days"),
            ]
            .into_iter()
            .filter(|(_, column)| row.get::<bool, _>(*column))
            .map(|(days, _)| days)
            .collect();
            RenewalSettings {
                enabled: row.get("enabled"),
                lead_times,
            }
        }))
    }

    async fn save_renewal_settings(&self, settings: &RenewalSettings) -> anyhow::Result<()> {
        let has = |days: i64| settings.lead_times.contains(&days);
        sqlx::query(
            r#"
            INSERT INTO account_health.renewal_settings
            (id, enabled, notify_90_days, notify_30_days, notify_14_days, notify_7_days)
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET enabled = EXCLUDED.enabled,
                notify_90_days = EXCLUDED.notify_90_days,
                notify_30_days = EXCLUDED.notify_30_days,
                notify_14_days = EXCLUDED.notify_14_days,
                notify_7_days = EXCLUDED.notify_7_days,
                updated_at = NOW()
            "#,
        )
        .bind(settings.enabled)
        .bind(has(90))
        .bind(has(30))
        .bind(has(14))
        .bind(has(7))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_accounts(&self) -> anyhow::Result<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, name, tier, seats, mrr, renewal_date, csm_name \
             FROM account_health.accounts ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Account {
                id: row.get("id"),
                name: row.get("name"),
                tier: row.get("tier"),
                seats: row.get("seats"),
                mrr: row.get("mrr"),
                renewal_date: row.get("renewal_date"),
                csm_name: row.get("csm_name"),
            })
            .collect())
    }

    async fn upsert_account(&self, account: &Account) -> anyhow::Result<Uuid> {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO account_health.accounts
            (id, name, tier, seats, mrr, renewal_date, csm_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (name) DO UPDATE
            SET tier = EXCLUDED.tier,
                seats = EXCLUDED.seats,
                mrr = EXCLUDED.mrr,
                renewal_date = EXCLUDED.renewal_date,
                csm_name = EXCLUDED.csm_name
            RETURNING id
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.tier)
        .bind(account.seats)
        .bind(account.mrr)
        .bind(account.renewal_date)
        .bind(&account.csm_name)
        .fetch_one(&self.pool)
        .await?
        .get("id");
        Ok(id)
    }

    async fn metric_history(&self, account_id: Uuid) -> anyhow::Result<Vec<MetricRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT metric_date, dau, wau, mau, active_seats, feature_count,
                   api_calls, support_tickets, logins, nps
            FROM account_health.usage_metrics
            WHERE account_id = $1
            ORDER BY metric_date
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| MetricRecord {
                date: row.get("metric_date"),
                dau: row.get("dau"),
                wau: row.get("wau"),
                mau: row.get("mau"),
                active_seats: row.get("active_seats"),
                feature_count: row.get("feature_count"),
                api_calls: row.get("api_calls"),
                support_tickets: row.get("support_tickets"),
                logins: row.get("logins"),
                nps: row.get("nps"),
            })
            .collect())
    }

    async fn insert_metric(&self, account_id: Uuid, record: &MetricRecord) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO account_health.usage_metrics
            (account_id, metric_date, dau, wau, mau, active_seats, feature_count,
             api_calls, support_tickets, logins, nps)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (account_id, metric_date) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(record.date)
        .bind(record.dau)
        .bind(record.wau)
        .bind(record.mau)
        .bind(record.active_seats)
        .bind(record.feature_count)
        .bind(record.api_calls)
        .bind(record.support_tickets)
        .bind(record.logins)
        .bind(record.nps)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_snapshot(&self, snapshot: &ScoreSnapshot) -> anyhow::Result<UpsertOutcome> {
        // xmax is zero only for a freshly inserted row
        let inserted: bool = sqlx::query(
            r#"
            INSERT INTO account_health.score_snapshots
            (account_id, snapshot_date, composite, engagement, adoption, health, support, trend_delta)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (account_id, snapshot_date) DO UPDATE
            SET composite = EXCLUDED.composite,
                engagement = EXCLUDED.engagement,
                adoption = EXCLUDED.adoption,
                health = EXCLUDED.health,
                support = EXCLUDED.support,
                trend_delta = EXCLUDED.trend_delta,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(snapshot.account_id)
        .bind(snapshot.snapshot_date)
        .bind(snapshot.composite)
        .bind(snapshot.engagement)
        .bind(snapshot.adoption)
        .bind(snapshot.health)
        .bind(snapshot.support)
        .bind(snapshot.trend_delta)
        .fetch_one(&self.pool)
        .await?
        .get("inserted");

        Ok(if inserted {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn latest_snapshots(&self) -> anyhow::Result<Vec<ScoreSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (account_id)
                   account_id, snapshot_date, composite, engagement, adoption,
                   health, support, trend_delta
            FROM account_health.score_snapshots
            ORDER BY account_id, snapshot_date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(snapshot_from_row).collect())
    }

    async fn snapshots_for_account(&self, account_id: Uuid) -> anyhow::Result<Vec<ScoreSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, snapshot_date, composite, engagement, adoption,
                   health, support, trend_delta
            FROM account_health.score_snapshots
            WHERE account_id = $1
            ORDER BY snapshot_date
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(snapshot_from_row).collect())
    }

    async fn has_anomaly_since(&self, account_id: Uuid, since: DateTime<Utc>) -> anyhow::Result<bool> {
        let exists: bool = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM account_health.anomalies
                WHERE account_id = $1 AND detected_at >= $2
            ) AS found
            "#,
        )
        .bind(account_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?
        .get("found");
        Ok(exists)
    }

    async fn create_anomaly(&self, anomaly: &AnomalyRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_health.anomalies
            (id, account_id, detected_at, pattern, severity, z_score, peer_delta,
             explanation, outreach_draft, outreach_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(anomaly.id)
        .bind(anomaly.account_id)
        .bind(anomaly.detected_at)
        .bind(anomaly.pattern.as_str())
        .bind(anomaly.severity.as_str())
        .bind(anomaly.z_score)
        .bind(anomaly.peer_delta)
        .bind(&anomaly.explanation)
        .bind(&anomaly.outreach_draft)
        .bind(anomaly.outreach_status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn anomaly(&self, id: Uuid) -> anyhow::Result<Option<AnomalyRecord>> {
        let row = sqlx::query("SELECT * FROM account_health.anomalies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(anomaly_from_row).transpose()
    }

    async fn anomalies_with_status(&self, status: OutreachStatus) -> anyhow::Result<Vec<AnomalyRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM account_health.anomalies \
             WHERE outreach_status = $1 ORDER BY detected_at DESC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(anomaly_from_row).collect()
    }

    async fn anomalies_for_account(&self, account_id: Uuid, limit: usize) -> anyhow::Result<Vec<AnomalyRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM account_health.anomalies \
             WHERE account_id = $1 ORDER BY detected_at DESC LIMIT $2",
        )
        .bind(account_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(anomaly_from_row).collect()
    }

    async fn transition_outreach_status(
        &self,
        id: Uuid,
        from: OutreachStatus,
        to: OutreachStatus,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE account_health.anomalies
            SET outreach_status = $3
            WHERE id = $1 AND outreach_status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_event(&self, event: &ActivityEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_health.activity_events
            (id, account_id, event_type, description, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.id)
        .bind(event.account_id)
        .bind(&event.event_type)
        .bind(&event.description)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events_for_account(&self, account_id: Uuid, limit: usize) -> anyhow::Result<Vec<ActivityEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, event_type, description, created_at
            FROM account_health.activity_events
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| ActivityEvent {
                id: row.get("id"),
                account_id: row.get("account_id"),
                event_type: row.get("event_type"),
                description: row.get("description"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn has_unresolved_alert(&self, account_id: Uuid, kind: AlertKind) -> anyhow::Result<bool> {
        let exists: bool = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM account_health.alerts
                WHERE account_id = $1 AND alert_type = $2 AND NOT resolved
            ) AS found
            "#,
        )
        .bind(account_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?
        .get("found");
        Ok(exists)
    }

    async fn create_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_health.alerts
            (id, account_id, alert_type, message, severity, resolved, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(alert.id)
        .bind(alert.account_id)
        .bind(alert.kind.as_str())
        .bind(&alert.message)
        .bind(alert.severity.as_str())
        .bind(alert.resolved)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unresolved_alerts(&self, limit: usize) -> anyhow::Result<Vec<Alert>> {
        let rows = sqlx::query(
            "SELECT * FROM account_health.alerts \
             WHERE NOT resolved ORDER BY created_at DESC LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn resolve_alert(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE account_health.alerts SET resolved = TRUE WHERE id = $1 AND NOT resolved",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
