//! Full scan: score every account, raise renewal reminders, then look
//! for anomalies and turn them into outreach.
//!
//! Each account's writes are committed before the next account is
//! touched, and a failure on one account is logged and counted without
//! stopping the rest of the run. Callers must not run two scans at once.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::anomaly::{self, Detection, DetectorInput};
use crate::decision::{Decision, DecisionRequest, DecisionService};
use crate::models::{
    Account, ActivityEvent, Alert, AlertKind, AnomalyRecord, AutonomyMode, MetricRecord,
    OutreachStatus, RenewalSettings, ScanSummary, ScoreSnapshot, Severity, TenantConfig,
    UpsertOutcome,
};
use crate::narrative::{fallback_explanation, AnomalyFacts, MetricsSummary, NarrativeService, OutreachDraft};
use crate::scoring::{self, HealthScore};
use crate::store::Store;

/// An account gets at most one anomaly per this many hours.
pub const DEDUPE_WINDOW_HOURS: i64 = 12;
const DEFAULT_CSM_NAME: &str = "Your CSM";

pub struct Scanner {
    store: Arc<dyn Store>,
    narrator: Arc<dyn NarrativeService>,
    decider: Arc<dyn DecisionService>,
}

struct ScoredAccount {
    account: Account,
    history: Vec<MetricRecord>,
    score: HealthScore,
}

enum AnomalyOutcome {
    Clean,
    SkippedRecent,
    /// `incomplete` is set when a write after the anomaly itself failed.
    Created {
        auto_sent: bool,
        alerted: bool,
        incomplete: bool,
    },
}

impl Scanner {
    pub fn new(
        store: Arc<dyn Store>,
        narrator: Arc<dyn NarrativeService>,
        decider: Arc<dyn DecisionService>,
    ) -> Self {
        Self {
            store,
            narrator,
            decider,
        }
    }

    pub async fn run_full_scan(&self) -> anyhow::Result<ScanSummary> {
        self.run_full_scan_at(Utc::now()).await
    }

    pub async fn run_full_scan_at(&self, now: DateTime<Utc>) -> anyhow::Result<ScanSummary> {
        let mut summary = ScanSummary::default();

        let Some(tenant) = self.store.tenant_config().await? else {
            warn!("no tenant configuration found, skipping scan");
            summary.scan_completed_at = Some(now);
            return Ok(summary);
        };

        info!(mode = %tenant.autonomy_mode, "starting full scan");
        let today = now.date_naive();
        let accounts = self.store.list_accounts().await?;

        let mut scored = Vec::with_capacity(accounts.len());
        for account in &accounts {
            summary.accounts_scanned += 1;
            match self.refresh_snapshot(account.clone(), &tenant, today).await {
                Ok((entry, UpsertOutcome::Created)) => {
                    summary.snapshots_created += 1;
                    scored.push(entry);
                }
                Ok((entry, UpsertOutcome::Updated)) => {
                    summary.snapshots_updated += 1;
                    scored.push(entry);
                }
                Err(err) => {
                    summary.accounts_failed += 1;
                    error!(account = %account.name, error = %err, "failed to score account");
                }
            }
        }

        match self.store.renewal_settings().await {
            Ok(Some(settings)) => {
                for account in &accounts {
                    match self.renewal_reminder(account, &settings, now).await {
                        Ok(true) => summary.renewal_alerts_created += 1,
                        Ok(false) => {}
                        Err(err) => {
                            error!(account = %account.name, error = %err, "renewal reminder failed");
                        }
                    }
                }
            }
            Ok(None) => debug!("no renewal notification settings"),
            Err(err) => error!(error = %err, "failed to load renewal settings"),
        }

        for entry in &scored {
            let peers: Vec<f64> = scored
                .iter()
                .filter(|other| other.account.id != entry.account.id)
                .map(|other| other.score.composite)
                .collect();

            match self.process_anomaly(entry, &peers, &tenant, now).await {
                Ok(AnomalyOutcome::Clean) => {}
                Ok(AnomalyOutcome::SkippedRecent) => summary.anomalies_skipped_recent += 1,
                Ok(AnomalyOutcome::Created {
                    auto_sent,
                    alerted,
                    incomplete,
                }) => {
                    summary.anomalies_created += 1;
                    if auto_sent {
                        summary.outreach_auto_sent += 1;
                    }
                    if alerted {
                        summary.alerts_created += 1;
                    }
                    if incomplete {
                        summary.accounts_failed += 1;
                    }
                }
                Err(err) => {
                    summary.accounts_failed += 1;
                    error!(account = %entry.account.name, error = %err, "anomaly pass failed");
                }
            }
        }

        summary.scan_completed_at = Some(now);
        info!(
            accounts = summary.accounts_scanned,
            anomalies = summary.anomalies_created,
            failed = summary.accounts_failed,
            "full scan complete"
        );
        Ok(summary)
    }

    async fn refresh_snapshot(
        &self,
        account: Account,
        tenant: &TenantConfig,
        today: NaiveDate,
    ) -> anyhow::Result<(ScoredAccount, UpsertOutcome)> {
        let history = self.store.metric_history(account.id).await?;
        let score = scoring::evaluate(&history, account.seats, &tenant.weights);
        let outcome = self
            .store
            .upsert_snapshot(&ScoreSnapshot {
                account_id: account.id,
                snapshot_date: today,
                composite: score.composite,
                engagement: score.engagement,
                adoption: score.adoption,
                health: score.health,
                support: score.support,
                trend_delta: score.trend_delta,
            })
            .await?;
        debug!(account = %account.name, composite = score.composite, "snapshot refreshed");
        Ok((
            ScoredAccount {
                account,
                history,
                score,
            },
            outcome,
        ))
    }

    async fn renewal_reminder(
        &self,
        account: &Account,
        settings: &RenewalSettings,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let Some(renewal_date) = account.renewal_date else {
            return Ok(false);
        };
        let days = (renewal_date - now.date_naive()).num_days();
        if !settings.matches(days) {
            return Ok(false);
        }
        if self
            .store
            .has_unresolved_alert(account.id, AlertKind::RenewalReminder)
            .await?
        {
            return Ok(false);
        }

        let severity = if days <= 14 {
            Severity::High
        } else {
            Severity::Medium
        };
        self.store
            .create_alert(&Alert {
                id: Uuid::new_v4(),
                account_id: account.id,
                kind: AlertKind::RenewalReminder,
                message: format!("{} renewal is in {} days ({}).", account.name, days, renewal_date),
                severity,
                resolved: false,
                created_at: now,
            })
            .await?;
        info!(account = %account.name, days, "renewal reminder created");
        Ok(true)
    }

    async fn process_anomaly(
        &self,
        entry: &ScoredAccount,
        peers: &[f64],
        tenant: &TenantConfig,
        now: DateTime<Utc>,
    ) -> anyhow::Result<AnomalyOutcome> {
        let account = &entry.account;
        let since = now - Duration::hours(DEDUPE_WINDOW_HOURS);
        if self.store.has_anomaly_since(account.id, since).await? {
            debug!(account = %account.name, "anomaly already recorded in window");
            return Ok(AnomalyOutcome::SkippedRecent);
        }

        let Some(detection) = anomaly::detect(&DetectorInput {
            history: &entry.history,
            composite: entry.score.composite,
            seats: account.seats,
            peer_composites: peers,
        }) else {
            return Ok(AnomalyOutcome::Clean);
        };

        let facts = AnomalyFacts {
            account_name: &account.name,
            pattern: detection.pattern,
            severity: detection.severity,
            metrics: MetricsSummary::from_history(&entry.history, account.seats),
            z_score: detection.z_score,
            peer_delta: detection.peer_delta,
        };
        let explanation = self.explain(&facts).await;
        let renewal_days = account
            .renewal_date
            .map(|date| (date - now.date_naive()).num_days());
        let draft = self.draft(&facts, account, renewal_days).await.render();

        let outreach_status = match tenant.autonomy_mode {
            AutonomyMode::Executor => self.decide(account, &detection, &draft).await.initial_status(),
            AutonomyMode::Monitor | AutonomyMode::Approval => OutreachStatus::Pending,
        };

        self.store
            .create_anomaly(&AnomalyRecord {
                id: Uuid::new_v4(),
                account_id: account.id,
                detected_at: now,
                pattern: detection.pattern,
                severity: detection.severity,
                z_score: detection.z_score,
                peer_delta: detection.peer_delta,
                explanation,
                outreach_draft: draft,
                outreach_status,
            })
            .await?;

        // The anomaly is committed; each follow-up write fails on its own.
        let mut incomplete = false;
        if let Err(err) = self
            .store
            .record_event(&event(
                account.id,
                "anomaly_detected",
                format!(
                    "Anomaly detected: {} ({} severity)",
                    detection.pattern, detection.severity
                ),
                now,
            ))
            .await
        {
            incomplete = true;
            error!(account = %account.name, error = %err, "failed to record anomaly event");
        }

        let auto_sent = outreach_status == OutreachStatus::Sent;
        if auto_sent {
            if let Err(err) = self
                .store
                .record_event(&event(
                    account.id,
                    "outreach_sent",
                    "Auto-sent outreach email (executor mode)".to_string(),
                    now,
                ))
                .await
            {
                incomplete = true;
                error!(account = %account.name, error = %err, "failed to record outreach event");
            }
        }

        let mut alerted = false;
        if detection.severity.raises_alert() {
            match self
                .store
                .create_alert(&Alert {
                    id: Uuid::new_v4(),
                    account_id: account.id,
                    kind: AlertKind::Anomaly,
                    message: format!(
                        "{}: {} anomaly detected. Score: {}",
                        account.name, detection.pattern, entry.score.composite
                    ),
                    severity: detection.severity,
                    resolved: false,
                    created_at: now,
                })
                .await
            {
                Ok(()) => alerted = true,
                Err(err) => {
                    incomplete = true;
                    error!(account = %account.name, error = %err, "failed to create anomaly alert");
                }
            }
        }

        info!(
            account = %account.name,
            pattern = %detection.pattern,
            severity = %detection.severity,
            status = %outreach_status,
            "anomaly recorded"
        );
        Ok(AnomalyOutcome::Created {
            auto_sent,
            alerted,
            incomplete,
        })
    }

    async fn explain(&self, facts: &AnomalyFacts<'_>) -> String {
        match self.narrator.explain(facts).await {
            Ok(text) => text,
            Err(err) => {
                warn!(account = facts.account_name, error = %err, "explanation failed, using template");
                fallback_explanation(facts.pattern, facts.severity)
            }
        }
    }

    async fn draft(
        &self,
        facts: &AnomalyFacts<'_>,
        account: &Account,
        renewal_days: Option<i64>,
    ) -> OutreachDraft {
        let csm_name = account.csm_name.as_deref().unwrap_or(DEFAULT_CSM_NAME);
        match self.narrator.draft_outreach(facts, csm_name, renewal_days).await {
            Ok(draft) => draft,
            Err(err) => {
                warn!(account = %account.name, error = %err, "outreach draft failed, using template");
                OutreachDraft::fallback(&account.name)
            }
        }
    }

    async fn decide(&self, account: &Account, detection: &Detection, draft: &str) -> Decision {
        let request = DecisionRequest::new(
            &account.name,
            detection.pattern,
            detection.severity,
            AutonomyMode::Executor,
            draft,
        );
        match self.decider.decide(&request).await {
            Ok(decision) => {
                info!(
                    account = %account.name,
                    action = ?decision.action,
                    reason = %decision.reason,
                    wait_days = decision.wait_days,
                    "executor decision"
                );
                decision
            }
            Err(err) => {
                warn!(account = %account.name, error = %err, "executor decision failed, waiting");
                Decision::fallback()
            }
        }
    }
}

pub(crate) fn event(
    account_id: Uuid,
    event_type: &str,
    description: String,
    now: DateTime<Utc>,
) -> ActivityEvent {
    ActivityEvent {
        id: Uuid::new_v4(),
        account_id,
        event_type: event_type.to_string(),
        description,
        created_at: now,
    }
}
