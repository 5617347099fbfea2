use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::accounts::{AccountDetail, RenewalEntry};
use crate::models::{Account, Alert, AnomalyRecord, ScoreSnapshot, TenantConfig};
use crate::narrative::OutreachDraft;
use crate::scoring::{health_state, round1, HealthState};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioStats {
    pub total_accounts: usize,
    pub critical: usize,
    pub at_risk: usize,
    pub good: usize,
    pub healthy: usize,
    pub avg_health: f64,
    pub total_mrr: f64,
    pub pending_approvals: usize,
    pub last_scan: Option<NaiveDate>,
}

/// Latest composite and health state per account; accounts that were
/// never scanned count as zero.
pub fn account_states(
    tenant: &TenantConfig,
    accounts: &[Account],
    snapshots: &[ScoreSnapshot],
) -> Vec<(Uuid, f64, HealthState)> {
    let latest: HashMap<Uuid, f64> = snapshots
        .iter()
        .map(|s| (s.account_id, s.composite))
        .collect();
    accounts
        .iter()
        .map(|account| {
            let composite = latest.get(&account.id).copied().unwrap_or(0.0);
            let state = health_state(composite, tenant.critical_threshold, tenant.at_risk_threshold);
            (account.id, composite, state)
        })
        .collect()
}

pub fn portfolio_stats(
    tenant: &TenantConfig,
    accounts: &[Account],
    snapshots: &[ScoreSnapshot],
    pending: &[AnomalyRecord],
) -> PortfolioStats {
    let mut stats = PortfolioStats {
        total_accounts: accounts.len(),
        total_mrr: accounts.iter().map(|a| a.mrr).sum(),
        pending_approvals: pending.len(),
        last_scan: snapshots.iter().map(|s| s.snapshot_date).max(),
        ..PortfolioStats::default()
    };

    let states = account_states(tenant, accounts, snapshots);
    for (_, _, state) in &states {
        match state {
            HealthState::Critical => stats.critical += 1,
            HealthState::AtRisk => stats.at_risk += 1,
            HealthState::Good => stats.good += 1,
            HealthState::Healthy => stats.healthy += 1,
        }
    }
    if !states.is_empty() {
        let total: f64 = states.iter().map(|(_, composite, _)| composite).sum();
        stats.avg_health = round1(total / states.len() as f64);
    }
    stats
}

pub fn build_report(
    tenant: &TenantConfig,
    accounts: &[Account],
    snapshots: &[ScoreSnapshot],
    pending: &[AnomalyRecord],
    alerts: &[Alert],
) -> String {
    let stats = portfolio_stats(tenant, accounts, snapshots, pending);
    let names: HashMap<Uuid, &str> = accounts.iter().map(|a| (a.id, a.name.as_str())).collect();
    let name_of = |id: &Uuid| names.get(id).copied().unwrap_or("unknown account");

    let mut output = String::new();

    let _ = writeln!(output, "# Account Health Report");
    let _ = writeln!(
        output,
        "Generated for {} (last scan {})",
        tenant.name,
        stats
            .last_scan
            .map(|d| d.to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Portfolio");
    let _ = writeln!(
        output,
        "- {} accounts, average health {:.1}, MRR {:.2}",
        stats.total_accounts, stats.avg_health, stats.total_mrr
    );
    let _ = writeln!(
        output,
        "- critical {}, at risk {}, good {}, healthy {}",
        stats.critical, stats.at_risk, stats.good, stats.healthy
    );
    let _ = writeln!(output, "- {} outreach drafts awaiting approval", stats.pending_approvals);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lowest Scoring Accounts");

    let mut states = account_states(tenant, accounts, snapshots);
    states.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    if states.is_empty() {
        let _ = writeln!(output, "No accounts on file.");
    } else {
        for (id, composite, state) in states.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} score {:.1} ({})",
                name_of(id),
                composite,
                state.as_str()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Pending Outreach");

    if pending.is_empty() {
        let _ = writeln!(output, "No outreach awaiting review.");
    } else {
        for anomaly in pending.iter() {
            let draft = OutreachDraft::parse(&anomaly.outreach_draft, name_of(&anomaly.account_id));
            let _ = writeln!(
                output,
                "- {} [{}] {} / {} on {}: \"{}\"",
                name_of(&anomaly.account_id),
                anomaly.id,
                anomaly.pattern,
                anomaly.severity,
                anomaly.detected_at.date_naive(),
                draft.subject
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Alerts");

    if alerts.is_empty() {
        let _ = writeln!(output, "No open alerts.");
    } else {
        for alert in alerts.iter() {
            let _ = writeln!(
                output,
                "- [{}] {} ({}): {}",
                alert.severity,
                name_of(&alert.account_id),
                alert.kind.as_str(),
                alert.message
            );
        }
    }

    output
}

/// Markdown drill-down for one account. Daily scores are limited to the
/// most recent `days` entries.
pub fn build_account_report(detail: &AccountDetail, days: usize) -> String {
    let account = &detail.account;
    let mut output = String::new();

    let _ = writeln!(output, "# {}", account.name);
    let _ = writeln!(
        output,
        "- {} tier, {} seats, MRR {:.2}, CSM {}",
        account.tier,
        account.seats,
        account.mrr,
        account.csm_name.as_deref().unwrap_or("unassigned")
    );
    if let Some(renewal) = account.renewal_date {
        let _ = writeln!(output, "- renews {renewal}");
    }
    match &detail.latest {
        Some(s) => {
            let _ = writeln!(
                output,
                "- score {:.1} ({}), trend {:+.1} as of {}",
                s.composite,
                detail.state.as_str(),
                s.trend_delta,
                s.snapshot_date
            );
            let _ = writeln!(
                output,
                "- engagement {:.1}, adoption {:.1}, health {:.1}, support {:.1}",
                s.engagement, s.adoption, s.health, s.support
            );
        }
        None => {
            let _ = writeln!(output, "- not scanned yet");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily Scores");
    if detail.daily.is_empty() {
        let _ = writeln!(output, "No metrics on file.");
    } else {
        let skip = detail.daily.len().saturating_sub(days);
        for point in detail.daily.iter().skip(skip) {
            let _ = writeln!(
                output,
                "- {} score {:.1} (dau {:.0}, logins {}, api {}, tickets {})",
                point.metrics.date,
                point.score.composite,
                point.metrics.dau,
                point.metrics.logins,
                point.metrics.api_calls,
                point.metrics.support_tickets
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Anomalies");
    if detail.anomalies.is_empty() {
        let _ = writeln!(output, "No anomalies recorded.");
    } else {
        for anomaly in detail.anomalies.iter() {
            let _ = writeln!(
                output,
                "- {} {} / {} [{}] outreach {}",
                anomaly.detected_at.format("%Y-%m-%d %H:%M"),
                anomaly.pattern,
                anomaly.severity,
                anomaly.id,
                anomaly.outreach_status
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Activity");
    if detail.events.is_empty() {
        let _ = writeln!(output, "No activity recorded.");
    } else {
        for event in detail.events.iter() {
            let _ = writeln!(
                output,
                "- {} {}: {}",
                event.created_at.format("%Y-%m-%d %H:%M"),
                event.event_type,
                event.description
            );
        }
    }

    output
}

pub fn build_renewal_calendar(month: NaiveDate, entries: &[RenewalEntry]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Renewals for {}", month.format("%B %Y"));
    if entries.is_empty() {
        let _ = writeln!(output, "No renewals this month.");
    }
    for entry in entries {
        let _ = writeln!(
            output,
            "- {} {} in {} days, score {:.1} ({})",
            entry.renewal_date,
            entry.account_name,
            entry.days_until_renewal,
            entry.composite,
            entry.health_state.as_str()
        );
    }
    output
}
