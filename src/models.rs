use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub tier: String,
    pub seats: i64,
    pub mrr: f64,
    pub renewal_date: Option<NaiveDate>,
    pub csm_name: Option<String>,
}

/// One day of usage telemetry for an account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricRecord {
    pub date: NaiveDate,
    pub dau: f64,
    pub wau: f64,
    pub mau: f64,
    pub active_seats: i64,
    pub feature_count: i64,
    pub api_calls: i64,
    pub support_tickets: i64,
    pub logins: i64,
    pub nps: Option<f64>,
}

/// Relative weights of the four component scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub engagement: f64,
    pub adoption: f64,
    pub health: f64,
    pub support: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            engagement: 30.0,
            adoption: 25.0,
            health: 25.0,
            support: 20.0,
        }
    }
}

impl Weights {
    pub fn total(&self) -> f64 {
        self.engagement + self.adoption + self.health + self.support
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    Monitor,
    Approval,
    Executor,
}

impl AutonomyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyMode::Monitor => "monitor",
            AutonomyMode::Approval => "approval",
            AutonomyMode::Executor => "executor",
        }
    }
}

impl FromStr for AutonomyMode {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "monitor" => Ok(AutonomyMode::Monitor),
            "approval" => Ok(AutonomyMode::Approval),
            "executor" => Ok(AutonomyMode::Executor),
            other => Err(ModelError::unknown("autonomy mode", other)),
        }
    }
}

impl fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant-wide settings read from the singleton settings row.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantConfig {
    pub name: String,
    pub weights: Weights,
    pub autonomy_mode: AutonomyMode,
    pub critical_threshold: f64,
    pub at_risk_threshold: f64,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            name: "My Company".to_string(),
            weights: Weights::default(),
            autonomy_mode: AutonomyMode::Approval,
            critical_threshold: 40.0,
            at_risk_threshold: 70.0,
        }
    }
}

pub const RENEWAL_LEAD_TIMES: [i64; 4] = [90, 30, 14, 7];

#[derive(Debug, Clone, PartialEq)]
pub struct RenewalSettings {
    pub enabled: bool,
    pub lead_times: Vec<i64>,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            lead_times: vec![30],
        }
    }
}

impl RenewalSettings {
    pub fn matches(&self, days_until_renewal: i64) -> bool {
        self.enabled
            && days_until_renewal >= 0
            && RENEWAL_LEAD_TIMES.contains(&days_until_renewal)
            && self.lead_times.contains(&days_until_renewal)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSnapshot {
    pub account_id: Uuid,
    pub snapshot_date: NaiveDate,
    pub composite: f64,
    pub engagement: f64,
    pub adoption: f64,
    pub health: f64,
    pub support: f64,
    pub trend_delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn raises_alert(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl FromStr for Severity {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(ModelError::unknown("severity", other)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    SuddenDrop,
    SlowErosion,
    SeatCollapse,
    ParallelCollapse,
}

impl Pattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::SuddenDrop => "sudden_drop",
            Pattern::SlowErosion => "slow_erosion",
            Pattern::SeatCollapse => "seat_collapse",
            Pattern::ParallelCollapse => "parallel_collapse",
        }
    }
}

impl FromStr for Pattern {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sudden_drop" => Ok(Pattern::SuddenDrop),
            "slow_erosion" => Ok(Pattern::SlowErosion),
            "seat_collapse" => Ok(Pattern::SeatCollapse),
            "parallel_collapse" => Ok(Pattern::ParallelCollapse),
            other => Err(ModelError::unknown("pattern", other)),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an anomaly's outreach draft.
///
/// `Pending` is the only open state. The scan may create a record
/// directly in `Sent` when the executor decides to send; every later
/// move comes from a human review and starts from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStatus {
    Pending,
    Sent,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl OutreachStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutreachStatus::Pending => "pending",
            OutreachStatus::Sent => "sent",
            OutreachStatus::Approved => "approved",
            OutreachStatus::Rejected => "rejected",
        }
    }

    pub fn review(self, action: ReviewAction) -> Result<OutreachStatus, ModelError> {
        match (self, action) {
            (OutreachStatus::Pending, ReviewAction::Approve) => Ok(OutreachStatus::Approved),
            (OutreachStatus::Pending, ReviewAction::Reject) => Ok(OutreachStatus::Rejected),
            (closed, _) => Err(ModelError::IllegalTransition(closed)),
        }
    }
}

impl FromStr for OutreachStatus {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(OutreachStatus::Pending),
            "sent" => Ok(OutreachStatus::Sent),
            "approved" => Ok(OutreachStatus::Approved),
            "rejected" => Ok(OutreachStatus::Rejected),
            other => Err(ModelError::unknown("outreach status", other)),
        }
    }
}

impl fmt::Display for OutreachStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub detected_at: DateTime<Utc>,
    pub pattern: Pattern,
    pub severity: Severity,
    pub z_score: Option<f64>,
    pub peer_delta: Option<f64>,
    pub explanation: String,
    pub outreach_draft: String,
    pub outreach_status: OutreachStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Anomaly,
    RenewalReminder,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Anomaly => "anomaly",
            AlertKind::RenewalReminder => "renewal_reminder",
        }
    }
}

impl FromStr for AlertKind {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "anomaly" => Ok(AlertKind::Anomaly),
            "renewal_reminder" => Ok(AlertKind::RenewalReminder),
            other => Err(ModelError::unknown("alert type", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub account_id: Uuid,
    pub event_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Counters returned by a full scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    pub accounts_scanned: usize,
    pub snapshots_created: usize,
    pub snapshots_updated: usize,
    pub anomalies_created: usize,
    pub anomalies_skipped_recent: usize,
    pub alerts_created: usize,
    pub renewal_alerts_created: usize,
    pub outreach_auto_sent: usize,
    pub accounts_failed: usize,
    pub scan_completed_at: Option<DateTime<Utc>>,
}
