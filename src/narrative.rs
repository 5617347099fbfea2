use async_trait::async_trait;
use serde::Serialize;

use crate::error::ServiceError;
use crate::models::{MetricRecord, Pattern, Severity};
use crate::scoring::SCORE_WINDOW;

/// Rolling averages over the scoring window, handed to the narrative
/// service as context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub avg_dau: f64,
    pub avg_api_calls: f64,
    pub avg_active_seats: f64,
    pub total_seats: i64,
    pub avg_feature_count: f64,
}

impl MetricsSummary {
    pub fn from_history(history: &[MetricRecord], total_seats: i64) -> Self {
        let recent = &history[history.len().saturating_sub(SCORE_WINDOW)..];
        let count = recent.len().max(1) as f64;
        let avg = |f: fn(&MetricRecord) -> f64| recent.iter().map(f).sum::<f64>() / count;
        Self {
            avg_dau: avg(|m| m.dau),
            avg_api_calls: avg(|m| m.api_calls as f64),
            avg_active_seats: avg(|m| m.active_seats as f64),
            total_seats,
            avg_feature_count: avg(|m| m.feature_count as f64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyFacts<'a> {
    pub account_name: &'a str,
    pub pattern: Pattern,
    pub severity: Severity,
    pub metrics: MetricsSummary,
    pub z_score: Option<f64>,
    pub peer_delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutreachDraft {
    pub subject: String,
    pub body: String,
}

impl OutreachDraft {
    /// Splits `Subject: ...` off the first non-empty line. Text without
    /// a subject line keeps its full body and gets a generic subject.
    pub fn parse(text: &str, account_name: &str) -> Self {
        let trimmed = text.trim();
        let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
        match first.trim().strip_prefix("Subject:") {
            Some(subject) if !subject.trim().is_empty() => Self {
                subject: subject.trim().to_string(),
                body: rest.trim().to_string(),
            },
            _ => Self {
                subject: default_subject(account_name),
                body: trimmed.to_string(),
            },
        }
    }

    pub fn fallback(account_name: &str) -> Self {
        Self {
            subject: default_subject(account_name),
            body: "Hi team, I wanted to reach out to see how things are going.".to_string(),
        }
    }

    pub fn render(&self) -> String {
        format!("Subject: {}\n\n{}", self.subject, self.body)
    }
}

fn default_subject(account_name: &str) -> String {
    format!("Checking in on {account_name}")
}

pub fn fallback_explanation(pattern: Pattern, severity: Severity) -> String {
    format!("Anomaly detected: {pattern} pattern with {severity} severity.")
}

#[async_trait]
pub trait NarrativeService: Send + Sync {
    async fn explain(&self, facts: &AnomalyFacts<'_>) -> Result<String, ServiceError>;

    async fn draft_outreach(
        &self,
        facts: &AnomalyFacts<'_>,
        csm_name: &str,
        renewal_days: Option<i64>,
    ) -> Result<OutreachDraft, ServiceError>;
}
