use serde::Serialize;

use crate::models::{MetricRecord, Weights};

/// Number of most recent days a score is computed over.
pub const SCORE_WINDOW: usize = 30;
/// Minimum history length before a trend is reported.
pub const TREND_MIN_HISTORY: usize = 14;
const TREND_SPAN: usize = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HealthScore {
    pub composite: f64,
    pub engagement: f64,
    pub adoption: f64,
    pub health: f64,
    pub support: f64,
    pub trend_delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Critical,
    AtRisk,
    Good,
    Healthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Critical => "critical",
            HealthState::AtRisk => "at_risk",
            HealthState::Good => "good",
            HealthState::Healthy => "healthy",
        }
    }
}

/// Full snapshot for an account: component scores plus trend.
pub fn evaluate(history: &[MetricRecord], seats: i64, weights: &Weights) -> HealthScore {
    HealthScore {
        trend_delta: trend(history, seats, weights),
        ..score(history, seats, weights)
    }
}

/// Component and composite scores over the most recent window of
/// `history`. `trend_delta` is always zero here.
pub fn score(history: &[MetricRecord], seats: i64, weights: &Weights) -> HealthScore {
    if history.is_empty() {
        return HealthScore::default();
    }

    let window = &history[history.len().saturating_sub(SCORE_WINDOW)..];
    let seats = seats.max(1) as f64;

    let engagement = mean_or(
        window.iter().map(|m| {
            let dau_ratio = (m.dau / m.mau.max(1.0)).min(1.0);
            let logins = (m.logins as f64 / 10.0).min(1.0);
            clamp_pct((dau_ratio * 0.6 + logins * 0.4) * 100.0)
        }),
        0.0,
    );
    let adoption = mean_or(
        window.iter().map(|m| {
            let features = (m.feature_count as f64 / 10.0).min(1.0);
            let seat_ratio = (m.active_seats as f64 / seats).min(1.0);
            clamp_pct((features * 0.5 + seat_ratio * 0.5) * 100.0)
        }),
        0.0,
    );
    let health = mean_or(
        window.iter().map(|m| {
            let api = (m.api_calls as f64 / 1000.0).min(1.0);
            let wau_ratio = (m.wau / m.mau.max(1.0)).min(1.0);
            clamp_pct((api * 0.4 + wau_ratio * 0.6) * 100.0)
        }),
        0.0,
    );
    let support = mean_or(
        window
            .iter()
            .map(|m| clamp_pct(100.0 - m.support_tickets as f64 * 20.0)),
        100.0,
    );

    let mut total_weight = weights.total();
    if total_weight == 0.0 {
        total_weight = 100.0;
    }
    let composite = (engagement * weights.engagement
        + adoption * weights.adoption
        + health * weights.health
        + support * weights.support)
        / total_weight;

    HealthScore {
        composite: round1(clamp_pct(composite)),
        engagement: round1(engagement),
        adoption: round1(adoption),
        health: round1(health),
        support: round1(support),
        trend_delta: 0.0,
    }
}

/// Composite of the last seven days minus the composite of the seven
/// days before that. Zero until there are enough days of history.
pub fn trend(history: &[MetricRecord], seats: i64, weights: &Weights) -> f64 {
    if history.len() < TREND_MIN_HISTORY {
        return 0.0;
    }
    let end = history.len();
    let recent = &history[end - TREND_SPAN..];
    let prior = &history[end - 2 * TREND_SPAN..end - TREND_SPAN];
    round1(score(recent, seats, weights).composite - score(prior, seats, weights).composite)
}

pub fn health_state(composite: f64, critical_threshold: f64, at_risk_threshold: f64) -> HealthState {
    if composite < critical_threshold {
        HealthState::Critical
    } else if composite < at_risk_threshold {
        HealthState::AtRisk
    } else if composite < 85.0 {
        HealthState::Good
    } else {
        HealthState::Healthy
    }
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn clamp_pct(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

fn mean_or(values: impl Iterator<Item = f64>, empty: f64) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        empty
    } else {
        sum / count as f64
    }
}
