use serde::Serialize;

use crate::models::{MetricRecord, Pattern, Severity};
use crate::scoring::{round1, round2};

const MIN_HISTORY: usize = 14;
const BASELINE_HISTORY: usize = 60;
const RECENT_WINDOW: usize = 30;
const STDEV_FLOOR: f64 = 0.01;

const Z_TRIGGER: f64 = -1.5;
const Z_HIGH: f64 = -2.0;
const Z_CRITICAL: f64 = -3.0;
const SUDDEN_DROP_RATIO: f64 = -0.3;
const SEAT_COLLAPSE_RATIO: f64 = 0.3;
const PEER_TRIGGER: f64 = -20.0;
const COMPOSITE_CRITICAL: f64 = 30.0;
const COMPOSITE_LOW: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub pattern: Pattern,
    pub severity: Severity,
    pub z_score: Option<f64>,
    pub peer_delta: Option<f64>,
}

/// Inputs for one account's evaluation.
#[derive(Debug, Clone, Copy)]
pub struct DetectorInput<'a> {
    pub history: &'a [MetricRecord],
    pub composite: f64,
    pub seats: i64,
    pub peer_composites: &'a [f64],
}

/// Runs the three triggers in order against one account.
///
/// Severity only ever rises across triggers: the z-score trigger sets
/// it, the peer trigger lifts it to at least medium, and the composite
/// floor applies only when nothing else fired.
pub fn detect(input: &DetectorInput<'_>) -> Option<Detection> {
    let history = input.history;
    if history.len() < MIN_HISTORY {
        return None;
    }

    let login_z = series_z_score(history, |m| m.logins as f64);
    let api_z = series_z_score(history, |m| m.api_calls as f64);
    let z_score = match (login_z, api_z) {
        (Some(login), Some(api)) => Some(login.min(api)),
        (login, api) => login.or(api),
    };

    let peer_delta = if input.peer_composites.is_empty() {
        None
    } else {
        Some(input.composite - mean(input.peer_composites.iter().copied()))
    };

    let mut is_anomaly = false;
    let mut pattern = None;
    let mut severity = Severity::Low;

    if let Some(z) = z_score.filter(|z| *z < Z_TRIGGER) {
        is_anomaly = true;
        pattern = Some(classify_drop(history));

        let recent = &history[history.len().saturating_sub(RECENT_WINDOW)..];
        let avg_active = mean(recent.iter().map(|m| m.active_seats as f64));
        if avg_active < input.seats as f64 * SEAT_COLLAPSE_RATIO {
            pattern = Some(Pattern::SeatCollapse);
        }

        severity = if z < Z_CRITICAL {
            Severity::Critical
        } else if z < Z_HIGH {
            Severity::High
        } else {
            Severity::Medium
        };
    }

    if peer_delta.is_some_and(|delta| delta < PEER_TRIGGER) {
        is_anomaly = true;
        pattern.get_or_insert(Pattern::ParallelCollapse);
        severity = severity.max(Severity::Medium);
    }

    if !is_anomaly {
        if input.composite < COMPOSITE_CRITICAL {
            is_anomaly = true;
            pattern.get_or_insert(Pattern::SuddenDrop);
            severity = Severity::Critical;
        } else if input.composite < COMPOSITE_LOW {
            is_anomaly = true;
            pattern.get_or_insert(Pattern::SlowErosion);
            severity = severity.max(Severity::Medium);
        }
    }

    if !is_anomaly {
        return None;
    }

    Some(Detection {
        pattern: pattern.unwrap_or(Pattern::SlowErosion),
        severity,
        z_score: z_score.map(round2),
        peer_delta: peer_delta.map(round1),
    })
}

/// Z-score of the last 30 days' mean against the baseline of days
/// [-60, -30). Undefined with fewer than 60 days of history.
fn series_z_score(history: &[MetricRecord], value: impl Fn(&MetricRecord) -> f64) -> Option<f64> {
    if history.len() < BASELINE_HISTORY {
        return None;
    }
    let end = history.len();
    let baseline: Vec<f64> = history[end - BASELINE_HISTORY..end - RECENT_WINDOW]
        .iter()
        .map(&value)
        .collect();
    let baseline_mean = mean(baseline.iter().copied());
    let baseline_stdev = sample_stdev(&baseline, baseline_mean).max(STDEV_FLOOR);
    let recent_mean = mean(history[end - RECENT_WINDOW..].iter().map(&value));
    Some((recent_mean - baseline_mean) / baseline_stdev)
}

fn classify_drop(history: &[MetricRecord]) -> Pattern {
    let end = history.len();
    let last_week = &history[end.saturating_sub(7)..];
    let prior_week = &history[end.saturating_sub(14)..end.saturating_sub(7)];
    if last_week.is_empty() || prior_week.is_empty() {
        return Pattern::SlowErosion;
    }

    let last_mean = mean(last_week.iter().map(|m| m.dau));
    let prior_mean = mean(prior_week.iter().map(|m| m.dau));
    if prior_mean > 0.0 && (last_mean - prior_mean) / prior_mean < SUDDEN_DROP_RATIO {
        Pattern::SuddenDrop
    } else {
        Pattern::SlowErosion
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn sample_stdev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}
