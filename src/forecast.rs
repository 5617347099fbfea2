use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;

use crate::scoring::{round2, HealthState};

const HORIZON_MONTHS: u32 = 12;

#[derive(Debug, Clone)]
pub struct AccountProfile {
    pub mrr: f64,
    pub state: HealthState,
    pub renewal_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub month_start: NaiveDate,
    pub label: String,
    pub projected_mrr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueForecast {
    pub current_mrr: f64,
    pub projected_mrr_end_12m: f64,
    pub projected_revenue_12m: f64,
    pub average_monthly_growth_pct: f64,
    pub monthly_projection: Vec<ForecastPoint>,
}

fn monthly_drift(state: HealthState) -> f64 {
    match state {
        HealthState::Critical => -0.015,
        HealthState::AtRisk => -0.008,
        HealthState::Good => 0.004,
        HealthState::Healthy => 0.008,
    }
}

fn renewal_factor(state: HealthState) -> f64 {
    match state {
        HealthState::Critical => 0.78,
        HealthState::AtRisk => 0.90,
        HealthState::Good => 1.02,
        HealthState::Healthy => 1.06,
    }
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Projects MRR month by month: every account drifts by its health
/// state each month and takes a one-off renewal adjustment in its
/// renewal month.
pub fn project(accounts: &[AccountProfile], today: NaiveDate) -> RevenueForecast {
    let current_mrr: f64 = accounts.iter().map(|a| a.mrr).sum();
    if accounts.is_empty() {
        return RevenueForecast {
            current_mrr: 0.0,
            projected_mrr_end_12m: 0.0,
            projected_revenue_12m: 0.0,
            average_monthly_growth_pct: 0.0,
            monthly_projection: Vec::new(),
        };
    }

    let base = month_start(today);
    let renewal_months: Vec<Option<NaiveDate>> = accounts
        .iter()
        .map(|a| a.renewal_date.map(month_start))
        .collect();
    let mut projected: Vec<f64> = accounts.iter().map(|a| a.mrr).collect();
    let mut points = Vec::with_capacity(HORIZON_MONTHS as usize);

    for offset in 1..=HORIZON_MONTHS {
        let Some(month) = base.checked_add_months(Months::new(offset)) else {
            break;
        };
        let mut total = 0.0;
        for (i, account) in accounts.iter().enumerate() {
            let mut mrr = projected[i] * (1.0 + monthly_drift(account.state));
            if renewal_months[i] == Some(month) {
                mrr *= renewal_factor(account.state);
            }
            projected[i] = mrr.max(0.0);
            total += projected[i];
        }
        points.push(ForecastPoint {
            month_start: month,
            label: month.format("%b %Y").to_string(),
            projected_mrr: round2(total),
        });
    }

    let end = points.last().map(|p| p.projected_mrr).unwrap_or(current_mrr);
    let revenue: f64 = points.iter().map(|p| p.projected_mrr).sum();
    let growth = if current_mrr > 0.0 {
        ((end / current_mrr).powf(1.0 / HORIZON_MONTHS as f64) - 1.0) * 100.0
    } else {
        0.0
    };

    RevenueForecast {
        current_mrr: round2(current_mrr),
        projected_mrr_end_12m: round2(end),
        projected_revenue_12m: round2(revenue),
        average_monthly_growth_pct: round2(growth),
        monthly_projection: points,
    }
}
