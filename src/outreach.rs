use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::ModelError;
use crate::models::{OutreachStatus, ReviewAction};
use crate::scan::event;
use crate::store::Store;

/// Applies a human approve/reject to a pending outreach draft and
/// records the decision on the account's timeline.
pub async fn review(
    store: &dyn Store,
    anomaly_id: Uuid,
    action: ReviewAction,
    now: DateTime<Utc>,
) -> anyhow::Result<OutreachStatus> {
    let anomaly = store
        .anomaly(anomaly_id)
        .await?
        .ok_or(ModelError::AnomalyNotFound(anomaly_id))?;

    let current = anomaly.outreach_status;
    let next = current.review(action)?;
    if !store
        .transition_outreach_status(anomaly_id, current, next)
        .await?
    {
        // reviewed by someone else since the read
        let latest = store
            .anomaly(anomaly_id)
            .await?
            .map(|a| a.outreach_status)
            .unwrap_or(current);
        return Err(ModelError::IllegalTransition(latest).into());
    }

    let (event_type, description) = match action {
        ReviewAction::Approve => ("outreach_approved", "Outreach email approved for sending"),
        ReviewAction::Reject => ("outreach_rejected", "Outreach email rejected"),
    };
    store
        .record_event(&event(
            anomaly.account_id,
            event_type,
            description.to_string(),
            now,
        ))
        .await?;

    info!(anomaly = %anomaly_id, status = %next, "outreach reviewed");
    Ok(next)
}
