use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::ServiceError;
use crate::models::{AutonomyMode, OutreachStatus, Pattern, Severity};

pub const DEFAULT_WAIT_DAYS: u32 = 3;
const FALLBACK_REASON: &str = "defaulting to wait for human review";
const MISSING_REASON: &str = "Insufficient data for decision";
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Send,
    Wait,
    Escalate,
}

impl DecisionAction {
    /// Exact tokens only; anything else is treated as malformed.
    fn parse(value: &str) -> Option<Self> {
        match value {
            "send" => Some(DecisionAction::Send),
            "wait" => Some(DecisionAction::Wait),
            "escalate" => Some(DecisionAction::Escalate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub reason: String,
    pub wait_days: u32,
}

impl Decision {
    /// Safe default used whenever the decision service cannot be trusted.
    pub fn fallback() -> Self {
        Self {
            action: DecisionAction::Wait,
            reason: FALLBACK_REASON.to_string(),
            wait_days: DEFAULT_WAIT_DAYS,
        }
    }

    /// Outreach status a freshly created anomaly starts in. Only an
    /// explicit send moves it past pending.
    pub fn initial_status(&self) -> OutreachStatus {
        match self.action {
            DecisionAction::Send => OutreachStatus::Sent,
            DecisionAction::Wait | DecisionAction::Escalate => OutreachStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionRequest<'a> {
    pub account_name: &'a str,
    pub pattern: Pattern,
    pub severity: Severity,
    pub mode: AutonomyMode,
    pub draft_preview: String,
}

impl<'a> DecisionRequest<'a> {
    pub fn new(
        account_name: &'a str,
        pattern: Pattern,
        severity: Severity,
        mode: AutonomyMode,
        draft: &str,
    ) -> Self {
        Self {
            account_name,
            pattern,
            severity,
            mode,
            draft_preview: draft.chars().take(PREVIEW_CHARS).collect(),
        }
    }
}

#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, ServiceError>;
}

/// Result of decoding a raw decision response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedDecision {
    Complete(Decision),
    /// Decoded, but some fields were missing or invalid and were filled
    /// with defaults.
    Partial {
        decision: Decision,
        defaulted: Vec<&'static str>,
    },
    Unusable(String),
}

impl ParsedDecision {
    pub fn into_decision(self) -> Decision {
        match self {
            ParsedDecision::Complete(decision) => decision,
            ParsedDecision::Partial { decision, .. } => decision,
            ParsedDecision::Unusable(_) => Decision::fallback(),
        }
    }
}

pub fn parse_decision(raw: &str) -> ParsedDecision {
    let body = strip_code_fence(raw);
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => return ParsedDecision::Unusable(format!("invalid json: {err}")),
    };
    let Some(object) = value.as_object() else {
        return ParsedDecision::Unusable("decision is not a json object".to_string());
    };

    let mut defaulted = Vec::new();

    let action = match object.get("action").and_then(Value::as_str).and_then(DecisionAction::parse) {
        Some(action) => action,
        None => {
            defaulted.push("action");
            DecisionAction::Wait
        }
    };
    let reason = match object.get("reason").and_then(Value::as_str) {
        Some(reason) if !reason.trim().is_empty() => reason.trim().to_string(),
        _ => {
            defaulted.push("reason");
            MISSING_REASON.to_string()
        }
    };
    let wait_days = match object
        .get("wait_days")
        .and_then(Value::as_u64)
        .and_then(|days| u32::try_from(days).ok())
    {
        Some(days) => days,
        None => {
            defaulted.push("wait_days");
            DEFAULT_WAIT_DAYS
        }
    };

    let decision = Decision {
        action,
        reason,
        wait_days,
    };
    if defaulted.is_empty() {
        ParsedDecision::Complete(decision)
    } else {
        ParsedDecision::Partial {
            decision,
            defaulted,
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.strip_prefix("json").unwrap_or(rest);
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}
