use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt::Write;
use tracing::{debug, warn};

use crate::decision::{parse_decision, Decision, DecisionRequest, DecisionService, ParsedDecision};
use crate::error::ServiceError;
use crate::narrative::{AnomalyFacts, NarrativeService, OutreachDraft};

const API_VERSION: &str = "2023-06-01";

/// Narrative and decision collaborator backed by the Anthropic
/// Messages API.
pub struct ClaudeClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ClaudeClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            model,
        }
    }

    async fn complete(&self, prompt: String, max_tokens: u32) -> Result<String, ServiceError> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await?;
        payload["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .filter(|text| !text.trim().is_empty())
            .ok_or(ServiceError::EmptyResponse)
    }
}

fn facts_context(facts: &AnomalyFacts<'_>) -> String {
    let m = &facts.metrics;
    let mut context = format!(
        "Account: {}\nPattern: {}\nSeverity: {}\n\
         Recent metrics: DAU={:.1}, Active seats={:.0}/{}, Feature count={:.0}, API calls/day={:.0}",
        facts.account_name,
        facts.pattern,
        facts.severity,
        m.avg_dau,
        m.avg_active_seats,
        m.total_seats,
        m.avg_feature_count,
        m.avg_api_calls,
    );
    if let Some(z) = facts.z_score {
        let _ = write!(context, "\nUsage z-score: {z:.2}");
    }
    if let Some(delta) = facts.peer_delta {
        let _ = write!(context, "\nDelta from peer average: {delta:.1} points");
    }
    context
}

#[async_trait]
impl NarrativeService for ClaudeClient {
    async fn explain(&self, facts: &AnomalyFacts<'_>) -> Result<String, ServiceError> {
        let prompt = format!(
            "You analyse customer account health for a customer success team.\n\n{}\n\n\
             In two or three short paragraphs, explain what changed in this account's usage, \
             the likely business impact, and how urgently the team should act. \
             Quote the numbers above. Plain paragraphs, no lists.",
            facts_context(facts)
        );
        self.complete(prompt, 500).await
    }

    async fn draft_outreach(
        &self,
        facts: &AnomalyFacts<'_>,
        csm_name: &str,
        renewal_days: Option<i64>,
    ) -> Result<OutreachDraft, ServiceError> {
        let mut context = facts_context(facts);
        let _ = write!(context, "\nCSM: {csm_name}");
        if let Some(days) = renewal_days {
            let _ = write!(context, "\nRenewal in: {days} days");
        }
        let prompt = format!(
            "Draft a short check-in email from a customer success manager.\n\n{context}\n\n\
             Start with a line `Subject: <subject>`, then a blank line, then the body. \
             Keep it warm and concise, mention usage without sounding alarmed, \
             propose a call, and sign off as {csm_name}."
        );
        let text = self.complete(prompt, 400).await?;
        Ok(OutreachDraft::parse(&text, facts.account_name))
    }
}

#[async_trait]
impl DecisionService for ClaudeClient {
    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, ServiceError> {
        let prompt = format!(
            "Decide what to do with an automated customer outreach email.\n\n\
             Account: {}\nPattern: {}\nSeverity: {}\nMode: {}\nDraft preview: {}...\n\n\
             Reply with JSON only: {{\"action\": \"send\" | \"wait\" | \"escalate\", \
             \"reason\": \"one sentence\", \"wait_days\": <integer>}}.\n\
             send: high or critical severity in executor mode. \
             escalate: the situation needs human judgement. \
             wait: low or medium severity with no urgency; wait_days is when to look again (0 when sending).",
            request.account_name,
            request.pattern,
            request.severity,
            request.mode,
            request.draft_preview,
        );
        let raw = self.complete(prompt, 200).await?;
        let parsed = parse_decision(&raw);
        match &parsed {
            ParsedDecision::Complete(_) => {}
            ParsedDecision::Partial { defaulted, .. } => {
                debug!(account = request.account_name, ?defaulted, "decision had missing fields");
            }
            ParsedDecision::Unusable(reason) => {
                warn!(account = request.account_name, %reason, "decision response unusable");
            }
        }
        Ok(parsed.into_decision())
    }
}

/// Stand-in when no API key is configured: every call fails and the
/// caller takes its fallback.
pub struct Unconfigured;

#[async_trait]
impl NarrativeService for Unconfigured {
    async fn explain(&self, _facts: &AnomalyFacts<'_>) -> Result<String, ServiceError> {
        Err(ServiceError::NotConfigured("narrative"))
    }

    async fn draft_outreach(
        &self,
        _facts: &AnomalyFacts<'_>,
        _csm_name: &str,
        _renewal_days: Option<i64>,
    ) -> Result<OutreachDraft, ServiceError> {
        Err(ServiceError::NotConfigured("narrative"))
    }
}

#[async_trait]
impl DecisionService for Unconfigured {
    async fn decide(&self, _request: &DecisionRequest<'_>) -> Result<Decision, ServiceError> {
        Err(ServiceError::NotConfigured("decision"))
    }
}
