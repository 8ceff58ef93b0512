//! Slack notifier.
//!
//! Posts the plan to a channel through `chat.postMessage` with a bot
//! token from `SLACK_BOT_TOKEN`. Failures are logged and reported as
//! `None`; they never abort a pipeline request.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use incident_harness_core::models::Plan;
use incident_harness_core::providers::{DisabledNotifier, Notifier};

use crate::config::NotifierConfig;

pub struct SlackNotifier {
    client: reqwest::Client,
    token: String,
    channel: String,
    url: String,
}

impl SlackNotifier {
    pub fn new(config: &NotifierConfig, token: String) -> Result<Self> {
        let channel = config
            .channel
            .clone()
            .ok_or_else(|| anyhow::anyhow!("notifier.channel required for slack"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            token,
            channel,
            url: config.url.clone(),
        })
    }

    async fn post_message(&self, text: &str) -> Result<String> {
        let body = serde_json::json!({
            "channel": self.channel,
            "text": text,
        });
        let json: serde_json::Value = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if json.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let err = json
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown_error");
            anyhow::bail!("slack error: {err}");
        }
        json.get("ts")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("slack response is missing ts"))
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn post(&self, incident_text: &str, plan: &Plan) -> Option<String> {
        match self.post_message(&format_message(incident_text, plan)).await {
            Ok(ts) => Some(ts),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), channel = %self.channel, "notification failed");
                None
            }
        }
    }
}

fn bullets(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    items
        .iter()
        .map(|s| format!("• {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Message body: incident, confidence, then steps and risks as bullets.
pub fn format_message(incident_text: &str, plan: &Plan) -> String {
    format!(
        "*Incident:* {}\n*Confidence:* {:.2}\n\n*Plan:*\n{}\n\n*Risks:*\n{}",
        incident_text,
        plan.confidence,
        bullets(&plan.steps, "No steps provided."),
        bullets(&plan.risks, "No risks provided."),
    )
}

/// Slack when configured and a token is present, otherwise disabled.
pub fn create_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    if config.provider != "slack" {
        return Ok(Arc::new(DisabledNotifier));
    }
    match std::env::var("SLACK_BOT_TOKEN") {
        Ok(token) if !token.trim().is_empty() => Ok(Arc::new(SlackNotifier::new(config, token)?)),
        _ => {
            tracing::warn!("SLACK_BOT_TOKEN not set; notifications disabled");
            Ok(Arc::new(DisabledNotifier))
        }
    }
}
