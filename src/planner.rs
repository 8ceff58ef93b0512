//! Chat-completion planner.
//!
//! Sends a system + user message pair to an OpenAI-compatible
//! `/v1/chat/completions` endpoint in JSON mode and returns the raw
//! message content. The content is untrusted; callers run it through
//! [`incident_harness_core::plan::parse_plan`] or
//! [`incident_harness_core::plan::parse_classification`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use incident_harness_core::providers::Planner;

use crate::config::PlannerConfig;

pub struct DisabledPlanner;

#[async_trait]
impl Planner for DisabledPlanner {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        bail!("Planner provider is disabled")
    }
}

pub struct OpenAIPlanner {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    temperature: f64,
}

impl OpenAIPlanner {
    pub fn new(config: &PlannerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("planner.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            url: config.url.clone(),
            model,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Planner for OpenAIPlanner {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });

        let json: serde_json::Value = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        message_content(&json)
    }
}

/// Pull `choices[0].message.content` out of a chat completion response.
fn message_content(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Chat response is missing message content"))
}

pub fn create_planner(config: &PlannerConfig) -> Result<Arc<dyn Planner>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledPlanner)),
        "openai" => Ok(Arc::new(OpenAIPlanner::new(config)?)),
        other => bail!("Unknown planner provider: {}", other),
    }
}
