//! Jira ticket tracker.
//!
//! Creates issues through `POST {base_url}/rest/api/3/issue` using basic
//! auth (`email:JIRA_API_TOKEN`). Missing configuration is a normal state
//! handled by [`DisabledTracker`]; HTTP failures come back as
//! `TicketOutcome { ok: false, .. }`.

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;

use incident_harness_core::providers::{DisabledTracker, TicketOutcome, TicketTracker};

use crate::config::TrackerConfig;

pub struct JiraTracker {
    client: reqwest::Client,
    issue_url: String,
    auth_header: String,
    project_key: String,
    issue_type: String,
}

impl JiraTracker {
    pub fn new(config: &TrackerConfig, api_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            issue_url: format!("{}/rest/api/3/issue", config.base_url.trim_end_matches('/')),
            auth_header: basic_auth(&config.email, api_token),
            project_key: config.project_key.clone(),
            issue_type: config.issue_type.clone(),
        })
    }
}

fn basic_auth(email: &str, token: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{email}:{token}"));
    format!("Basic {encoded}")
}

/// Atlassian document body with one paragraph per line.
fn adf_description(text: &str) -> serde_json::Value {
    let paragraphs: Vec<serde_json::Value> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            serde_json::json!({
                "type": "paragraph",
                "content": [{ "type": "text", "text": line }],
            })
        })
        .collect();
    serde_json::json!({ "type": "doc", "version": 1, "content": paragraphs })
}

fn issue_payload(project_key: &str, issue_type: &str, summary: &str, description: &str) -> serde_json::Value {
    serde_json::json!({
        "fields": {
            "project": { "key": project_key },
            "summary": summary,
            "issuetype": { "name": issue_type },
            "description": adf_description(description),
        }
    })
}

#[async_trait]
impl TicketTracker for JiraTracker {
    async fn create_ticket(&self, summary: &str, description: &str) -> TicketOutcome {
        let payload = issue_payload(&self.project_key, &self.issue_type, summary, description);
        let resp = self
            .client
            .post(&self.issue_url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .json(&payload)
            .send()
            .await;

        let response = match resp {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "ticket creation failed");
                return TicketOutcome::failed(e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "ticket creation rejected");
            return TicketOutcome::failed(format!("{}:{}", status.as_u16(), body));
        }

        match response.json::<serde_json::Value>().await {
            Ok(json) => {
                let field = |k: &str| json.get(k).and_then(|v| v.as_str()).map(str::to_string);
                TicketOutcome::created(field("key"), field("id"))
            }
            // The issue exists even if the body is unreadable.
            Err(_) => TicketOutcome::created(None, None),
        }
    }
}

/// Jira when `[tracker]` and `JIRA_API_TOKEN` are both present.
pub fn create_tracker(config: Option<&TrackerConfig>) -> Result<Arc<dyn TicketTracker>> {
    let Some(config) = config else {
        return Ok(Arc::new(DisabledTracker));
    };
    match std::env::var("JIRA_API_TOKEN") {
        Ok(token) if !token.trim().is_empty() => Ok(Arc::new(JiraTracker::new(config, &token)?)),
        _ => {
            tracing::warn!("JIRA_API_TOKEN not set; ticket creation disabled");
            Ok(Arc::new(DisabledTracker))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_encodes_credentials() {
        assert_eq!(basic_auth("a@b.c", "tok"), "Basic YUBiLmM6dG9r");
    }

    #[test]
    fn payload_shape() {
        let p = issue_payload("OPS", "Task", "[Auto] login broken", "Steps:\n- restart\n\n- verify");
        assert_eq!(p["fields"]["project"]["key"], "OPS");
        assert_eq!(p["fields"]["issuetype"]["name"], "Task");
        let content = p["fields"]["description"]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(content[1]["content"][0]["text"], "- restart");
    }

    #[tokio::test]
    async fn missing_section_is_not_configured() {
        let tracker = create_tracker(None).unwrap();
        let outcome = tracker.create_ticket("s", "d").await;
        assert_eq!(outcome, TicketOutcome::not_configured());
    }
}
