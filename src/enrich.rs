//! Status enrichment: a small blob from an operational status endpoint,
//! attached to plans under `enrichment`.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use incident_harness_core::models::truncate_chars;
use incident_harness_core::providers::StatusEnricher;

use crate::config::EnrichConfig;

pub struct HttpStatusEnricher {
    client: reqwest::Client,
    url: String,
    max_chars: usize,
}

impl HttpStatusEnricher {
    pub fn new(config: &EnrichConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.status_url.clone(),
            max_chars: config.max_chars,
        })
    }
}

#[async_trait]
impl StatusEnricher for HttpStatusEnricher {
    /// `{ok: true, sample}` on 200, `{ok: false, code}` on any other
    /// status, `{ok: false, error}` when the request itself fails.
    async fn fetch_status(&self) -> Option<Value> {
        let response = match self.client.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, url = %self.url, "status enrichment unavailable");
                return Some(json!({ "ok": false, "error": e.to_string() }));
            }
        };
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Some(json!({ "ok": false, "code": status.as_u16() }));
        }
        match response.text().await {
            Ok(body) => Some(json!({ "ok": true, "sample": truncate_chars(&body, self.max_chars) })),
            Err(e) => Some(json!({ "ok": false, "error": e.to_string() })),
        }
    }
}

/// Enricher used when no status endpoint is configured.
pub struct NoEnrichment;

#[async_trait]
impl StatusEnricher for NoEnrichment {
    async fn fetch_status(&self) -> Option<Value> {
        None
    }
}

pub fn create_enricher(config: Option<&EnrichConfig>) -> Result<Arc<dyn StatusEnricher>> {
    match config {
        Some(c) if !c.status_url.trim().is_empty() => Ok(Arc::new(HttpStatusEnricher::new(c)?)),
        _ => Ok(Arc::new(NoEnrichment)),
    }
}
