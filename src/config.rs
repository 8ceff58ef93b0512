use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use incident_harness_core::routing::Thresholds;
use incident_harness_core::search::DEFAULT_KNN_BUFFER;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub tracker: Option<TrackerConfig>,
    #[serde(default)]
    pub enrich: Option<EnrichConfig>,
    #[serde(default)]
    pub ocr: OcrConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_knn_buffer")]
    pub knn_buffer: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            knn_buffer: default_knn_buffer(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_knn_buffer() -> usize {
    DEFAULT_KNN_BUFFER
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_summary_steps")]
    pub summary_steps: usize,
    #[serde(default = "default_ticket_steps")]
    pub ticket_steps: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            snippet_chars: default_snippet_chars(),
            preview_chars: default_preview_chars(),
            summary_steps: default_summary_steps(),
            ticket_steps: default_ticket_steps(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_snippet_chars() -> usize {
    400
}
fn default_preview_chars() -> usize {
    180
}
fn default_summary_steps() -> usize {
    3
}
fn default_ticket_steps() -> usize {
    6
}
fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    #[serde(default = "default_conf_min")]
    pub conf_min: f64,
    #[serde(default = "default_conf_auto")]
    pub conf_auto: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            conf_min: default_conf_min(),
            conf_auto: default_conf_auto(),
        }
    }
}

impl RoutingConfig {
    pub fn thresholds(&self) -> Result<Thresholds> {
        Ok(Thresholds::new(self.conf_min, self.conf_auto)?)
    }
}

fn default_conf_min() -> f64 {
    0.65
}
fn default_conf_auto() -> f64 {
    0.80
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embeddings_url")]
    pub url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: default_embeddings_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_embeddings_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlannerConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_chat_url")]
    pub url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: default_chat_url(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl PlannerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_chat_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_temperature() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_slack_url")]
    pub url: String,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            channel: None,
            url: default_slack_url(),
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

fn default_slack_url() -> String {
    "https://slack.com/api/chat.postMessage".to_string()
}
fn default_notify_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    pub base_url: String,
    pub email: String,
    pub project_key: String,
    #[serde(default = "default_issue_type")]
    pub issue_type: String,
    #[serde(default = "default_tracker_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_issue_type() -> String {
    "Task".to_string()
}
fn default_tracker_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichConfig {
    pub status_url: String,
    #[serde(default = "default_enrich_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_enrich_max_chars")]
    pub max_chars: usize,
}

fn default_enrich_timeout_secs() -> u64 {
    6
}
fn default_enrich_max_chars() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_command")]
    pub command: String,
    #[serde(default = "default_ocr_lang")]
    pub lang: String,
    #[serde(default = "default_ocr_psm")]
    pub psm: u8,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: default_ocr_command(),
            lang: default_ocr_lang(),
            psm: default_ocr_psm(),
        }
    }
}

fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_ocr_lang() -> String {
    "eng".to_string()
}
fn default_ocr_psm() -> u8 {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    // Filters run after the KNN fetch; a small buffer starves filtered queries.
    if config.retrieval.knn_buffer < DEFAULT_KNN_BUFFER {
        anyhow::bail!(
            "retrieval.knn_buffer must be >= {} (got {})",
            DEFAULT_KNN_BUFFER,
            config.retrieval.knn_buffer
        );
    }

    let p = &config.pipeline;
    for (name, value) in [
        ("snippet_chars", p.snippet_chars),
        ("preview_chars", p.preview_chars),
        ("summary_steps", p.summary_steps),
        ("ticket_steps", p.ticket_steps),
    ] {
        if value == 0 {
            anyhow::bail!("pipeline.{} must be > 0", name);
        }
    }
    if p.request_timeout_secs == 0 {
        anyhow::bail!("pipeline.request_timeout_secs must be > 0");
    }

    config
        .routing
        .thresholds()
        .context("invalid [routing] thresholds")?;

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.planner.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown planner provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.planner.is_enabled() && config.planner.model.is_none() {
        anyhow::bail!(
            "planner.model must be specified when provider is '{}'",
            config.planner.provider
        );
    }

    match config.notifier.provider.as_str() {
        "disabled" => {}
        "slack" => {
            if config.notifier.channel.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!("notifier.channel must be specified when provider is 'slack'");
            }
        }
        other => anyhow::bail!(
            "Unknown notifier provider: '{}'. Must be disabled or slack.",
            other
        ),
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(())
}

impl Config {
    /// Dimension of the vector column. Falls back to 1 when embeddings are
    /// disabled so read paths still open the store.
    pub fn dims(&self) -> usize {
        self.embedding.dims.unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/ihx.sqlite"

[server]
bind = "127.0.0.1:7331"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.knn_buffer, 50);
        assert_eq!(cfg.pipeline.snippet_chars, 400);
        assert_eq!(cfg.pipeline.preview_chars, 180);
        assert_eq!(cfg.pipeline.summary_steps, 3);
        assert_eq!(cfg.routing.conf_min, 0.65);
        assert_eq!(cfg.routing.conf_auto, 0.80);
        assert!(!cfg.embedding.is_enabled());
        assert!(cfg.tracker.is_none());
        assert!(cfg.enrich.is_none());
        assert_eq!(cfg.ocr.command, "tesseract");
        assert_eq!(cfg.ocr.psm, 6);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let raw = format!("{MINIMAL}\n[routing]\nconf_min = 0.9\nconf_auto = 0.8\n");
        let err = parse_config(&raw).unwrap_err();
        assert!(format!("{err:#}").contains("conf_min must not exceed conf_auto"));
    }

    #[test]
    fn enabled_embedding_needs_dims_and_model() {
        let raw = format!("{MINIMAL}\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n");
        assert!(parse_config(&raw).is_err());
        let raw = format!("{MINIMAL}\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8\n");
        assert_eq!(parse_config(&raw).unwrap().dims(), 8);
    }

    #[test]
    fn slack_needs_channel() {
        let raw = format!("{MINIMAL}\n[notifier]\nprovider = \"slack\"\n");
        assert!(parse_config(&raw).is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let raw = format!("{MINIMAL}\n[planner]\nprovider = \"oracle\"\n");
        assert!(parse_config(&raw).is_err());
    }

    #[test]
    fn example_config_parses() {
        let cfg = parse_config(include_str!("../config/ihx.example.toml")).unwrap();
        assert_eq!(cfg.dims(), 1536);
        assert_eq!(cfg.notifier.channel.as_deref(), Some("#incidents"));
        assert_eq!(cfg.tracker.as_ref().map(|t| t.project_key.as_str()), Some("OPS"));
        assert!(cfg.enrich.is_some());
    }

    #[test]
    fn small_knn_buffer_rejected() {
        let raw = format!("{MINIMAL}\n[retrieval]\nknn_buffer = 10\n");
        let err = parse_config(&raw).unwrap_err();
        assert!(err.to_string().contains("knn_buffer must be >= 50"));
        let raw = format!("{MINIMAL}\n[retrieval]\nknn_buffer = 200\n");
        assert_eq!(parse_config(&raw).unwrap().retrieval.knn_buffer, 200);
    }

    #[test]
    fn zero_request_timeout_rejected() {
        let raw = format!("{MINIMAL}\n[pipeline]\nrequest_timeout_secs = 0\n");
        assert!(parse_config(&raw).is_err());
    }

    #[test]
    fn zero_top_k_rejected() {
        let raw = format!("{MINIMAL}\n[retrieval]\ntop_k = 0\n");
        assert!(parse_config(&raw).is_err());
    }
}
