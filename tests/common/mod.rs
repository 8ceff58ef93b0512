//! Test doubles shared by the integration suites.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use incident_harness::pipeline::{Dependencies, Pipeline, PipelineSettings};
use incident_harness_core::models::{ChunkId, ChunkMetadata, NewChunk, Plan};
use incident_harness_core::plan::CLASSIFY_SYSTEM;
use incident_harness_core::providers::{
    Embedder, Notifier, Planner, StatusEnricher, TextExtractor, TicketOutcome, TicketTracker,
};
use incident_harness_core::store::memory::InMemoryStore;
use incident_harness_core::store::Store;

pub const DIMS: usize = 3;

/// Sleeps for `delay` unless it is zero, so undelayed doubles answer on
/// their first poll.
async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Maps text onto one of three axes by keyword so retrieval is predictable.
pub struct KeywordEmbedder;

pub fn vector_for(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    if lower.contains("auth") || lower.contains("login") || lower.contains("401") {
        vec![1.0, 0.05, 0.0]
    } else if lower.contains("billing") || lower.contains("invoice") || lower.contains("payment") {
        vec![0.05, 1.0, 0.0]
    } else {
        vec![0.0, 0.05, 1.0]
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| vector_for(t)).collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("connection refused")
    }
}

/// Answers plan prompts with `plan` and classification prompts with
/// `classification`, recording every prompt it sees. Each answer can be
/// held back by its own delay.
pub struct ScriptedPlanner {
    pub plan: String,
    pub classification: String,
    pub plan_delay: Duration,
    pub classify_delay: Duration,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedPlanner {
    pub fn new(plan: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            classification: json!({"category": "auth", "severity": "high", "tags": ["login"]})
                .to_string(),
            plan_delay: Duration::ZERO,
            classify_delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_confidence(confidence: f64) -> Self {
        Self::new(plan_json(confidence))
    }

    pub fn classification(mut self, raw: impl Into<String>) -> Self {
        self.classification = raw.into();
        self
    }

    pub fn plan_delay(mut self, delay: Duration) -> Self {
        self.plan_delay = delay;
        self
    }

    pub fn classify_delay(mut self, delay: Duration) -> Self {
        self.classify_delay = delay;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

pub fn plan_json(confidence: f64) -> String {
    json!({
        "steps": ["Rotate the signing key", "Restart auth-service", "Verify login"],
        "risks": ["Sessions are invalidated"],
        "confidence": confidence,
        "sources": [1]
    })
    .to_string()
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if system == CLASSIFY_SYSTEM {
            pause(self.classify_delay).await;
            Ok(self.classification.clone())
        } else {
            pause(self.plan_delay).await;
            Ok(self.plan.clone())
        }
    }
}

/// Never answers within any reasonable timeout.
pub struct SlowPlanner;

#[async_trait]
impl Planner for SlowPlanner {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(plan_json(0.9))
    }
}

/// Records posted headlines; returns `message_id` when set.
pub struct RecordingNotifier {
    pub message_id: Option<String>,
    pub delay: Duration,
    pub posts: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn confirming() -> Self {
        Self {
            message_id: Some("1700000000.000100".to_string()),
            delay: Duration::ZERO,
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            message_id: None,
            delay: Duration::ZERO,
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post(&self, incident_text: &str, _plan: &Plan) -> Option<String> {
        self.posts.lock().unwrap().push(incident_text.to_string());
        pause(self.delay).await;
        self.message_id.clone()
    }
}

/// Records ticket requests and answers with a fixed outcome.
pub struct RecordingTracker {
    pub outcome: TicketOutcome,
    pub delay: Duration,
    pub requests: Mutex<Vec<(String, String)>>,
}

impl RecordingTracker {
    pub fn creating() -> Self {
        Self {
            outcome: TicketOutcome::created(Some("OPS-42".to_string()), Some("10042".to_string())),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            outcome: TicketOutcome::failed("400 Bad Request"),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TicketTracker for RecordingTracker {
    async fn create_ticket(&self, summary: &str, description: &str) -> TicketOutcome {
        self.requests
            .lock()
            .unwrap()
            .push((summary.to_string(), description.to_string()));
        pause(self.delay).await;
        self.outcome.clone()
    }
}

pub struct FixedExtractor {
    pub text: String,
    pub delay: Duration,
}

impl FixedExtractor {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl TextExtractor for FixedExtractor {
    async fn extract(&self, _image: &[u8]) -> Result<String> {
        pause(self.delay).await;
        Ok(self.text.clone())
    }
}

pub struct FixedEnricher {
    pub status: Option<Value>,
    pub delay: Duration,
}

impl FixedEnricher {
    pub fn new(status: Option<Value>) -> Self {
        Self {
            status,
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl StatusEnricher for FixedEnricher {
    async fn fetch_status(&self) -> Option<Value> {
        pause(self.delay).await;
        self.status.clone()
    }
}

/// Runbook corpus: two auth chunks, one billing chunk, one generic chunk.
pub async fn seed_corpus(store: &dyn Store) -> Vec<ChunkId> {
    let doc = store.insert_document("runbooks", "test").await.unwrap();
    let rows = [
        (
            "auth-service 401 after deploy: rotate the JWT signing key",
            ChunkMetadata::default()
                .with("service", "auth")
                .with("error_code", "401")
                .with("env", "prod"),
        ),
        (
            "login failures on auth: check the identity provider clock skew",
            ChunkMetadata::default()
                .with("service", "auth")
                .with("error_code", "500")
                .with("env", "staging"),
        ),
        (
            "billing invoice job stuck: restart the payment worker",
            ChunkMetadata::default()
                .with("service", "billing")
                .with("error_code", "504"),
        ),
        (
            "disk nearly full on worker nodes: prune old images",
            ChunkMetadata::default().with("service", "infra"),
        ),
    ];

    let mut ids = Vec::new();
    for (text, metadata) in rows {
        let id = store
            .insert_chunk(&NewChunk {
                document_id: doc,
                text: text.to_string(),
                metadata,
            })
            .await
            .unwrap();
        store.upsert_embedding(id, &vector_for(text)).await.unwrap();
        ids.push(id);
    }
    ids
}

/// Everything a pipeline test may want to poke at after a run.
pub struct Harness {
    pub pipeline: Pipeline,
    pub store: Arc<InMemoryStore>,
    pub planner: Arc<ScriptedPlanner>,
    pub notifier: Arc<RecordingNotifier>,
    pub tracker: Arc<RecordingTracker>,
}

pub struct HarnessBuilder {
    planner: ScriptedPlanner,
    notifier: RecordingNotifier,
    tracker: RecordingTracker,
    extractor: FixedExtractor,
    enricher: FixedEnricher,
    settings: PipelineSettings,
}

impl HarnessBuilder {
    pub fn new(confidence: f64) -> Self {
        Self {
            planner: ScriptedPlanner::with_confidence(confidence),
            notifier: RecordingNotifier::confirming(),
            tracker: RecordingTracker::creating(),
            extractor: FixedExtractor::new("auth-service 401 Unauthorized\nafter deploy"),
            enricher: FixedEnricher::new(Some(
                json!({"ok": true, "sample": "all systems operational"}),
            )),
            settings: PipelineSettings::default(),
        }
    }

    pub fn planner(mut self, planner: ScriptedPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn tracker(mut self, tracker: RecordingTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn extracted_text(mut self, text: &str) -> Self {
        self.extractor.text = text.to_string();
        self
    }

    pub fn extract_delay(mut self, delay: Duration) -> Self {
        self.extractor.delay = delay;
        self
    }

    pub fn enrich_delay(mut self, delay: Duration) -> Self {
        self.enricher.delay = delay;
        self
    }

    /// Overrides only the request budget.
    pub fn request_timeout(mut self, budget: Duration) -> Self {
        self.settings.request_timeout = budget;
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn build(self) -> Harness {
        let store = Arc::new(InMemoryStore::new(DIMS));
        seed_corpus(store.as_ref()).await;

        let planner = Arc::new(self.planner);
        let notifier = Arc::new(self.notifier);
        let tracker = Arc::new(self.tracker);
        let deps = Dependencies {
            store: store.clone(),
            embedder: Arc::new(KeywordEmbedder),
            planner: planner.clone(),
            notifier: notifier.clone(),
            tracker: tracker.clone(),
            extractor: Arc::new(self.extractor),
            enricher: Arc::new(self.enricher),
        };

        Harness {
            pipeline: Pipeline::new(deps, self.settings),
            store,
            planner,
            notifier,
            tracker,
        }
    }
}

/// Pipeline over a seeded in-memory store with confirming doubles.
pub async fn harness(confidence: f64) -> Harness {
    HarnessBuilder::new(confidence).build().await
}
