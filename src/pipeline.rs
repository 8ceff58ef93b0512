//! The request-scoped incident pipeline.
//!
//! ```text
//! text ─▶ embed ─▶ hybrid search ─▶ plan ─▶ classify ─▶ enrich ─▶ route
//!                                                                   │
//!            persist incident + run ◀── ticket ◀── notify ◀─────────┘
//! ```
//!
//! Steps run sequentially; each depends on the previous one. A request
//! gets one deadline, `pipeline.request_timeout_secs` from when it
//! starts, and every external call only sees what is left of it. The
//! embedder and planner are essential: a failure or an expired deadline
//! aborts the request before anything is written. Classification,
//! enrichment, notification and ticketing degrade to defaults or status
//! flags, including when the deadline has already passed.
//!
//! Incidents and runs are written only after all external calls have
//! returned, so an aborted request leaves no rows behind.

use anyhow::Context;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

use incident_harness_core::models::{
    truncate_chars, ActionStatus, ChunkId, Classification, IncidentId, NewIncident, NewRun,
    NextAction, Plan, Preview, Run, RunId, RunQuery, SearchHit,
};
use incident_harness_core::plan::{self, PlanOptions};
use incident_harness_core::providers::{
    Embedder, Notifier, Planner, StatusEnricher, TextExtractor, TicketOutcome, TicketTracker,
};
use incident_harness_core::routing::{self, Thresholds};
use incident_harness_core::search::{self, SearchFilters, SearchRequest};
use incident_harness_core::store::Store;
use incident_harness_core::{Error, Result};

use crate::config::Config;
use crate::embedding::{create_embedder, embed_query};
use crate::enrich::create_enricher;
use crate::notify::create_notifier;
use crate::ocr::TesseractExtractor;
use crate::planner::create_planner;
use crate::sqlite_store::SqliteStore;
use crate::tracker::create_tracker;

const TICKET_SUMMARY_CHARS: usize = 90;

/// Tunables resolved from `[retrieval]`, `[pipeline]` and `[routing]`.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub knn_buffer: usize,
    pub snippet_chars: usize,
    pub preview_chars: usize,
    pub summary_steps: usize,
    pub ticket_steps: usize,
    pub request_timeout: Duration,
    pub thresholds: Thresholds,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            knn_buffer: search::DEFAULT_KNN_BUFFER,
            snippet_chars: 400,
            preview_chars: 180,
            summary_steps: 3,
            ticket_steps: 6,
            request_timeout: Duration::from_secs(60),
            thresholds: Thresholds::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            top_k: config.retrieval.top_k,
            knn_buffer: config.retrieval.knn_buffer,
            snippet_chars: config.pipeline.snippet_chars,
            preview_chars: config.pipeline.preview_chars,
            summary_steps: config.pipeline.summary_steps,
            ticket_steps: config.pipeline.ticket_steps,
            request_timeout: Duration::from_secs(config.pipeline.request_timeout_secs),
            thresholds: config.routing.thresholds()?,
        })
    }
}

/// External collaborators, injected so tests can substitute doubles.
#[derive(Clone)]
pub struct Dependencies {
    pub store: Arc<dyn Store>,
    pub embedder: Arc<dyn Embedder>,
    pub planner: Arc<dyn Planner>,
    pub notifier: Arc<dyn Notifier>,
    pub tracker: Arc<dyn TicketTracker>,
    pub extractor: Arc<dyn TextExtractor>,
    pub enricher: Arc<dyn StatusEnricher>,
}

/// Per-request knobs shared by text and OCR runs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub top_k: Option<usize>,
    pub filters: SearchFilters,
    pub notify: bool,
    pub create_ticket: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            top_k: None,
            filters: SearchFilters::default(),
            notify: true,
            create_ticket: false,
        }
    }
}

/// Result of a run, OCR run or replay.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub incident_id: IncidentId,
    pub run_id: RunId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replayed_from: Option<RunId>,
    pub confidence: f64,
    pub next_action: NextAction,
    pub needs_approval: bool,
    pub plan: Plan,
    pub retrieved_ids: Vec<ChunkId>,
    pub previews: Vec<Preview>,
    pub final_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub action_status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketOutcome>,
}

/// Where the incident text came from. Decides the notification headline,
/// whether a new incident is recorded, and whether tickets are allowed.
enum Trigger {
    Text,
    Image { filename: String },
    Replay { from: RunId, incident_id: IncidentId },
}

impl Trigger {
    fn name(&self) -> &'static str {
        match self {
            Trigger::Text => "run",
            Trigger::Image { .. } => "ocr_run",
            Trigger::Replay { .. } => "replay",
        }
    }

    fn headline(&self, text: &str) -> String {
        match self {
            Trigger::Text => text.to_string(),
            Trigger::Image { filename } => format!("OCR incident: {filename}"),
            Trigger::Replay { from, .. } => format!("Replayed incident from run {from}"),
        }
    }
}

pub struct Pipeline {
    deps: Dependencies,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(deps: Dependencies, settings: PipelineSettings) -> Self {
        Self { deps, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.deps.store
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.settings.request_timeout
    }

    /// Bound an essential dependency call by the request deadline. Core
    /// errors raised inside keep their variant (e.g. `DimensionMismatch`);
    /// anything else is reported as the dependency being unavailable.
    async fn call<T>(
        &self,
        deadline: Instant,
        dependency: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout_at(deadline, fut).await {
            Err(_) => Err(Error::DependencyTimeout {
                dependency: dependency.to_string(),
            }),
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => match e.downcast::<Error>() {
                Ok(inner) => Err(inner),
                Err(e) => Err(Error::unavailable(dependency, &e)),
            },
        }
    }

    /// Bound an optional dependency call by the request deadline; running
    /// out of time yields `None`.
    async fn call_optional<T>(
        &self,
        deadline: Instant,
        dependency: &str,
        fut: impl Future<Output = T>,
    ) -> Option<T> {
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(dependency, "optional dependency timed out");
                None
            }
        }
    }

    /// Embed `text` and run hybrid search.
    pub async fn search(&self, text: &str, top_k: Option<usize>, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
        self.search_until(self.deadline(), text, top_k, filters).await
    }

    async fn search_until(
        &self,
        deadline: Instant,
        text: &str,
        top_k: Option<usize>,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        if text.trim().is_empty() {
            return Err(Error::invalid("text must not be empty"));
        }
        let top_k = top_k.unwrap_or(self.settings.top_k);
        let query_vec = self
            .call(deadline, "embedder", embed_query(self.deps.embedder.as_ref(), text))
            .await?;
        search::search(
            self.deps.store.as_ref(),
            &SearchRequest {
                query_vec: &query_vec,
                top_k,
                filters,
                knn_buffer: self.settings.knn_buffer,
            },
        )
        .await
    }

    /// Primary entry point: plan, route and record an incident described in text.
    pub async fn run(&self, text: &str, opts: &RunOptions) -> Result<RunOutcome> {
        if text.trim().is_empty() {
            return Err(Error::invalid("text must not be empty"));
        }
        let incident = NewIncident {
            source: "api".to_string(),
            raw_input: text.to_string(),
            extracted_text: String::new(),
        };
        self.execute(self.deadline(), Trigger::Text, Some(incident), text, opts)
            .instrument(request_span("run"))
            .await
    }

    /// OCR an uploaded image and run the pipeline on the extracted text.
    ///
    /// Empty extraction fails with `EmptyExtraction` before anything is stored.
    pub async fn run_image(&self, image: &[u8], filename: &str, opts: &RunOptions) -> Result<RunOutcome> {
        let deadline = self.deadline();
        async {
            let extracted = self
                .call(deadline, "ocr", self.deps.extractor.extract(image))
                .await?;
            if extracted.trim().is_empty() {
                return Err(Error::EmptyExtraction);
            }
            let incident = NewIncident {
                source: "ocr".to_string(),
                raw_input: format!("image:{filename}"),
                extracted_text: extracted.clone(),
            };
            let trigger = Trigger::Image {
                filename: filename.to_string(),
            };
            self.execute(deadline, trigger, Some(incident), &extracted, opts)
                .await
        }
        .instrument(request_span("ocr_run"))
        .await
    }

    /// Re-run retrieval and planning for the incident behind `run_id`,
    /// recording a new run on the same incident. Replay applies no
    /// filters, uses the default `top_k` and never creates tickets.
    pub async fn replay(&self, run_id: RunId, notify: bool) -> Result<RunOutcome> {
        let deadline = self.deadline();
        async {
            let original = self
                .deps
                .store
                .get_run_with_incident(run_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("run {run_id}")))?;
            let text = original.incident.working_text().to_string();
            let opts = RunOptions {
                top_k: None,
                filters: SearchFilters::default(),
                notify,
                create_ticket: false,
            };
            let trigger = Trigger::Replay {
                from: run_id,
                incident_id: original.incident.id,
            };
            self.execute(deadline, trigger, None, &text, &opts).await
        }
        .instrument(request_span("replay"))
        .await
    }

    pub async fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>> {
        Ok(self.deps.store.list_runs(query).await?)
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<Run> {
        self.deps
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("run {run_id}")))
    }

    async fn execute(
        &self,
        deadline: Instant,
        trigger: Trigger,
        incident: Option<NewIncident>,
        text: &str,
        opts: &RunOptions,
    ) -> Result<RunOutcome> {
        let s = &self.settings;
        let top_k = opts.top_k.unwrap_or(s.top_k);
        let hits = self
            .search_until(deadline, text, Some(top_k), &opts.filters)
            .await?;
        let retrieved_ids: Vec<ChunkId> = hits.iter().map(|h| h.chunk_id).collect();

        let plan_opts = PlanOptions {
            top_k,
            snippet_chars: s.snippet_chars,
        };
        let outcome = self
            .call(
                deadline,
                "planner",
                plan::build_plan(self.deps.planner.as_ref(), text, &hits, &plan_opts),
            )
            .await?;
        if let Some(reason) = outcome.fallback_reason() {
            tracing::warn!(%reason, "planner output unusable, using fallback plan");
        }
        let mut plan = outcome.into_plan();

        let previews = plan::previews(&hits, s.preview_chars);
        let classification = self
            .call_optional(
                deadline,
                "classifier",
                plan::classify(self.deps.planner.as_ref(), text, &previews),
            )
            .await
            .map(|c| {
                if let Some(reason) = c.fallback_reason() {
                    tracing::warn!(%reason, "classification unusable, using defaults");
                }
                c.into_classification()
            })
            .unwrap_or_else(Classification::default);
        plan.apply_classification(classification);
        plan.enrichment = self
            .call_optional(deadline, "status_enricher", self.deps.enricher.fetch_status())
            .await
            .flatten();

        let route = routing::route(plan.confidence, &s.thresholds);
        plan.next_action = Some(route.action);
        plan.needs_approval = Some(route.needs_approval);
        plan.previews = previews.clone();

        let mut message_id = None;
        let notification = match routing::gated_notification(&route, opts.notify) {
            Some(status) => status,
            None => {
                let headline = trigger.headline(text);
                message_id = self
                    .call_optional(deadline, "notifier", self.deps.notifier.post(&headline, &plan))
                    .await
                    .flatten();
                routing::notification_status(message_id.as_deref())
            }
        };
        let mut action_status = ActionStatus::new(notification);

        let tickets_allowed = !matches!(trigger, Trigger::Replay { .. });
        let mut ticket = None;
        if opts.create_ticket && tickets_allowed && route.allows_ticket() {
            let summary = format!("[Auto] {}", truncate_chars(text, TICKET_SUMMARY_CHARS));
            let body = ticket_body(&plan.steps, s.ticket_steps);
            let result = self
                .call_optional(deadline, "tracker", self.deps.tracker.create_ticket(&summary, &body))
                .await
                .unwrap_or_else(|| TicketOutcome::failed("timeout"));
            if let Some(reason) = result.reason.as_deref().filter(|_| !result.ok) {
                tracing::warn!(%reason, "ticket not created");
            }
            action_status.ticket = Some(routing::ticket_status(&result));
            ticket = Some(result);
        }

        let final_summary = plan::summarize(&plan.steps, s.summary_steps);

        let (incident_id, replayed_from) = match (&trigger, incident) {
            (Trigger::Replay { from, incident_id }, _) => (*incident_id, Some(*from)),
            (_, Some(new_incident)) => (self.deps.store.insert_incident(&new_incident).await?, None),
            (_, None) => return Err(Error::invalid("no incident to record")),
        };
        let run_id = self
            .deps
            .store
            .insert_run(&NewRun {
                incident_id,
                retrieved_ids: retrieved_ids.clone(),
                plan: plan.clone(),
                final_summary: final_summary.clone(),
                action_status,
            })
            .await?;

        tracing::info!(
            trigger = trigger.name(),
            incident_id,
            run_id,
            action = %route.action,
            confidence = plan.confidence,
            status = %action_status,
            "run recorded"
        );

        Ok(RunOutcome {
            incident_id,
            run_id,
            replayed_from,
            confidence: plan.confidence,
            next_action: route.action,
            needs_approval: route.needs_approval,
            plan,
            retrieved_ids,
            previews,
            final_summary,
            message_id,
            action_status,
            ticket,
        })
    }
}

fn request_span(op: &'static str) -> tracing::Span {
    tracing::info_span!("pipeline", op, request_id = %uuid::Uuid::new_v4())
}

/// `Steps:\n- a\n- b`, limited to the first `max_steps` steps.
pub fn ticket_body(steps: &[String], max_steps: usize) -> String {
    let listed: Vec<&str> = steps.iter().take(max_steps).map(String::as_str).collect();
    format!("Steps:\n- {}", listed.join("\n- "))
}

/// Wire the production pipeline: SQLite store plus the configured providers.
pub async fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let pool = crate::db::connect(config)
        .await
        .context("failed to open database")?;
    let store = SqliteStore::new(pool, config.dims());

    let deps = Dependencies {
        store: Arc::new(store),
        embedder: create_embedder(&config.embedding)?,
        planner: create_planner(&config.planner)?,
        notifier: create_notifier(&config.notifier)?,
        tracker: create_tracker(config.tracker.as_ref())?,
        extractor: Arc::new(TesseractExtractor::new(&config.ocr)),
        enricher: create_enricher(config.enrich.as_ref())?,
    };
    Ok(Pipeline::new(deps, PipelineSettings::from_config(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_body_caps_steps() {
        let steps: Vec<String> = (1..=8).map(|i| format!("step {i}")).collect();
        let body = ticket_body(&steps, 6);
        assert!(body.starts_with("Steps:\n- step 1\n- step 2"));
        assert!(body.ends_with("- step 6"));
        assert_eq!(ticket_body(&[], 6), "Steps:\n- ");
    }
}
