//! Plan Builder: prompt construction and tolerant parsing of planner output.
//!
//! Planner output is untrusted text. Parsing never fails: anything that is
//! not a JSON object becomes [`PlanOutcome::Fallback`], a low-confidence
//! generic plan that still cites the retrieved chunks. The same discipline
//! applies to classification via [`ClassificationOutcome`].

use serde_json::{Map, Value};

use crate::models::{truncate_chars, ChunkId, Classification, Plan, Preview, SearchHit, Severity};
use crate::providers::Planner;

pub const PLAN_SYSTEM: &str = "You are an incident fixer. Output ONLY compact JSON with keys: \
plan.steps[] as strings, plan.risks[] as strings, confidence float 0-1, sources[] chunk_ids. \
Keep steps actionable. No prose, no markdown, only JSON.";

pub const CLASSIFY_SYSTEM: &str = "Return JSON only";

pub const FALLBACK_STEP: &str = "Review top results and apply known fix";
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

const CLASSIFY_PREVIEWS: usize = 3;
const CLASSIFY_SNIPPET_CHARS: usize = 120;

#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
    pub top_k: usize,
    /// Per-hit snippet cap in the planner context.
    pub snippet_chars: usize,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            snippet_chars: 400,
        }
    }
}

/// Result of parsing planner output.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Parsed(Plan),
    Fallback { plan: Plan, reason: String },
}

impl PlanOutcome {
    pub fn plan(&self) -> &Plan {
        match self {
            PlanOutcome::Parsed(plan) | PlanOutcome::Fallback { plan, .. } => plan,
        }
    }

    pub fn into_plan(self) -> Plan {
        match self {
            PlanOutcome::Parsed(plan) | PlanOutcome::Fallback { plan, .. } => plan,
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            PlanOutcome::Parsed(_) => None,
            PlanOutcome::Fallback { reason, .. } => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationOutcome {
    Parsed(Classification),
    Fallback {
        classification: Classification,
        reason: String,
    },
}

impl ClassificationOutcome {
    pub fn into_classification(self) -> Classification {
        match self {
            ClassificationOutcome::Parsed(c) => c,
            ClassificationOutcome::Fallback { classification, .. } => classification,
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            ClassificationOutcome::Parsed(_) => None,
            ClassificationOutcome::Fallback { reason, .. } => Some(reason),
        }
    }
}

/// One context line per hit: `[id:7] [svc:auth] [code:AUTH-500] <snippet>`.
pub fn context_lines(hits: &[SearchHit], snippet_chars: usize) -> Vec<String> {
    hits.iter()
        .map(|h| {
            format!(
                "[id:{}] [svc:{}] [code:{}] {}",
                h.chunk_id,
                h.metadata.service.as_deref().unwrap_or(""),
                h.metadata.error_code.as_deref().unwrap_or(""),
                truncate_chars(&h.text, snippet_chars)
            )
        })
        .collect()
}

pub fn plan_prompt(incident_text: &str, hits: &[SearchHit], snippet_chars: usize) -> String {
    format!(
        "Incident:\n{}\n\nContext (top hits):\n{}\n\nReturn JSON only.\n",
        incident_text,
        context_lines(hits, snippet_chars).join("\n")
    )
}

pub fn previews(hits: &[SearchHit], max_chars: usize) -> Vec<Preview> {
    hits.iter().map(|h| Preview::from_hit(h, max_chars)).collect()
}

pub fn classification_prompt(incident_text: &str, previews: &[Preview]) -> String {
    let ctx: Vec<String> = previews
        .iter()
        .take(CLASSIFY_PREVIEWS)
        .map(|p| {
            format!(
                "[{}/{}] {}",
                p.service,
                p.error_code,
                truncate_chars(&p.snippet, CLASSIFY_SNIPPET_CHARS)
            )
        })
        .collect();
    format!(
        "Classify incident. Return JSON with keys: category, severity one of [low, medium, high], tags[].\n\
         Incident: {}\nContext:\n{}\nReturn JSON only.",
        incident_text,
        ctx.join("\n")
    )
}

/// Deterministic run summary: the first `n` steps joined by `"; "`.
pub fn summarize(steps: &[String], n: usize) -> String {
    steps
        .iter()
        .take(n)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn fallback_plan(retrieved: &[ChunkId], top_k: usize) -> Plan {
    Plan::new(
        vec![FALLBACK_STEP.to_string()],
        Vec::new(),
        FALLBACK_CONFIDENCE,
        retrieved.iter().take(top_k).copied().collect(),
    )
}

/// Remove a surrounding markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(strip_code_fence(raw)) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

fn source_ids(value: Option<&Value>) -> Vec<ChunkId> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    let mut ids: Vec<ChunkId> = Vec::with_capacity(items.len());
    for item in items {
        let id = match item {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        if let Some(id) = id {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Parse raw planner output into a [`Plan`].
///
/// Steps and risks are read from `plan.steps`/`plan.risks` when `plan` is an
/// object, otherwise from top-level `steps`/`risks`. Missing confidence is
/// 0.0; missing or empty sources default to the first `top_k` retrieved ids.
pub fn parse_plan(raw: &str, retrieved: &[ChunkId], top_k: usize) -> PlanOutcome {
    let obj = match parse_object(raw) {
        Ok(obj) => obj,
        Err(reason) => {
            return PlanOutcome::Fallback {
                plan: fallback_plan(retrieved, top_k),
                reason,
            }
        }
    };

    let body = match obj.get("plan") {
        Some(Value::Object(inner)) => inner,
        _ => &obj,
    };
    let mut sources = source_ids(obj.get("sources"));
    if sources.is_empty() {
        sources = retrieved.iter().take(top_k).copied().collect();
    }

    PlanOutcome::Parsed(Plan::new(
        string_list(body.get("steps")),
        string_list(body.get("risks")),
        confidence(obj.get("confidence")),
        sources,
    ))
}

pub fn parse_classification(raw: &str) -> ClassificationOutcome {
    let obj = match parse_object(raw) {
        Ok(obj) => obj,
        Err(reason) => {
            return ClassificationOutcome::Fallback {
                classification: Classification::default(),
                reason,
            }
        }
    };
    let defaults = Classification::default();
    let category = obj
        .get("category")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or(defaults.category);
    let severity = obj
        .get("severity")
        .and_then(Value::as_str)
        .and_then(Severity::parse)
        .unwrap_or(defaults.severity);

    ClassificationOutcome::Parsed(Classification {
        category,
        severity,
        tags: string_list(obj.get("tags")),
    })
}

/// Ask the planner for a plan over `hits`.
///
/// Only transport failures are errors; malformed output is a fallback.
pub async fn build_plan(
    planner: &dyn Planner,
    incident_text: &str,
    hits: &[SearchHit],
    opts: &PlanOptions,
) -> anyhow::Result<PlanOutcome> {
    let prompt = plan_prompt(incident_text, hits, opts.snippet_chars);
    let raw = planner.complete(PLAN_SYSTEM, &prompt).await?;
    let retrieved: Vec<ChunkId> = hits.iter().map(|h| h.chunk_id).collect();
    Ok(parse_plan(&raw, &retrieved, opts.top_k))
}

/// Classify an incident. Never fails: a planner error also falls back.
pub async fn classify(planner: &dyn Planner, incident_text: &str, previews: &[Preview]) -> ClassificationOutcome {
    let prompt = classification_prompt(incident_text, previews);
    match planner.complete(CLASSIFY_SYSTEM, &prompt).await {
        Ok(raw) => parse_classification(&raw),
        Err(e) => ClassificationOutcome::Fallback {
            classification: Classification::default(),
            reason: format!("classifier call failed: {e:#}"),
        },
    }
}
