//! Core data models for Incident Harness.
//!
//! These types represent the chunks, search hits, plans, incidents, and runs
//! that flow through the retrieval-and-routing pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

pub type ChunkId = i64;
pub type DocumentId = i64;
pub type IncidentId = i64;
pub type RunId = i64;

/// Longest chunk text accepted at the ingestion boundary, in characters.
pub const MAX_CHUNK_CHARS: usize = 8192;

/// Structured chunk metadata.
///
/// The known keys are typed fields; anything else is kept in `extra` so new
/// ingestion sources can attach metadata without a schema change. Scalar
/// values of known keys are normalized to strings on the way in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChunkMetadata {
    /// Parse stored metadata JSON. Anything that is not a JSON object
    /// yields empty metadata.
    pub fn from_json_str(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Self::from(map),
            _ => Self::default(),
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        let slot = match key {
            "service" => &mut self.service,
            "error_code" => &mut self.error_code,
            "env" => &mut self.env,
            "version" => &mut self.version,
            "component" => &mut self.component,
            "type" => &mut self.kind,
            other => {
                self.extra
                    .insert(other.to_string(), Value::String(value.to_string()));
                return self;
            }
        };
        *slot = Some(value.to_string());
        self
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

impl From<Map<String, Value>> for ChunkMetadata {
    fn from(mut map: Map<String, Value>) -> Self {
        let mut take = |key: &str| map.remove(key).and_then(scalar_to_string);
        let service = take("service");
        let error_code = take("error_code");
        let env = take("env");
        let version = take("version");
        let component = take("component");
        let kind = take("type");
        Self {
            service,
            error_code,
            env,
            version,
            component,
            kind,
            extra: map.into_iter().collect(),
        }
    }
}

/// A chunk as handed to the store at ingestion time.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub document_id: DocumentId,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl NewChunk {
    pub fn validate(&self) -> Result<(), Error> {
        let len = self.text.chars().count();
        if len > MAX_CHUNK_CHARS {
            return Err(Error::invalid(format!(
                "chunk text is {len} characters, limit is {MAX_CHUNK_CHARS}"
            )));
        }
        Ok(())
    }
}

/// A stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// One ranked retrieval result. `score` is cosine distance: lower is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
}

/// Short hit summary shown to humans and fed to the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub id: ChunkId,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub snippet: String,
}

impl Preview {
    pub fn from_hit(hit: &SearchHit, max_chars: usize) -> Self {
        Self {
            id: hit.chunk_id,
            service: hit.metadata.service.clone().unwrap_or_default(),
            error_code: hit.metadata.error_code.clone().unwrap_or_default(),
            snippet: truncate_chars(&hit.text, max_chars),
        }
    }
}

/// The three routing outcomes, ordered by seriousness of the consequence
/// (`Discard` < `NeedsHuman` < `AutoFix`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Discard,
    NeedsHuman,
    AutoFix,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::Discard => "discard",
            NextAction::NeedsHuman => "needs_human",
            NextAction::AutoFix => "auto_fix",
        }
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

/// Incident classification produced by the second planner call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub severity: Severity,
    pub tags: Vec<String>,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            category: "general".to_string(),
            severity: Severity::Medium,
            tags: Vec::new(),
        }
    }
}

/// A remediation plan plus the routing-derived fields the pipeline adds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<ChunkId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<NextAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_approval: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub previews: Vec<Preview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<Value>,
}

impl Plan {
    pub fn new(steps: Vec<String>, risks: Vec<String>, confidence: f64, sources: Vec<ChunkId>) -> Self {
        Self {
            steps,
            risks,
            confidence,
            sources,
            next_action: None,
            needs_approval: None,
            category: None,
            severity: None,
            tags: Vec::new(),
            previews: Vec::new(),
            enrichment: None,
        }
    }

    pub fn apply_classification(&mut self, classification: Classification) {
        self.category = Some(classification.category);
        self.severity = Some(classification.severity);
        self.tags = classification.tags;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub id: IncidentId,
    pub source: String,
    pub raw_input: String,
    pub extracted_text: String,
    pub created_at: i64,
}

impl Incident {
    /// Text the pipeline should work from: extracted text when it has
    /// content, otherwise the raw input.
    pub fn working_text(&self) -> &str {
        let extracted = self.extracted_text.trim();
        if extracted.is_empty() {
            &self.raw_input
        } else {
            extracted
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewIncident {
    pub source: String,
    pub raw_input: String,
    pub extracted_text: String,
}

/// Notification outcome recorded on a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatus {
    /// Confidence below `conf_min`; the notifier was never called.
    SkippedLowConf,
    /// Confidence passed the gate but no notification was requested.
    NotRequested,
    Posted,
    PostFailed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::SkippedLowConf => "skipped_low_conf",
            NotificationStatus::NotRequested => "not_requested",
            NotificationStatus::Posted => "posted",
            NotificationStatus::PostFailed => "post_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Created,
    Skipped,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Created => "jira_ok",
            TicketStatus::Skipped => "jira_skip",
        }
    }
}

/// `action_status` column: notification outcome with an optional ticket
/// suffix, rendered as e.g. `posted; jira_ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionStatus {
    pub notification: NotificationStatus,
    pub ticket: Option<TicketStatus>,
}

impl ActionStatus {
    pub fn new(notification: NotificationStatus) -> Self {
        Self {
            notification,
            ticket: None,
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.notification.as_str())?;
        if let Some(ticket) = self.ticket {
            write!(f, "; {}", ticket.as_str())?;
        }
        Ok(())
    }
}

impl FromStr for ActionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';').map(str::trim);
        let notification = match parts.next().unwrap_or_default() {
            "skipped_low_conf" => NotificationStatus::SkippedLowConf,
            "not_requested" => NotificationStatus::NotRequested,
            "posted" => NotificationStatus::Posted,
            "post_failed" => NotificationStatus::PostFailed,
            other => return Err(Error::invalid(format!("unknown action status: {other}"))),
        };
        let ticket = match parts.next() {
            None => None,
            Some("jira_ok") => Some(TicketStatus::Created),
            Some("jira_skip") => Some(TicketStatus::Skipped),
            Some(other) => return Err(Error::invalid(format!("unknown ticket status: {other}"))),
        };
        Ok(Self {
            notification,
            ticket,
        })
    }
}

impl Serialize for ActionStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActionStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Append-only audit record of one retrieval + planning + routing pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    pub id: RunId,
    pub incident_id: IncidentId,
    pub retrieved_ids: Vec<ChunkId>,
    pub plan: Plan,
    pub final_summary: String,
    pub action_status: ActionStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub incident_id: IncidentId,
    pub retrieved_ids: Vec<ChunkId>,
    pub plan: Plan,
    pub final_summary: String,
    pub action_status: ActionStatus,
}

/// Paging and filtering for the run listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunQuery {
    pub limit: i64,
    pub offset: i64,
    pub incident_id: Option<IncidentId>,
}

impl RunQuery {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 200;

    pub fn new(limit: Option<i64>, offset: Option<i64>, incident_id: Option<IncidentId>) -> Result<Self, Error> {
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT);
        let offset = offset.unwrap_or(0);
        if !(1..=Self::MAX_LIMIT).contains(&limit) {
            return Err(Error::invalid(format!(
                "limit must be between 1 and {}",
                Self::MAX_LIMIT
            )));
        }
        if offset < 0 {
            return Err(Error::invalid("offset must be >= 0"));
        }
        Ok(Self {
            limit,
            offset,
            incident_id,
        })
    }
}

impl Default for RunQuery {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
            incident_id: None,
        }
    }
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Format a Unix timestamp as ISO 8601.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
