//! Traits for the external services the pipeline consumes.
//!
//! Every collaborator is injected into the pipeline as an `Arc<dyn Trait>`,
//! so the application can wire HTTP clients while tests wire doubles.
//!
//! | Trait | Failure semantics |
//! |-------|-------------------|
//! | [`Embedder`] | Errors abort the request |
//! | [`Planner`] | Transport errors abort; unparsable output falls back |
//! | [`Notifier`] | Never fails; `None` means no confirmation |
//! | [`TicketTracker`] | Never fails; `ok: false` carries the reason |
//! | [`TextExtractor`] | Errors abort; empty text short-circuits |
//! | [`StatusEnricher`] | Never fails; `None` means nothing to attach |

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Plan;

/// Turns text into vectors in the single configured embedding space.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A chat-completion style model. Used for both plan generation and
/// incident classification; the output is untrusted text.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Posts a plan to a chat channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns the posted message id, or `None` when the post was not confirmed.
    async fn post(&self, incident_text: &str, plan: &Plan) -> Option<String>;
}

/// Result of a ticket creation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TicketOutcome {
    pub fn created(key: Option<String>, id: Option<String>) -> Self {
        Self {
            ok: true,
            key,
            id,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            key: None,
            id: None,
            reason: Some(reason.into()),
        }
    }

    pub fn not_configured() -> Self {
        Self::failed("not_configured")
    }
}

#[async_trait]
pub trait TicketTracker: Send + Sync {
    async fn create_ticket(&self, summary: &str, description: &str) -> TicketOutcome;
}

/// Tracker used when no ticketing backend is configured.
pub struct DisabledTracker;

#[async_trait]
impl TicketTracker for DisabledTracker {
    async fn create_ticket(&self, _summary: &str, _description: &str) -> TicketOutcome {
        TicketOutcome::not_configured()
    }
}

/// Notifier used when no chat backend is configured.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn post(&self, _incident_text: &str, _plan: &Plan) -> Option<String> {
        None
    }
}

/// OCR for uploaded images.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Plain text, or an empty string when nothing was recognised.
    async fn extract(&self, image: &[u8]) -> Result<String>;
}

/// Fetches a small operational status blob to attach to plans.
#[async_trait]
pub trait StatusEnricher: Send + Sync {
    async fn fetch_status(&self) -> Option<Value>;
}
