//! Storage abstraction for Incident Harness.
//!
//! The [`Store`] trait covers the chunk store read by hybrid search and the
//! incident/run audit log written by the pipeline, enabling pluggable
//! backends (SQLite in the application crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ChunkId, ChunkMetadata, DocumentId, Incident, IncidentId, NewChunk, NewIncident, NewRun, Run,
    RunId, RunQuery,
};

/// A nearest-neighbour candidate returned from [`Store::nearest_chunks`].
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine distance to the query vector.
    pub distance: f64,
}

/// A run joined with the incident it belongs to.
#[derive(Debug, Clone)]
pub struct RunWithIncident {
    pub run: Run,
    pub incident: Incident,
}

/// Abstract storage backend.
///
/// Chunks and embeddings are written by ingestion and only read by the
/// pipeline. Incidents and runs are append-only: no operation updates or
/// deletes them.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document`](Store::insert_document) | Register a source document |
/// | [`insert_chunk`](Store::insert_chunk) | Insert a chunk with metadata |
/// | [`upsert_embedding`](Store::upsert_embedding) | Store a chunk's vector (last write wins) |
/// | [`nearest_chunks`](Store::nearest_chunks) | Unfiltered KNN buffer, ascending distance |
/// | [`insert_incident`](Store::insert_incident) | Record an incident |
/// | [`insert_run`](Store::insert_run) | Append a run |
/// | [`get_run`](Store::get_run) | Fetch one run |
/// | [`list_runs`](Store::list_runs) | Page runs, most recent first |
/// | [`get_run_with_incident`](Store::get_run_with_incident) | Run plus its incident, for replay |
#[async_trait]
pub trait Store: Send + Sync {
    /// The fixed vector dimension this store accepts.
    fn dims(&self) -> usize;

    async fn insert_document(&self, title: &str, source: &str) -> Result<DocumentId>;

    async fn insert_chunk(&self, chunk: &NewChunk) -> Result<ChunkId>;

    /// Fails with `DimensionMismatch` when `vector.len() != dims()`.
    async fn upsert_embedding(&self, chunk_id: ChunkId, vector: &[f32]) -> Result<()>;

    /// The `limit` chunks closest to `query_vec`, ignoring any filter.
    ///
    /// Stored vectors of the wrong dimension are skipped.
    async fn nearest_chunks(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>>;

    async fn insert_incident(&self, incident: &NewIncident) -> Result<IncidentId>;

    async fn get_incident(&self, id: IncidentId) -> Result<Option<Incident>>;

    async fn insert_run(&self, run: &NewRun) -> Result<RunId>;

    async fn get_run(&self, id: RunId) -> Result<Option<Run>>;

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>>;

    async fn get_run_with_incident(&self, id: RunId) -> Result<Option<RunWithIncident>>;
}

/// Sort candidates by ascending distance, breaking ties by chunk id.
/// Uses a total order, so a stray NaN sorts last instead of scrambling
/// the ranking.
pub fn sort_by_distance(candidates: &mut [ChunkCandidate]) {
    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
}
