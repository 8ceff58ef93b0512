//! SQLite-backed [`Store`] implementation.
//!
//! Every write is a single statement, so a failed request never leaves a
//! half-written row behind. Vector search scans the `embeddings` table and
//! ranks by cosine distance in process; Hybrid Search applies its filters
//! to the buffer this returns.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use incident_harness_core::embedding::{blob_to_vec, check_dims, cosine_distance, vec_to_blob};
use incident_harness_core::models::{
    ActionStatus, ChunkId, ChunkMetadata, DocumentId, Incident, IncidentId, NewChunk, NewIncident,
    NewRun, Plan, Run, RunId, RunQuery,
};
use incident_harness_core::store::{sort_by_distance, ChunkCandidate, RunWithIncident, Store};
use incident_harness_core::Error;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn exists(&self, sql: &str, id: i64) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

const RUN_COLUMNS: &str =
    "id, incident_id, retrieved_ids, plan, final_summary, action_status, created_at";

fn row_to_run(row: &SqliteRow) -> Result<Run> {
    let id: RunId = row.get("id");
    let retrieved_json: String = row.get("retrieved_ids");
    let plan_json: String = row.get("plan");
    let action_status: String = row.get("action_status");

    let retrieved_ids: Vec<ChunkId> = serde_json::from_str(&retrieved_json)
        .with_context(|| format!("run {id}: malformed retrieved_ids"))?;
    let plan: Plan =
        serde_json::from_str(&plan_json).with_context(|| format!("run {id}: malformed plan"))?;
    let action_status: ActionStatus = action_status
        .parse()
        .map_err(|e: Error| anyhow::anyhow!("run {id}: {e}"))?;

    Ok(Run {
        id,
        incident_id: row.get("incident_id"),
        retrieved_ids,
        plan,
        final_summary: row.get("final_summary"),
        action_status,
        created_at: row.get("created_at"),
    })
}

fn row_to_incident(row: &SqliteRow) -> Incident {
    Incident {
        id: row.get("id"),
        source: row.get("source"),
        raw_input: row.get("raw_input"),
        extracted_text: row.get("extracted_text"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn insert_document(&self, title: &str, source: &str) -> Result<DocumentId> {
        let result =
            sqlx::query("INSERT INTO documents (title, source, created_at) VALUES (?, ?, ?)")
                .bind(title)
                .bind(source)
                .bind(now_ts())
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_chunk(&self, chunk: &NewChunk) -> Result<ChunkId> {
        chunk.validate()?;
        if !self
            .exists("SELECT id FROM documents WHERE id = ?", chunk.document_id)
            .await?
        {
            return Err(Error::not_found(format!("document {}", chunk.document_id)).into());
        }
        let result =
            sqlx::query("INSERT INTO chunks (document_id, text, metadata_json) VALUES (?, ?, ?)")
                .bind(chunk.document_id)
                .bind(&chunk.text)
                .bind(chunk.metadata.to_json_string())
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    async fn upsert_embedding(&self, chunk_id: ChunkId, vector: &[f32]) -> Result<()> {
        check_dims(vector, self.dims)?;
        if !self
            .exists("SELECT id FROM chunks WHERE id = ?", chunk_id)
            .await?
        {
            return Err(Error::not_found(format!("chunk {chunk_id}")).into());
        }

        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, dims, embedding, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                dims = excluded.dims,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chunk_id)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .bind(now_ts())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn nearest_chunks(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT e.chunk_id, e.embedding, c.text, c.metadata_json
            FROM embeddings e
            JOIN chunks c ON c.id = e.chunk_id
            WHERE e.dims = ?
            "#,
        )
        .bind(self.dims as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                // `dims` column could disagree with a hand-edited blob.
                if vec.len() != self.dims {
                    return None;
                }
                let metadata_json: String = row.get("metadata_json");
                Some(ChunkCandidate {
                    chunk_id: row.get("chunk_id"),
                    text: row.get("text"),
                    metadata: ChunkMetadata::from_json_str(&metadata_json),
                    distance: cosine_distance(query_vec, &vec),
                })
            })
            .collect();

        sort_by_distance(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn insert_incident(&self, incident: &NewIncident) -> Result<IncidentId> {
        let result = sqlx::query(
            "INSERT INTO incidents (source, raw_input, extracted_text, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&incident.source)
        .bind(&incident.raw_input)
        .bind(&incident.extracted_text)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn get_incident(&self, id: IncidentId) -> Result<Option<Incident>> {
        let row = sqlx::query(
            "SELECT id, source, raw_input, extracted_text, created_at FROM incidents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_incident))
    }

    async fn insert_run(&self, run: &NewRun) -> Result<RunId> {
        if !self
            .exists("SELECT id FROM incidents WHERE id = ?", run.incident_id)
            .await?
        {
            return Err(Error::not_found(format!("incident {}", run.incident_id)).into());
        }

        let result = sqlx::query(
            r#"
            INSERT INTO runs (incident_id, retrieved_ids, plan, final_summary, action_status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.incident_id)
        .bind(serde_json::to_string(&run.retrieved_ids)?)
        .bind(serde_json::to_string(&run.plan)?)
        .bind(&run.final_summary)
        .bind(run.action_status.to_string())
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>> {
        let rows = match query.incident_id {
            Some(incident_id) => {
                sqlx::query(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs WHERE incident_id = ? \
                     ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
                ))
                .bind(incident_id)
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
                ))
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_run).collect()
    }

    async fn get_run_with_incident(&self, id: RunId) -> Result<Option<RunWithIncident>> {
        let Some(run) = self.get_run(id).await? else {
            return Ok(None);
        };
        Ok(self
            .get_incident(run.incident_id)
            .await?
            .map(|incident| RunWithIncident { run, incident }))
    }
}
