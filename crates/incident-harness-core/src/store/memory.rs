//! In-memory [`Store`] implementation for tests and embedding in other
//! runtimes.
//!
//! Uses `Vec`/`HashMap` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine distance over all stored vectors.
//! Ids are assigned from per-table counters starting at 1.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::{check_dims, cosine_distance};
use crate::error::Error;
use crate::models::{
    Chunk, ChunkId, DocumentId, Incident, IncidentId, NewChunk, NewIncident, NewRun, Run, RunId,
    RunQuery,
};

use super::{sort_by_distance, ChunkCandidate, RunWithIncident, Store};

#[derive(Default)]
struct Tables {
    documents: Vec<(DocumentId, String, String)>,
    chunks: Vec<Chunk>,
    vectors: HashMap<ChunkId, Vec<f32>>,
    incidents: Vec<Incident>,
    runs: Vec<Run>,
}

/// In-memory store.
pub struct InMemoryStore {
    dims: usize,
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    /// Number of stored incidents.
    pub fn incident_count(&self) -> usize {
        self.read().map(|t| t.incidents.len()).unwrap_or(0)
    }

    /// Number of stored runs.
    pub fn run_count(&self) -> usize {
        self.read().map(|t| t.runs.len()).unwrap_or(0)
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn next_id(len: usize) -> i64 {
    len as i64 + 1
}

#[async_trait]
impl Store for InMemoryStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn insert_document(&self, title: &str, source: &str) -> Result<DocumentId> {
        let mut tables = self.write()?;
        let id = next_id(tables.documents.len());
        tables
            .documents
            .push((id, title.to_string(), source.to_string()));
        Ok(id)
    }

    async fn insert_chunk(&self, chunk: &NewChunk) -> Result<ChunkId> {
        chunk.validate()?;
        let mut tables = self.write()?;
        if !tables.documents.iter().any(|(id, _, _)| *id == chunk.document_id) {
            return Err(Error::not_found(format!("document {}", chunk.document_id)).into());
        }
        let id = next_id(tables.chunks.len());
        tables.chunks.push(Chunk {
            id,
            document_id: chunk.document_id,
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
        });
        Ok(id)
    }

    async fn upsert_embedding(&self, chunk_id: ChunkId, vector: &[f32]) -> Result<()> {
        check_dims(vector, self.dims)?;
        let mut tables = self.write()?;
        if !tables.chunks.iter().any(|c| c.id == chunk_id) {
            return Err(Error::not_found(format!("chunk {chunk_id}")).into());
        }
        tables.vectors.insert(chunk_id, vector.to_vec());
        Ok(())
    }

    async fn nearest_chunks(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>> {
        let tables = self.read()?;
        let mut candidates: Vec<ChunkCandidate> = tables
            .chunks
            .iter()
            .filter_map(|chunk| {
                let vector = tables.vectors.get(&chunk.id)?;
                if vector.len() != self.dims {
                    return None;
                }
                Some(ChunkCandidate {
                    chunk_id: chunk.id,
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                    distance: cosine_distance(query_vec, vector),
                })
            })
            .collect();
        sort_by_distance(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn insert_incident(&self, incident: &NewIncident) -> Result<IncidentId> {
        let mut tables = self.write()?;
        let id = next_id(tables.incidents.len());
        tables.incidents.push(Incident {
            id,
            source: incident.source.clone(),
            raw_input: incident.raw_input.clone(),
            extracted_text: incident.extracted_text.clone(),
            created_at: now_ts(),
        });
        Ok(id)
    }

    async fn get_incident(&self, id: IncidentId) -> Result<Option<Incident>> {
        let tables = self.read()?;
        Ok(tables.incidents.iter().find(|i| i.id == id).cloned())
    }

    async fn insert_run(&self, run: &NewRun) -> Result<RunId> {
        let mut tables = self.write()?;
        if !tables.incidents.iter().any(|i| i.id == run.incident_id) {
            return Err(Error::not_found(format!("incident {}", run.incident_id)).into());
        }
        let id = next_id(tables.runs.len());
        tables.runs.push(Run {
            id,
            incident_id: run.incident_id,
            retrieved_ids: run.retrieved_ids.clone(),
            plan: run.plan.clone(),
            final_summary: run.final_summary.clone(),
            action_status: run.action_status,
            created_at: now_ts(),
        });
        Ok(id)
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>> {
        let tables = self.read()?;
        Ok(tables.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>> {
        let tables = self.read()?;
        let mut runs: Vec<&Run> = tables
            .runs
            .iter()
            .filter(|r| query.incident_id.map_or(true, |id| r.incident_id == id))
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(runs
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_run_with_incident(&self, id: RunId) -> Result<Option<RunWithIncident>> {
        let tables = self.read()?;
        let Some(run) = tables.runs.iter().find(|r| r.id == id) else {
            return Ok(None);
        };
        Ok(tables
            .incidents
            .iter()
            .find(|i| i.id == run.incident_id)
            .map(|incident| RunWithIncident {
                run: run.clone(),
                incident: incident.clone(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionStatus, ChunkMetadata, NotificationStatus, Plan};

    async fn store_with_chunk() -> (InMemoryStore, ChunkId) {
        let store = InMemoryStore::new(3);
        let doc = store.insert_document("ticket 1", "ticket:1").await.unwrap();
        let chunk = store
            .insert_chunk(&NewChunk {
                document_id: doc,
                text: "login timeout".into(),
                metadata: ChunkMetadata::default().with("service", "auth"),
            })
            .await
            .unwrap();
        (store, chunk)
    }

    fn new_run(incident_id: IncidentId, steps: &[&str]) -> NewRun {
        NewRun {
            incident_id,
            retrieved_ids: vec![1],
            plan: Plan::new(
                steps.iter().map(|s| s.to_string()).collect(),
                vec![],
                0.5,
                vec![1],
            ),
            final_summary: steps.join("; "),
            action_status: ActionStatus::new(NotificationStatus::NotRequested),
        }
    }

    async fn incident(store: &InMemoryStore) -> IncidentId {
        store
            .insert_incident(&NewIncident {
                source: "api".into(),
                raw_input: "AUTH-500".into(),
                extracted_text: String::new(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let (store, chunk) = store_with_chunk().await;
        let err = store.upsert_embedding(chunk, &[1.0, 0.0]).await.unwrap_err();
        assert!(matches!(
            Error::from(err),
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn reembedding_is_last_write_wins() {
        let (store, chunk) = store_with_chunk().await;
        store.upsert_embedding(chunk, &[1.0, 0.0, 0.0]).await.unwrap();
        store.upsert_embedding(chunk, &[0.0, 1.0, 0.0]).await.unwrap();
        let hits = store.nearest_chunks(&[0.0, 1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn chunks_without_vectors_are_not_candidates() {
        let (store, _) = store_with_chunk().await;
        assert!(store.nearest_chunks(&[1.0, 0.0, 0.0], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_chunk_rejected() {
        let store = InMemoryStore::new(3);
        let doc = store.insert_document("big", "pdf").await.unwrap();
        let err = store
            .insert_chunk(&NewChunk {
                document_id: doc,
                text: "x".repeat(crate::models::MAX_CHUNK_CHARS + 1),
                metadata: ChunkMetadata::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(Error::from(err), Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn runs_are_listed_newest_first_and_paged() {
        let store = InMemoryStore::new(3);
        let a = incident(&store).await;
        let b = incident(&store).await;
        let r1 = store.insert_run(&new_run(a, &["one"])).await.unwrap();
        let r2 = store.insert_run(&new_run(b, &["two"])).await.unwrap();
        let r3 = store.insert_run(&new_run(a, &["three"])).await.unwrap();

        let all = store.list_runs(&RunQuery::default()).await.unwrap();
        let ids: Vec<RunId> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![r3, r2, r1]);

        let only_a = store
            .list_runs(&RunQuery::new(None, None, Some(a)).unwrap())
            .await
            .unwrap();
        assert_eq!(only_a.iter().map(|r| r.id).collect::<Vec<_>>(), vec![r3, r1]);

        let page = store
            .list_runs(&RunQuery::new(Some(1), Some(1), None).unwrap())
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, r2);
    }

    #[tokio::test]
    async fn run_requires_existing_incident() {
        let store = InMemoryStore::new(3);
        let err = store.insert_run(&new_run(42, &["x"])).await.unwrap_err();
        assert!(matches!(Error::from(err), Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn run_with_incident_joins() {
        let store = InMemoryStore::new(3);
        let inc = incident(&store).await;
        let run = store.insert_run(&new_run(inc, &["restart"])).await.unwrap();
        let joined = store.get_run_with_incident(run).await.unwrap().unwrap();
        assert_eq!(joined.incident.id, inc);
        assert_eq!(joined.run.plan.steps, vec!["restart".to_string()]);
        assert!(store.get_run_with_incident(run + 1).await.unwrap().is_none());
    }
}
