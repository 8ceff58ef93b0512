//! Hybrid search: vector KNN followed by a metadata/keyword post-filter.
//!
//! The algorithm operates entirely through the [`Store`] trait. The caller
//! embeds the query and passes the vector in.
//!
//! # Algorithm
//!
//! 1. Fetch the `max(top_k, knn_buffer)` nearest chunks, ignoring filters.
//! 2. Keep only candidates matching every filter: `service`, `error_code`
//!    and `env` by case-insensitive equality on metadata, `keyword` by
//!    case-insensitive substring on the chunk text.
//! 3. Sort survivors by ascending distance and truncate to `top_k`.
//!
//! Filtering happens inside the buffer only, so a selective filter can
//! return fewer than `top_k` hits even when more matching chunks exist
//! further away. Results are never padded.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::embedding::check_dims;
use crate::error::{Error, Result};
use crate::models::{ChunkMetadata, SearchHit};
use crate::store::{sort_by_distance, ChunkCandidate, Store};

/// Smallest KNN buffer fetched before filtering.
pub const DEFAULT_KNN_BUFFER: usize = 50;

/// Cleaned search filters. Values are trimmed and lower-cased; blank values
/// are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn clean(value: Option<&str>) -> Option<String> {
    value.map(normalize).filter(|v| !v.is_empty())
}

impl SearchFilters {
    pub fn new(
        service: Option<&str>,
        error_code: Option<&str>,
        env: Option<&str>,
        keyword: Option<&str>,
    ) -> Self {
        Self {
            service: clean(service),
            error_code: clean(error_code),
            env: clean(env),
            keyword: clean(keyword),
        }
    }

    /// Build from an untyped map. Unknown keys are ignored.
    pub fn from_map(raw: &HashMap<String, String>) -> Self {
        let get = |key: &str| raw.get(key).map(String::as_str);
        Self::new(get("service"), get("error_code"), get("env"), get("keyword"))
    }

    /// Re-apply normalization, e.g. after deserializing from a request.
    pub fn cleaned(&self) -> Self {
        Self::new(
            self.service.as_deref(),
            self.error_code.as_deref(),
            self.env.as_deref(),
            self.keyword.as_deref(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.service.is_none()
            && self.error_code.is_none()
            && self.env.is_none()
            && self.keyword.is_none()
    }

    /// Filters must already be cleaned.
    pub fn matches(&self, text: &str, metadata: &ChunkMetadata) -> bool {
        fn field_matches(want: &Option<String>, have: &Option<String>) -> bool {
            match want {
                None => true,
                Some(want) => have.as_deref().map(normalize).as_deref() == Some(want.as_str()),
            }
        }

        field_matches(&self.service, &metadata.service)
            && field_matches(&self.error_code, &metadata.error_code)
            && field_matches(&self.env, &metadata.env)
            && self
                .keyword
                .as_ref()
                .map_or(true, |kw| text.to_lowercase().contains(kw.as_str()))
    }
}

/// Inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    /// Pre-computed query embedding.
    pub query_vec: &'a [f32],
    /// Maximum hits to return, at least 1.
    pub top_k: usize,
    pub filters: &'a SearchFilters,
    /// Lower bound on the KNN buffer size.
    pub knn_buffer: usize,
}

pub fn buffer_size(top_k: usize, knn_buffer: usize) -> usize {
    top_k.max(knn_buffer)
}

/// Run a hybrid search against a [`Store`] backend.
///
/// Fails with `DimensionMismatch` when the query vector does not match the
/// store's dimension and `InvalidRequest` when `top_k` is zero. An empty
/// corpus yields an empty result.
pub async fn search<S: Store + ?Sized>(store: &S, req: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
    check_dims(req.query_vec, store.dims())?;
    if req.top_k == 0 {
        return Err(Error::invalid("top_k must be >= 1"));
    }

    let filters = req.filters.cleaned();
    let buffer = store
        .nearest_chunks(req.query_vec, buffer_size(req.top_k, req.knn_buffer))
        .await?;

    let mut survivors: Vec<ChunkCandidate> = buffer
        .into_iter()
        .filter(|c| filters.matches(&c.text, &c.metadata))
        .collect();
    sort_by_distance(&mut survivors);
    survivors.truncate(req.top_k);

    Ok(survivors
        .into_iter()
        .map(|c| SearchHit {
            chunk_id: c.chunk_id,
            text: c.text,
            metadata: c.metadata,
            score: c.distance,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkId, NewChunk};
    use crate::store::memory::InMemoryStore;

    async fn add(store: &InMemoryStore, text: &str, meta: ChunkMetadata, vec: [f32; 3]) -> ChunkId {
        let doc = store.insert_document(text, "test").await.unwrap();
        let id = store
            .insert_chunk(&NewChunk {
                document_id: doc,
                text: text.to_string(),
                metadata: meta,
            })
            .await
            .unwrap();
        store.upsert_embedding(id, &vec).await.unwrap();
        id
    }

    fn svc(service: &str) -> ChunkMetadata {
        ChunkMetadata::default().with("service", service)
    }

    async fn run(
        store: &InMemoryStore,
        query: [f32; 3],
        top_k: usize,
        filters: SearchFilters,
        knn_buffer: usize,
    ) -> Vec<SearchHit> {
        search(
            store,
            &SearchRequest {
                query_vec: &query,
                top_k,
                filters: &filters,
                knn_buffer,
            },
        )
        .await
        .unwrap()
    }

    #[test]
    fn filters_are_cleaned() {
        let mut raw = HashMap::new();
        raw.insert("service".to_string(), "  Auth ".to_string());
        raw.insert("env".to_string(), "   ".to_string());
        raw.insert("region".to_string(), "eu".to_string());
        let f = SearchFilters::from_map(&raw);
        assert_eq!(f.service.as_deref(), Some("auth"));
        assert_eq!(f.env, None);
        assert_eq!(f.error_code, None);
        assert!(!f.is_empty());
        assert!(SearchFilters::new(Some(""), None, Some(" "), None).is_empty());
    }

    #[test]
    fn keyword_is_case_insensitive_substring() {
        let f = SearchFilters::new(None, None, None, Some("TimeOut"));
        assert!(f.matches("Login TIMEOUT after 30s", &ChunkMetadata::default()));
        assert!(!f.matches("login failed", &ChunkMetadata::default()));
    }

    #[test]
    fn missing_metadata_never_matches_a_filter() {
        let f = SearchFilters::new(Some("auth"), None, None, None);
        assert!(!f.matches("anything", &ChunkMetadata::default()));
        assert!(f.matches("anything", &svc("AUTH")));
    }

    #[tokio::test]
    async fn empty_corpus_is_empty_result() {
        let store = InMemoryStore::new(3);
        let hits = run(&store, [1.0, 0.0, 0.0], 5, SearchFilters::default(), 50).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn rejects_wrong_query_dimension() {
        let store = InMemoryStore::new(3);
        let filters = SearchFilters::default();
        let err = search(
            &store,
            &SearchRequest {
                query_vec: &[1.0, 0.0],
                top_k: 5,
                filters: &filters,
                knn_buffer: 50,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[tokio::test]
    async fn results_sorted_and_bounded_by_top_k() {
        let store = InMemoryStore::new(3);
        for i in 0..10 {
            let angle = i as f32 * 0.1;
            add(&store, &format!("chunk {i}"), svc("auth"), [angle.cos(), angle.sin(), 0.0]).await;
        }
        for top_k in 1..=12 {
            let hits = run(&store, [1.0, 0.0, 0.0], top_k, SearchFilters::default(), 50).await;
            assert_eq!(hits.len(), top_k.min(10));
            assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
        }
    }

    #[tokio::test]
    async fn service_filter_excludes_other_services() {
        let store = InMemoryStore::new(3);
        let near_auth = add(&store, "auth token expired", svc("auth"), [1.0, 0.1, 0.0]).await;
        let billing = add(&store, "invoice failed", svc("billing"), [1.0, 0.0, 0.0]).await;
        let far_auth = add(&store, "auth login loop", svc("Auth"), [0.2, 1.0, 0.0]).await;

        let filters = SearchFilters::new(Some("auth"), None, None, None);
        let hits = run(&store, [1.0, 0.0, 0.0], 5, filters, 50).await;
        let ids: Vec<ChunkId> = hits.iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec![near_auth, far_auth]);
        assert!(!ids.contains(&billing));
    }

    #[tokio::test]
    async fn all_filters_must_hold() {
        let store = InMemoryStore::new(3);
        let meta = |env: &str, code: &str| svc("auth").with("env", env).with("error_code", code);
        let want = add(&store, "Login timeout on prod", meta("prod", "AUTH-500"), [1.0, 0.0, 0.0]).await;
        add(&store, "Login timeout on staging", meta("staging", "AUTH-500"), [1.0, 0.0, 0.0]).await;
        add(&store, "Password reset on prod", meta("prod", "AUTH-500"), [1.0, 0.0, 0.0]).await;
        add(&store, "Login timeout on prod", meta("prod", "AUTH-401"), [1.0, 0.0, 0.0]).await;

        let filters = SearchFilters::new(Some("AUTH"), Some("auth-500"), Some("Prod"), Some("timeout"));
        let hits = run(&store, [1.0, 0.0, 0.0], 5, filters.clone(), 50).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, want);
        assert!(hits.iter().all(|h| filters.matches(&h.text, &h.metadata)));
    }

    #[tokio::test]
    async fn filters_only_see_the_knn_buffer() {
        let store = InMemoryStore::new(3);
        // Three close billing chunks fill a buffer of 3; the auth chunk is
        // the furthest and never reaches the filter.
        for i in 0..3 {
            add(&store, &format!("billing {i}"), svc("billing"), [1.0, 0.01 * i as f32, 0.0]).await;
        }
        add(&store, "auth far away", svc("auth"), [0.0, 0.0, 1.0]).await;

        let filters = SearchFilters::new(Some("auth"), None, None, None);
        let starved = run(&store, [1.0, 0.0, 0.0], 3, filters.clone(), 3).await;
        assert!(starved.is_empty());

        let wider = run(&store, [1.0, 0.0, 0.0], 3, filters, 50).await;
        assert_eq!(wider.len(), 1);
    }

    #[tokio::test]
    async fn fewer_matches_than_top_k_is_not_padded() {
        let store = InMemoryStore::new(3);
        add(&store, "auth", svc("auth"), [1.0, 0.0, 0.0]).await;
        add(&store, "billing", svc("billing"), [0.9, 0.1, 0.0]).await;
        let filters = SearchFilters::new(Some("auth"), None, None, None);
        let hits = run(&store, [1.0, 0.0, 0.0], 5, filters, 50).await;
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn buffer_is_at_least_top_k() {
        assert_eq!(buffer_size(5, 50), 50);
        assert_eq!(buffer_size(80, 50), 80);
    }
}
