//! SQLite-backed vector store scoped by contract.
//!
//! Chunks are stored in the `chunks` table keyed by their deterministic
//! `chunk_id`, so re-ingesting a contract overwrites rather than duplicates.
//! Embeddings are little-endian `f32` BLOBs; similarity search loads the
//! candidate vectors and ranks them by cosine similarity in Rust.
//!
//! Embedding is best-effort at write time. When the provider fails, chunks
//! are still stored with a NULL embedding and counted as pending;
//! [`VectorStore::embed_pending`] fills them in later.

use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{ContractError, Result};
use crate::migrate;
use crate::models::{ContractChunk, SearchHit};

/// Outcome of a write that may embed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub stored: usize,
    pub embedded: usize,
    pub pending: usize,
}

#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

fn store_err(e: impl Display) -> ContractError {
    ContractError::VectorStore(e.to_string())
}

impl VectorStore {
    /// Open (and migrate) the store described by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        migrate::run_migrations(config).await.map_err(store_err)?;
        let pool = db::connect(config).await.map_err(store_err)?;
        let provider = embedding::create_provider(&config.embedding)
            .map_err(|e| ContractError::ModelLoading(e.to_string()))?;
        info!(
            db = %config.data.db_path().display(),
            model = provider.model_name(),
            "vector store ready"
        );
        Ok(Self::new(
            pool,
            Arc::from(provider),
            config.embedding.batch_size,
        ))
    }

    pub fn new(pool: SqlitePool, provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            pool,
            provider,
            batch_size: batch_size.max(1),
        }
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.provider.dims() > 0
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Store chunks, embedding them in batches when a provider is configured.
    pub async fn upsert_chunks(&self, chunks: &[ContractChunk]) -> Result<UpsertStats> {
        if chunks.is_empty() {
            debug!("no chunks to upsert");
            return Ok(UpsertStats::default());
        }

        let mut stats = UpsertStats::default();
        for batch in chunks.chunks(self.batch_size) {
            let vectors = self.embed_batch(batch).await;
            for (i, chunk) in batch.iter().enumerate() {
                let vector = vectors.as_ref().and_then(|v| v.get(i));
                self.upsert_one(chunk, vector.map(|v| v.as_slice())).await?;
                stats.stored += 1;
                if vector.is_some() {
                    stats.embedded += 1;
                } else {
                    stats.pending += 1;
                }
            }
        }

        info!(
            stored = stats.stored,
            embedded = stats.embedded,
            pending = stats.pending,
            "chunks upserted"
        );
        Ok(stats)
    }

    /// Embed one batch; `None` when embeddings are disabled or the call
    /// failed in any way.
    async fn embed_batch(&self, batch: &[ContractChunk]) -> Option<Vec<Vec<f32>>> {
        if !self.embeddings_enabled() {
            return None;
        }
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        match self.provider.embed(&texts).await {
            Ok(vectors) if vectors.len() == batch.len()
                && vectors.iter().all(|v| v.len() == self.provider.dims()) =>
            {
                Some(vectors)
            }
            Ok(vectors) => {
                warn!(
                    expected = batch.len(),
                    got = vectors.len(),
                    dims = self.provider.dims(),
                    "embedding response does not match the batch, storing without vectors"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, size = batch.len(), "embedding batch failed, storing without vectors");
                None
            }
        }
    }

    async fn upsert_one(&self, chunk: &ContractChunk, vector: Option<&[f32]>) -> Result<()> {
        let blob = vector.map(embedding::vec_to_blob);
        let (model, dims) = match vector {
            Some(_) => (
                Some(self.provider.model_name().to_string()),
                Some(self.provider.dims() as i64),
            ),
            None => (None, None),
        };

        // An unchanged text keeps its existing vector when this write has none.
        sqlx::query(
            r#"
            INSERT INTO chunks (chunk_id, contract_id, page_number, section, start_index,
                                text, text_hash, embedding, model, dims, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                contract_id = excluded.contract_id,
                page_number = excluded.page_number,
                section = excluded.section,
                start_index = excluded.start_index,
                embedding = CASE
                    WHEN excluded.embedding IS NOT NULL THEN excluded.embedding
                    WHEN chunks.text_hash = excluded.text_hash THEN chunks.embedding
                    ELSE NULL END,
                model = CASE
                    WHEN excluded.embedding IS NOT NULL THEN excluded.model
                    WHEN chunks.text_hash = excluded.text_hash THEN chunks.model
                    ELSE NULL END,
                dims = CASE
                    WHEN excluded.embedding IS NOT NULL THEN excluded.dims
                    WHEN chunks.text_hash = excluded.text_hash THEN chunks.dims
                    ELSE NULL END,
                text = excluded.text,
                text_hash = excluded.text_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.contract_id)
        .bind(chunk.page_number as i64)
        .bind(&chunk.section)
        .bind(chunk.start_index as i64)
        .bind(&chunk.text)
        .bind(chunk.text_hash())
        .bind(blob)
        .bind(model)
        .bind(dims)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Top `k` chunks by cosine similarity to `query`, optionally restricted
    /// to one contract.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        contract_id: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if !self.embeddings_enabled() {
            return Err(ContractError::VectorStore(
                "similarity search requires an embedding provider; set [embedding] provider in config"
                    .to_string(),
            ));
        }
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = embedding::embed_query(self.provider.as_ref(), query)
            .await
            .map_err(|e| ContractError::ModelLoading(e.to_string()))?;

        let rows = match contract_id {
            Some(id) => {
                sqlx::query(
                    "SELECT chunk_id, contract_id, page_number, section, text, embedding
                     FROM chunks WHERE embedding IS NOT NULL AND contract_id = ?",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT chunk_id, contract_id, page_number, section, text, embedding
                     FROM chunks WHERE embedding IS NOT NULL",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(store_err)?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                let page: i64 = row.get("page_number");
                SearchHit {
                    chunk_id: row.get("chunk_id"),
                    contract_id: row.get("contract_id"),
                    page_number: page as usize,
                    section: row.get("section"),
                    text: row.get("text"),
                    score: embedding::cosine_similarity(&query_vec, &vec),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        debug!(hits = hits.len(), contract_id = ?contract_id, "similarity search");
        Ok(hits)
    }

    /// Remove every chunk of a contract; returns how many were removed.
    pub async fn delete_contract(&self, contract_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE contract_id = ?")
            .bind(contract_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        let removed = result.rows_affected() as usize;
        info!(contract_id, removed, "deleted contract vectors");
        Ok(removed)
    }

    /// Remove chunks of `contract_id` whose ids are not in `keep`; returns
    /// how many were removed. Run after an upsert so a contract is never left
    /// without chunks.
    pub async fn delete_stale(&self, contract_id: &str, keep: &[String]) -> Result<usize> {
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT chunk_id FROM chunks WHERE contract_id = ?")
                .bind(contract_id)
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;

        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let stale: Vec<&String> = existing
            .iter()
            .filter(|id| !keep.contains(id.as_str()))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for id in &stale {
            sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;

        info!(contract_id, removed = stale.len(), "removed stale chunks");
        Ok(stale.len())
    }

    pub async fn count(&self, contract_id: Option<&str>) -> Result<usize> {
        let n: i64 = match contract_id {
            Some(id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE contract_id = ?")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(store_err)?;
        Ok(n as usize)
    }

    pub async fn pending_embeddings(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE embedding IS NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(n as usize)
    }

    /// Embed chunks stored without a vector.
    pub async fn embed_pending(&self, limit: Option<usize>) -> Result<UpsertStats> {
        if !self.embeddings_enabled() {
            return Err(ContractError::VectorStore(
                "embedding provider is disabled; set [embedding] provider in config".to_string(),
            ));
        }

        let rows = sqlx::query(
            "SELECT chunk_id, contract_id, page_number, section, start_index, text
             FROM chunks WHERE embedding IS NULL ORDER BY contract_id, page_number, start_index
             LIMIT ?",
        )
        .bind(limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let chunks: Vec<ContractChunk> = rows
            .iter()
            .map(|row| {
                let page: i64 = row.get("page_number");
                let start: i64 = row.get("start_index");
                ContractChunk {
                    chunk_id: row.get("chunk_id"),
                    contract_id: row.get("contract_id"),
                    page_number: page as usize,
                    section: row.get("section"),
                    start_index: start as usize,
                    text: row.get("text"),
                }
            })
            .collect();

        self.upsert_chunks(&chunks).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Three-dimensional "embedding": occurrences of three keywords.
    struct KeywordProvider;

    #[async_trait]
    impl EmbeddingProvider for KeywordProvider {
        fn model_name(&self) -> &str {
            "keywords"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    ["payment", "termination", "confidential"]
                        .iter()
                        .map(|k| t.matches(k).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("service down")
        }
    }

    async fn store_with(
        tmp: &TempDir,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> VectorStore {
        let mut config = Config::minimal();
        config.data.root = tmp.path().to_path_buf();
        migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();
        VectorStore::new(pool, provider, 2)
    }

    fn chunk(contract: &str, page: usize, start: usize, text: &str) -> ContractChunk {
        ContractChunk {
            chunk_id: chunk_id(contract, page, start),
            contract_id: contract.to_string(),
            page_number: page,
            section: None,
            start_index: start,
            text: text.to_string(),
        }
    }

    fn sample(contract: &str) -> Vec<ContractChunk> {
        vec![
            chunk(contract, 1, 0, "Payment is due within thirty days."),
            chunk(contract, 1, 40, "Either party may give notice of termination."),
            chunk(contract, 2, 0, "Confidential information stays confidential."),
        ]
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, Arc::new(KeywordProvider)).await;

        let stats = store.upsert_chunks(&sample("a")).await.unwrap();
        assert_eq!(stats, UpsertStats { stored: 3, embedded: 3, pending: 0 });
        store.upsert_chunks(&sample("a")).await.unwrap();

        assert_eq!(store.count(Some("a")).await.unwrap(), 3);
        assert_eq!(store.count(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_empty_upsert_is_noop() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, Arc::new(KeywordProvider)).await;
        assert_eq!(store.upsert_chunks(&[]).await.unwrap(), UpsertStats::default());
    }

    #[tokio::test]
    async fn test_search_ranks_and_scopes_by_contract() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, Arc::new(KeywordProvider)).await;
        store.upsert_chunks(&sample("a")).await.unwrap();
        store.upsert_chunks(&sample("b")).await.unwrap();

        let hits = store
            .similarity_search("when is payment due", 2, Some("a"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].contract_id, "a");
        assert!(hits[0].text.starts_with("Payment"));
        assert!(hits.iter().all(|h| h.contract_id == "a"));

        let all = store.similarity_search("termination", 10, None).await.unwrap();
        assert_eq!(all.len(), 6);
    }

    #[tokio::test]
    async fn test_failed_embedding_is_pending_then_filled() {
        let tmp = TempDir::new().unwrap();
        let failing = store_with(&tmp, Arc::new(FailingProvider)).await;
        let stats = failing.upsert_chunks(&sample("a")).await.unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(failing.pending_embeddings().await.unwrap(), 3);
        failing.close().await;

        let store = store_with(&tmp, Arc::new(KeywordProvider)).await;
        let filled = store.embed_pending(None).await.unwrap();
        assert_eq!(filled.embedded, 3);
        assert_eq!(store.pending_embeddings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_contract_counts_rows() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, Arc::new(KeywordProvider)).await;
        store.upsert_chunks(&sample("a")).await.unwrap();
        store.upsert_chunks(&sample("b")).await.unwrap();

        assert_eq!(store.delete_contract("a").await.unwrap(), 3);
        assert_eq!(store.delete_contract("a").await.unwrap(), 0);
        assert_eq!(store.count(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_delete_stale_keeps_current_chunks() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, Arc::new(KeywordProvider)).await;
        store.upsert_chunks(&sample("a")).await.unwrap();
        store.upsert_chunks(&sample("b")).await.unwrap();

        // Re-chunked contract "a": one chunk survives, one is new.
        let rechunked = vec![
            chunk("a", 1, 0, "Payment is due within thirty days."),
            chunk("a", 1, 20, "Notice of termination applies."),
        ];
        store.upsert_chunks(&rechunked).await.unwrap();
        let keep: Vec<String> = rechunked.iter().map(|c| c.chunk_id.clone()).collect();

        assert_eq!(store.delete_stale("a", &keep).await.unwrap(), 2);
        assert_eq!(store.count(Some("a")).await.unwrap(), 2);
        assert_eq!(store.count(Some("b")).await.unwrap(), 3);
        assert_eq!(store.delete_stale("a", &keep).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_stale_with_empty_keep_clears_contract() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, Arc::new(KeywordProvider)).await;
        store.upsert_chunks(&sample("a")).await.unwrap();
        assert_eq!(store.delete_stale("a", &[]).await.unwrap(), 3);
        assert_eq!(store.count(Some("a")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_requires_embeddings() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, Arc::new(embedding::DisabledProvider)).await;
        let stats = store.upsert_chunks(&sample("a")).await.unwrap();
        assert_eq!(stats.pending, 3);

        let err = store.similarity_search("payment", 4, None).await.unwrap_err();
        assert!(matches!(err, ContractError::VectorStore(_)));
    }
}
