//! Embedded in-memory vector engine
//!
//! Dense search is exact cosine; sparse search is BM25 over whitespace and
//! punctuation-split tokens of `content`. Used for offline operation and
//! tests; a remote engine plugs in through the same [`VectorBackend`]
//! trait.

use std::collections::HashMap;
use std::sync::Mutex;

use super::backend::{
    BackendError, ChunkRecord, FieldSpec, Filter, ScoredHit, VectorBackend,
};
use crate::embedder::cosine;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

struct Collection {
    dimension: usize,
    rows: Vec<ChunkRecord>,
    loaded: bool,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
    max_collections: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_collections: None,
        }
    }

    /// Cap the number of collections, to exercise capacity handling.
    pub fn with_max_collections(max: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_collections: Some(max),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorBackend for MemoryBackend {
    fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        _fields: &[FieldSpec],
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        if inner.collections.contains_key(name) {
            return Err(BackendError::AlreadyExists(name.to_string()));
        }
        if let Some(max) = self.max_collections {
            if inner.collections.len() >= max {
                return Err(BackendError::CollectionLimit);
            }
        }
        inner.collections.insert(
            name.to_string(),
            Collection {
                dimension,
                rows: Vec::new(),
                loaded: false,
            },
        );
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner
            .collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))
    }

    fn has_collection(&self, name: &str) -> Result<bool, BackendError> {
        Ok(self.lock().collections.contains_key(name))
    }

    fn list_collections(&self) -> Result<Vec<String>, BackendError> {
        let mut names: Vec<String> = self.lock().collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn indexes_ready(&self, name: &str) -> Result<bool, BackendError> {
        let inner = self.lock();
        inner
            .collections
            .get(name)
            .map(|_| true)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))
    }

    fn load_collection(&self, name: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let col = inner
            .collections
            .get_mut(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        col.loaded = true;
        Ok(())
    }

    fn insert(&self, name: &str, rows: &[ChunkRecord]) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let col = inner
            .collections
            .get_mut(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        for row in rows {
            if row.vector.len() != col.dimension {
                return Err(BackendError::DimensionMismatch {
                    got: row.vector.len(),
                    want: col.dimension,
                });
            }
        }
        // Upsert by primary key.
        for row in rows {
            col.rows.retain(|r| r.id != row.id);
            col.rows.push(row.clone());
        }
        Ok(())
    }

    fn delete_by_ids(&self, name: &str, ids: &[String]) -> Result<usize, BackendError> {
        let mut inner = self.lock();
        let col = inner
            .collections
            .get_mut(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        let before = col.rows.len();
        col.rows.retain(|r| !ids.contains(&r.id));
        Ok(before - col.rows.len())
    }

    fn query(
        &self,
        name: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, BackendError> {
        let inner = self.lock();
        let col = inner
            .collections
            .get(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        Ok(col
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }

    fn dense_search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredHit>, BackendError> {
        let inner = self.lock();
        let col = inner
            .collections
            .get(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        let mut hits: Vec<ScoredHit> = col
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| ScoredHit {
                score: cosine(vector, &r.vector),
                record: r.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    fn sparse_search(
        &self,
        name: &str,
        text: &str,
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredHit>, BackendError> {
        let inner = self.lock();
        let col = inner
            .collections
            .get(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;

        let candidates: Vec<&ChunkRecord> =
            col.rows.iter().filter(|r| filter.matches(r)).collect();
        let mut hits = bm25(&candidates, text);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn bm25(docs: &[&ChunkRecord], query: &str) -> Vec<ScoredHit> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() || docs.is_empty() {
        return Vec::new();
    }

    let doc_tokens: Vec<Vec<String>> = docs.iter().map(|d| tokenize(&d.content)).collect();
    let avg_len: f32 =
        doc_tokens.iter().map(|t| t.len() as f32).sum::<f32>() / docs.len() as f32;
    let n = docs.len() as f32;

    let mut df: HashMap<&str, f32> = HashMap::new();
    for term in &query_terms {
        let count = doc_tokens
            .iter()
            .filter(|tokens| tokens.iter().any(|t| t == term))
            .count() as f32;
        df.insert(term.as_str(), count);
    }

    docs.iter()
        .zip(&doc_tokens)
        .filter_map(|(doc, tokens)| {
            let len = tokens.len() as f32;
            let mut score = 0.0f32;
            for term in &query_terms {
                let tf = tokens.iter().filter(|t| *t == term).count() as f32;
                if tf == 0.0 {
                    continue;
                }
                let dfi = df[term.as_str()];
                let idf = ((n - dfi + 0.5) / (dfi + 0.5) + 1.0).ln();
                let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len.max(1.0));
                score += idf * tf * (BM25_K1 + 1.0) / denom;
            }
            (score > 0.0).then(|| ScoredHit {
                record: (*doc).clone(),
                score,
            })
        })
        .collect()
}
