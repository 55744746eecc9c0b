//! Raw vector-engine operations the adapter wraps
//!
//! The vector store itself is an external collaborator; this trait is the
//! interface the core depends on. Implementations translate these calls to
//! a concrete engine; [`crate::store::memory::MemoryBackend`] is the
//! embedded one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    #[error("Collection already exists: {0}")]
    AlreadyExists(String),
    #[error("Server collection limit reached")]
    CollectionLimit,
    #[error("Vector dimension mismatch: got {got}, collection expects {want}")]
    DimensionMismatch { got: usize, want: usize },
    #[error("Transient store failure: {0}")]
    Transient(String),
    #[error("Store failure: {0}")]
    Other(String),
}

impl BackendError {
    /// Transient failures are retried by the adapter; everything else is
    /// surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// One searchable unit: a chunk with its dense vector and metadata.
///
/// The sparse (BM25) representation is derived from `content` by the
/// engine; it never travels through this struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub vector: Vec<f32>,
    pub content: String,
    #[serde(rename = "relativePath")]
    pub relative_path: String,
    #[serde(rename = "startLine")]
    pub start_line: i64,
    #[serde(rename = "endLine")]
    pub end_line: i64,
    #[serde(rename = "fileExtension")]
    pub file_extension: String,
    pub metadata: serde_json::Value,
}

/// A record with a search score attached.
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub record: ChunkRecord,
    pub score: f32,
}

/// Typed metadata filter. Kept closed (no expression strings) so
/// exhaustiveness stays checkable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub relative_path: Option<String>,
    pub extensions: Option<Vec<String>>,
}

impl Filter {
    pub fn by_path(path: &str) -> Self {
        Self {
            relative_path: Some(path.to_string()),
            ..Default::default()
        }
    }

    pub fn by_extensions(extensions: Vec<String>) -> Self {
        Self {
            extensions: if extensions.is_empty() {
                None
            } else {
                Some(extensions)
            },
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relative_path.is_none() && self.extensions.is_none()
    }

    pub fn matches(&self, record: &ChunkRecord) -> bool {
        if let Some(path) = &self.relative_path {
            if &record.relative_path != path {
                return false;
            }
        }
        if let Some(exts) = &self.extensions {
            let with_dot = format!(".{}", record.file_extension);
            if !exts.iter().any(|e| e == &with_dot || e == &record.file_extension) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut terms = Vec::new();
        if let Some(p) = &self.relative_path {
            terms.push(format!("relativePath == \"{}\"", p));
        }
        if let Some(exts) = &self.extensions {
            terms.push(format!("fileExtension in {:?}", exts));
        }
        if terms.is_empty() {
            write!(f, "<all>")
        } else {
            write!(f, "{}", terms.join(" && "))
        }
    }
}

/// Field kinds of the hybrid collection schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// String primary key.
    PrimaryVarchar,
    /// Tokenized text feeding the engine's BM25 function.
    AnalyzedText,
    DenseVector,
    SparseVector,
    Varchar,
    Int64,
    Json,
}

/// One field of the collection schema.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub max_length: Option<usize>,
}

/// The fixed hybrid schema: dense cosine vector plus a BM25 sparse vector
/// built from `content`.
pub fn hybrid_schema() -> Vec<FieldSpec> {
    vec![
        FieldSpec { name: "id", kind: FieldKind::PrimaryVarchar, max_length: Some(512) },
        FieldSpec { name: "content", kind: FieldKind::AnalyzedText, max_length: Some(65_535) },
        FieldSpec { name: "vector", kind: FieldKind::DenseVector, max_length: None },
        FieldSpec { name: "sparse_vector", kind: FieldKind::SparseVector, max_length: None },
        FieldSpec { name: "relativePath", kind: FieldKind::Varchar, max_length: Some(1024) },
        FieldSpec { name: "startLine", kind: FieldKind::Int64, max_length: None },
        FieldSpec { name: "endLine", kind: FieldKind::Int64, max_length: None },
        FieldSpec { name: "fileExtension", kind: FieldKind::Varchar, max_length: Some(32) },
        FieldSpec { name: "metadata", kind: FieldKind::Json, max_length: Some(65_535) },
    ]
}

/// Engine operations. All methods are synchronous from the caller's view;
/// network suspension is an implementation concern.
pub trait VectorBackend: Send + Sync {
    fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        fields: &[FieldSpec],
    ) -> Result<(), BackendError>;

    fn drop_collection(&self, name: &str) -> Result<(), BackendError>;

    fn has_collection(&self, name: &str) -> Result<bool, BackendError>;

    fn list_collections(&self) -> Result<Vec<String>, BackendError>;

    /// True once both the dense and sparse indexes report ready.
    fn indexes_ready(&self, name: &str) -> Result<bool, BackendError>;

    /// Load the collection into memory for serving.
    fn load_collection(&self, name: &str) -> Result<(), BackendError>;

    fn insert(&self, name: &str, rows: &[ChunkRecord]) -> Result<(), BackendError>;

    /// Exact-match deletion; returns the number of rows removed.
    fn delete_by_ids(&self, name: &str, ids: &[String]) -> Result<usize, BackendError>;

    fn query(
        &self,
        name: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, BackendError>;

    fn dense_search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredHit>, BackendError>;

    fn sparse_search(
        &self,
        name: &str,
        text: &str,
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredHit>, BackendError>;
}
