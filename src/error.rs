use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the indexing and retrieval pipeline
#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding provider kept failing (or returned the wrong shape) after all retries
    #[error("Embedding failed after {attempts} attempts: {reason}")]
    Embedding { attempts: u32, reason: String },

    /// One or both persisted artifacts are absent
    #[error("Missing vector index or metadata at {}. Run indexing first.", .0.display())]
    MissingIndex(PathBuf),

    /// A single document could not be turned into text
    #[error("Failed to extract text from {path}: {reason}")]
    Extraction { path: String, reason: String },

    /// Writing the index or metadata artifact failed
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted pair exists but cannot be trusted
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector id {0} is already present in the index")]
    DuplicateId(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Another indexing run holds the lock file
    #[error("Index directory {} is locked by another indexing run", .0.display())]
    IndexLocked(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A saved conversation could not be parsed
    #[error("Invalid chat history in {}: {reason}", path.display())]
    History { path: PathBuf, reason: String },

    /// The language-model provider failed to produce an answer
    #[error("Provider request failed: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, RagError>;
