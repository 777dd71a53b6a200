use crate::chunking::{Chunker, DEFAULT_MAX_CHARS, DEFAULT_OVERLAP};
use crate::embeddings::{RetryPolicy, DEFAULT_EMBEDDING_DIM};
use crate::error::{RagError, Result};
use crate::index::IndexPaths;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Maximum characters of chunk text kept in the metadata table
pub const DEFAULT_PREVIEW_CHARS: usize = 1000;
/// Character budget for the assembled context block
pub const DEFAULT_CONTEXT_CHARS: usize = 8000;
/// Hits retrieved per question
pub const DEFAULT_TOP_K: usize = 5;

/// Settings for indexing and retrieval
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Directory holding the vector and metadata artifacts
    pub index_dir: PathBuf,
    pub chunk_max_chars: usize,
    pub chunk_overlap: usize,
    pub preview_chars: usize,
    pub context_max_chars: usize,
    pub top_k: usize,
    pub embedding_dim: usize,
    pub retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        RagConfig {
            index_dir: PathBuf::from("embeddings"),
            chunk_max_chars: DEFAULT_MAX_CHARS,
            chunk_overlap: DEFAULT_OVERLAP,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            context_max_chars: DEFAULT_CONTEXT_CHARS,
            top_k: DEFAULT_TOP_K,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            retry: RetryPolicy::default(),
        }
    }
}

impl RagConfig {
    /// Create a configuration from `RAG_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = RagConfig::default();

        let config = RagConfig {
            index_dir: env::var("RAG_INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_dir),
            chunk_max_chars: env_or("RAG_CHUNK_MAX_CHARS", defaults.chunk_max_chars)?,
            chunk_overlap: env_or("RAG_CHUNK_OVERLAP", defaults.chunk_overlap)?,
            preview_chars: env_or("RAG_PREVIEW_CHARS", defaults.preview_chars)?,
            context_max_chars: env_or("RAG_CONTEXT_MAX_CHARS", defaults.context_max_chars)?,
            top_k: env_or("RAG_TOP_K", defaults.top_k)?,
            embedding_dim: env_or("RAG_EMBEDDING_DIM", defaults.embedding_dim)?,
            retry: RetryPolicy {
                max_attempts: env_or("RAG_EMBED_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                base_delay: Duration::from_millis(env_or(
                    "RAG_EMBED_BASE_DELAY_MS",
                    defaults.retry.base_delay.as_millis() as u64,
                )?),
                factor: defaults.retry.factor,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.chunker()?;
        if self.embedding_dim == 0 {
            return Err(RagError::InvalidConfig(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(RagError::InvalidConfig(
                "embedding retries need at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    pub fn chunker(&self) -> Result<Chunker> {
        Chunker::new(self.chunk_max_chars, self.chunk_overlap)
    }

    pub fn index_paths(&self) -> IndexPaths {
        IndexPaths::in_dir(&self.index_dir)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RagError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_max_chars, 3500);
        assert_eq!(config.chunk_overlap, 300);
        assert_eq!(config.embedding_dim, 1536);
        assert_eq!(
            config.index_paths().index_path,
            PathBuf::from("embeddings/vectors.idx")
        );
    }

    #[test]
    fn test_overlap_not_smaller_than_window_is_invalid() {
        let config = RagConfig {
            chunk_max_chars: 100,
            chunk_overlap: 100,
            ..RagConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RagError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_env_or_parses_and_reports_errors() {
        env::set_var("RAG_TEST_ENV_OR_OK", " 42 ");
        env::set_var("RAG_TEST_ENV_OR_BAD", "many");
        assert_eq!(env_or("RAG_TEST_ENV_OR_OK", 1usize).unwrap(), 42);
        assert!(env_or("RAG_TEST_ENV_OR_BAD", 1usize).is_err());
        assert_eq!(env_or("RAG_TEST_ENV_OR_UNSET", 7usize).unwrap(), 7);
    }
}
