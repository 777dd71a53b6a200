use crate::error::{RagError, Result};
use log::{error, warn};
use std::time::Duration;

/// Dimension of `text-embedding-3-small` vectors
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Source of raw embedding vectors (a remote API in production)
#[allow(async_fn_in_trait)]
pub trait EmbeddingProvider {
    /// Stable name of the model behind this provider
    fn model(&self) -> &str;

    /// Request a single embedding; implementations should not retry
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            factor: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping, for tests and batch tools
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Delay to wait after the 0-based `attempt` has failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .mul_f64(self.factor.powi(attempt.min(i32::MAX as u32) as i32))
    }
}

/// Validating, retrying wrapper around an [`EmbeddingProvider`]
pub struct Embedder<P> {
    provider: P,
    dim: usize,
    policy: RetryPolicy,
}

impl<P: EmbeddingProvider> Embedder<P> {
    pub fn new(provider: P, dim: usize, policy: RetryPolicy) -> Self {
        Embedder {
            provider,
            dim,
            policy,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Embed `text`, retrying provider errors and wrong-sized vectors.
    ///
    /// Fails with [`RagError::Embedding`] once `max_attempts` are used up.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.try_embed(text).await {
                Ok(vector) => return Ok(vector),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        let wait = self.policy.delay_for(attempt);
                        warn!(
                            "Embedding error (attempt {}/{}): {}. Retrying in {:.1}s",
                            attempt + 1,
                            attempts,
                            e,
                            wait.as_secs_f64()
                        );
                        tokio::time::sleep(wait).await;
                    } else {
                        warn!(
                            "Embedding error (attempt {}/{}): {}",
                            attempt + 1,
                            attempts,
                            e
                        );
                    }
                }
            }
        }

        error!("Failed to embed after {} attempts", attempts);
        Err(RagError::Embedding {
            attempts,
            reason: last_error,
        })
    }

    async fn try_embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.provider.embed(text).await?;
        if vector.len() != self.dim {
            return Err(RagError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}
