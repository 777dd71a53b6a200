use crate::embeddings::{Embedder, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::index::{ChunkMetadata, IndexStore, VectorId};
use log::{debug, warn};

/// One ranked retrieval result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: VectorId,
    /// Squared Euclidean distance, lower is closer
    pub distance: f32,
    pub metadata: ChunkMetadata,
}

/// Embeds queries and looks them up in a loaded index
pub struct Retriever<'a, P> {
    embedder: &'a Embedder<P>,
}

impl<'a, P: EmbeddingProvider> Retriever<'a, P> {
    pub fn new(embedder: &'a Embedder<P>) -> Self {
        Retriever { embedder }
    }

    /// The `k` chunks closest to `query`, nearest first.
    ///
    /// An empty index yields no hits without calling the embedder. Embedding
    /// failures are returned to the caller.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        store: &IndexStore,
    ) -> Result<Vec<SearchHit>> {
        if store.is_empty() || k == 0 {
            debug!("Nothing to retrieve (index size {}, k {})", store.len(), k);
            return Ok(Vec::new());
        }
        if self.embedder.dim() != store.dim() {
            return Err(RagError::DimensionMismatch {
                expected: store.dim(),
                actual: self.embedder.dim(),
            });
        }
        if self.embedder.model() != store.model() {
            warn!(
                "Index was built with '{}' but queries use '{}'",
                store.model(),
                self.embedder.model()
            );
        }

        let query_vector = self.embedder.embed(query).await?;
        let neighbours = store.search(&query_vector, k)?;

        let mut hits = Vec::with_capacity(neighbours.len());
        for (id, distance) in neighbours {
            let metadata = store.metadata(id).cloned().ok_or_else(|| {
                RagError::CorruptIndex(format!("no metadata for vector id {}", id))
            })?;
            hits.push(SearchHit {
                id,
                distance,
                metadata,
            });
        }
        debug!("Retrieved {} hits for query", hits.len());
        Ok(hits)
    }
}
