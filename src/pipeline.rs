use crate::chunking::{truncate_chars, Chunk, Chunker};
use crate::config::DEFAULT_PREVIEW_CHARS;
use crate::document::Document;
use crate::embeddings::{Embedder, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::index::{ChunkMetadata, IndexPaths, IndexStore};
use fs2::FileExt;
use log::{debug, error, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Counters describing one indexing run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexingReport {
    pub documents_seen: usize,
    pub documents_indexed: usize,
    pub documents_skipped: usize,
    pub extraction_failures: usize,
    pub chunks_embedded: usize,
    pub chunks_failed: usize,
}

/// Full-rebuild indexer: chunk, embed, insert, then persist once at the end
pub struct IndexingPipeline<'a, P> {
    embedder: &'a Embedder<P>,
    chunker: Chunker,
    preview_chars: usize,
}

impl<'a, P: EmbeddingProvider> IndexingPipeline<'a, P> {
    pub fn new(embedder: &'a Embedder<P>, chunker: Chunker) -> Self {
        IndexingPipeline {
            embedder,
            chunker,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
        self
    }

    /// Rebuild the index from `documents` and replace the persisted pair.
    ///
    /// Only a lock or persistence failure aborts the run; bad documents and
    /// chunks that cannot be embedded are logged and skipped.
    pub async fn run<I>(&self, documents: I, paths: &IndexPaths) -> Result<IndexingReport>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        let _lock = RunLock::acquire(&paths.index_path)?;

        let (mut store, report) = self.build(documents).await?;
        store.persist(paths)?;

        info!(
            "Indexed {} chunks from {} documents ({} chunks failed, {} documents skipped)",
            report.chunks_embedded,
            report.documents_indexed,
            report.chunks_failed,
            report.documents_skipped + report.extraction_failures
        );
        Ok(report)
    }

    /// Build a fresh in-memory store without touching the persisted pair
    pub async fn build<I>(&self, documents: I) -> Result<(IndexStore, IndexingReport)>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        let mut store = IndexStore::new(self.embedder.dim(), self.embedder.model());
        let mut report = IndexingReport::default();

        for document in documents {
            report.documents_seen += 1;

            let document = match document {
                Ok(document) => document,
                Err(e) => {
                    error!("Skipping document: {}", e);
                    report.extraction_failures += 1;
                    continue;
                }
            };

            let text = document.raw_text.trim();
            if text.is_empty() {
                info!("Skipping empty: {}", document.filename);
                report.documents_skipped += 1;
                continue;
            }

            let embedded = self
                .index_document(&document, text, &mut store, &mut report)
                .await?;
            if embedded > 0 {
                report.documents_indexed += 1;
            }
        }

        Ok((store, report))
    }

    async fn index_document(
        &self,
        document: &Document,
        text: &str,
        store: &mut IndexStore,
        report: &mut IndexingReport,
    ) -> Result<usize> {
        // Offsets in `char_range` refer to the trimmed text
        let mut chunks = self.chunker.split(&document.filename, text);
        if chunks.is_empty() {
            let text = truncate_chars(text, self.chunker.max_chars());
            chunks.push(Chunk {
                source_filename: document.filename.clone(),
                chunk_id: 0,
                text: text.to_string(),
                char_range: 0..text.chars().count(),
            });
        }
        debug!("Split {} into {} chunks", document.filename, chunks.len());

        let mut embedded = 0;
        for chunk in chunks {
            let vector = match self.embedder.embed(&chunk.text).await {
                Ok(vector) => vector,
                Err(e) => {
                    warn!(
                        "Skipping chunk {} of {} due to embedding failure: {}",
                        chunk.chunk_id, document.filename, e
                    );
                    report.chunks_failed += 1;
                    continue;
                }
            };

            let metadata = ChunkMetadata {
                filename: document.filename.clone(),
                path: document.path.clone(),
                chunk_id: chunk.chunk_id,
                text_preview: truncate_chars(&chunk.text, self.preview_chars).to_string(),
            };
            store.add(&vector, metadata)?;
            embedded += 1;
            report.chunks_embedded += 1;
        }

        Ok(embedded)
    }
}

/// Exclusive advisory lock held for the duration of an indexing run
struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    fn acquire(index_path: &Path) -> Result<Self> {
        let path = index_path.with_extension("lock");
        let to_err = |source: io::Error| RagError::Persistence {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(to_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(to_err)?;

        if file.try_lock_exclusive().is_err() {
            return Err(RagError::IndexLocked(path));
        }
        debug!("Acquired indexing lock {}", path.display());
        Ok(RunLock { file, path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::FakeProvider;
    use crate::embeddings::RetryPolicy;

    fn embedder(provider: FakeProvider) -> Embedder<FakeProvider> {
        let dim = provider.dim;
        Embedder::new(provider, dim, RetryPolicy::immediate(2))
    }

    #[tokio::test]
    async fn test_ids_follow_document_then_chunk_order() {
        let embedder = embedder(FakeProvider::new(4));
        let pipeline = IndexingPipeline::new(&embedder, Chunker::new(10, 2).unwrap());

        let (store, report) = pipeline
            .build(vec![
                Ok(Document::from_text("a.txt", "abcdefghijklmnop")),
                Ok(Document::from_text("b.txt", "short")),
            ])
            .await
            .unwrap();

        assert_eq!(report.chunks_embedded, 3);
        assert_eq!(report.documents_indexed, 2);
        assert_eq!(store.len(), 3);
        let order: Vec<_> = (0..3)
            .map(|id| {
                let m = store.metadata(id).unwrap();
                (m.filename.clone(), m.chunk_id)
            })
            .collect();
        assert_eq!(
            order,
            vec![
                ("a.txt".to_string(), 0),
                ("a.txt".to_string(), 1),
                ("b.txt".to_string(), 0)
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_document_adds_nothing() {
        let embedder = embedder(FakeProvider::new(4));
        let pipeline = IndexingPipeline::new(&embedder, Chunker::default());

        let (store, report) = pipeline
            .build(vec![
                Ok(Document::from_text("empty.txt", "")),
                Ok(Document::from_text("blank.txt", "  \n\t ")),
            ])
            .await
            .unwrap();

        assert!(store.is_empty());
        assert_eq!(report.documents_skipped, 2);
        assert_eq!(embedder.provider().calls.get(), 0);
    }

    #[tokio::test]
    async fn test_surrounding_whitespace_is_not_chunked() {
        let embedder = embedder(FakeProvider::new(4));
        let pipeline = IndexingPipeline::new(&embedder, Chunker::new(10, 2).unwrap());
        let padded = format!("{}abcdefghij{}", "\t\n", " \n".repeat(20));

        let (store, report) = pipeline
            .build(vec![Ok(Document::from_text("padded.txt", &padded))])
            .await
            .unwrap();

        assert_eq!(report.chunks_embedded, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.metadata(0).unwrap().text_preview, "abcdefghij");
        assert_eq!(embedder.provider().calls.get(), 1);
    }

    #[tokio::test]
    async fn test_failed_chunks_and_documents_are_skipped() {
        let mut provider = FakeProvider::new(4);
        provider.always_fail.push("bad".to_string());
        let embedder = embedder(provider);
        let pipeline = IndexingPipeline::new(&embedder, Chunker::default());

        let (store, report) = pipeline
            .build(vec![
                Err(RagError::Extraction {
                    path: "broken.pdf".to_string(),
                    reason: "garbage".to_string(),
                }),
                Ok(Document::from_text("bad.txt", "bad")),
                Ok(Document::from_text("good.txt", "good")),
            ])
            .await
            .unwrap();

        assert_eq!(report.documents_seen, 3);
        assert_eq!(report.extraction_failures, 1);
        assert_eq!(report.chunks_failed, 1);
        assert_eq!(report.chunks_embedded, 1);
        assert_eq!(report.documents_indexed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.metadata(0).unwrap().filename, "good.txt");
    }

    #[tokio::test]
    async fn test_preview_is_truncated() {
        let embedder = embedder(FakeProvider::new(4));
        let pipeline =
            IndexingPipeline::new(&embedder, Chunker::default()).with_preview_chars(5);

        let (store, _) = pipeline
            .build(vec![Ok(Document::from_text("long.txt", "0123456789"))])
            .await
            .unwrap();

        assert_eq!(store.metadata(0).unwrap().text_preview, "01234");
    }

    #[tokio::test]
    async fn test_run_persists_fresh_index() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        let embedder = embedder(FakeProvider::new(4));
        let pipeline = IndexingPipeline::new(&embedder, Chunker::default());

        pipeline
            .run(vec![Ok(Document::from_text("one.txt", "first run"))], &paths)
            .await
            .unwrap();
        let report = pipeline
            .run(
                vec![
                    Ok(Document::from_text("two.txt", "second run")),
                    Ok(Document::from_text("three.txt", "still second run")),
                ],
                &paths,
            )
            .await
            .unwrap();
        assert_eq!(report.chunks_embedded, 2);

        // A rebuild replaces the id space instead of appending to it
        let store = IndexStore::load(&paths).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.metadata(0).unwrap().filename, "two.txt");
        assert_eq!(store.next_id(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        let embedder = embedder(FakeProvider::new(4));
        let pipeline = IndexingPipeline::new(&embedder, Chunker::default());

        let held = RunLock::acquire(&paths.index_path).unwrap();
        let result = pipeline
            .run(vec![Ok(Document::from_text("one.txt", "text"))], &paths)
            .await;
        assert!(matches!(result, Err(RagError::IndexLocked(_))));
        assert!(matches!(
            IndexStore::load(&paths),
            Err(RagError::MissingIndex(_))
        ));

        drop(held);
        assert!(pipeline
            .run(vec![Ok(Document::from_text("one.txt", "text"))], &paths)
            .await
            .is_ok());
    }
}
