use crate::context::assemble;
use crate::embeddings::{Embedder, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::index::{IndexPaths, IndexStore};
use crate::retrieval::Retriever;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub const SYSTEM_INSTRUCTIONS: &str = "You are a helpful assistant answering questions about the organisation's documents. \
Use ONLY the provided context to answer the user's query. \
Cite sources using the format [filename#chunk]. \
If the context lacks sufficient information, say so clearly and suggest next steps.";

pub const NO_INFORMATION_REPLY: &str =
    "No relevant information was found in the indexed documents for this question.";

pub const INDEX_MISSING_REPLY: &str =
    "The knowledge base has not been indexed yet. Run indexing first, then ask again.";

/// Number of previous turns sent along with each question
pub const DEFAULT_HISTORY_TURNS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatTurn {
    pub fn new(role: Role, content: &str) -> Self {
        ChatTurn {
            role,
            content: content.to_string(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Conversation log; only the most recent turns are sent with a question
#[derive(Debug, Clone)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
    max_turns: usize,
}

impl ChatHistory {
    pub fn new(max_turns: usize) -> Self {
        ChatHistory {
            turns: Vec::new(),
            max_turns,
        }
    }

    /// Read a saved conversation, starting empty if the file does not exist
    pub fn load(path: &Path, max_turns: usize) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No chat history at {}", path.display());
                return Ok(ChatHistory::new(max_turns));
            }
            Err(e) => return Err(e.into()),
        };
        let turns = serde_json::from_slice(&bytes).map_err(|e| RagError::History {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(ChatHistory { turns, max_turns })
    }

    /// Replace the file at `path` with the whole conversation
    pub fn save(&self, path: &Path) -> Result<()> {
        let to_err = |source: io::Error| RagError::Persistence {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_vec_pretty(&self.turns)
            .map_err(|e| to_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(to_err)?;
        tmp.write_all(&json).map_err(to_err)?;
        tmp.persist(path).map_err(|e| to_err(e.error))?;
        Ok(())
    }

    pub fn push(&mut self, role: Role, content: &str) {
        self.turns.push(ChatTurn::new(role, content));
    }

    /// Every turn, oldest first
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// The last `max_turns` turns
    pub fn recent(&self) -> &[ChatTurn] {
        let start = self.turns.len().saturating_sub(self.max_turns);
        &self.turns[start..]
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Everything the language model sees for one question
#[derive(Debug, Clone, Copy)]
pub struct AnswerRequest<'a> {
    pub instructions: &'a str,
    pub query: &'a str,
    pub context: &'a str,
    pub history: &'a [ChatTurn],
}

/// Language-model backend producing the final answer
#[allow(async_fn_in_trait)]
pub trait Answerer {
    async fn answer(&self, request: AnswerRequest<'_>) -> Result<String>;
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<P, A> {
    embedder: Embedder<P>,
    answerer: A,
    paths: IndexPaths,
    context_max_chars: usize,
    store: Option<IndexStore>,
}

impl<P: EmbeddingProvider, A: Answerer> RagEngine<P, A> {
    /// Create a new RAG engine; the index is loaded on first use
    pub fn new(
        embedder: Embedder<P>,
        answerer: A,
        paths: IndexPaths,
        context_max_chars: usize,
    ) -> Self {
        RagEngine {
            embedder,
            answerer,
            paths,
            context_max_chars,
            store: None,
        }
    }

    pub fn embedder(&self) -> &Embedder<P> {
        &self.embedder
    }

    /// Drop the cached index so the next question reads the persisted pair again
    pub fn reload(&mut self) {
        self.store = None;
    }

    /// Loaded index, reading it from disk if needed
    pub fn store(&mut self) -> Result<&IndexStore> {
        self.ensure_loaded()?;
        self.store
            .as_ref()
            .ok_or_else(|| RagError::MissingIndex(self.paths.index_path.clone()))
    }

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.store.is_none() {
            self.store = Some(IndexStore::load(&self.paths)?);
        }
        Ok(())
    }

    /// Assembled context block for `query`, empty when nothing relevant fits
    pub async fn context_for(&mut self, query: &str, k: usize) -> Result<String> {
        self.ensure_loaded()?;
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| RagError::MissingIndex(self.paths.index_path.clone()))?;

        let hits = Retriever::new(&self.embedder).retrieve(query, k, store).await?;
        Ok(assemble(&hits, self.context_max_chars))
    }

    /// Answer `query` grounded in the `k` nearest chunks.
    ///
    /// A missing index or an empty context produce fixed replies instead of
    /// errors; embedding and provider failures are returned.
    pub async fn answer(
        &mut self,
        query: &str,
        k: usize,
        history: &[ChatTurn],
    ) -> Result<String> {
        let context = match self.context_for(query, k).await {
            Ok(context) => context,
            Err(RagError::MissingIndex(path)) => {
                warn!("No index at {}", path.display());
                return Ok(INDEX_MISSING_REPLY.to_string());
            }
            Err(e) => return Err(e),
        };

        if context.is_empty() {
            info!("No grounding available for query");
            return Ok(NO_INFORMATION_REPLY.to_string());
        }

        self.answerer
            .answer(AnswerRequest {
                instructions: SYSTEM_INSTRUCTIONS,
                query,
                context: &context,
                history,
            })
            .await
    }

    /// Run the interactive question loop on stdin.
    ///
    /// With a `history_path` the conversation is resumed from that file and
    /// saved after every answer.
    pub async fn run_query_loop(&mut self, k: usize, history_path: Option<&Path>) -> Result<()> {
        let mut history = match history_path {
            Some(path) => ChatHistory::load(path, DEFAULT_HISTORY_TURNS)?,
            None => ChatHistory::new(DEFAULT_HISTORY_TURNS),
        };
        if !history.turns().is_empty() {
            println!("Resuming conversation with {} earlier turns.", history.turns().len());
        }
        println!("Ready to answer questions. Type 'exit' to quit.");

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut buffer = String::new();

        loop {
            print!("\nYour question: ");
            stdout.flush()?;

            buffer.clear();
            let read = stdin.lock().read_line(&mut buffer)?;
            if read == 0 {
                break;
            }

            let question = buffer.trim();
            if question.is_empty() {
                continue;
            }
            if question.eq_ignore_ascii_case("exit") {
                println!("Goodbye!");
                break;
            }

            let reply = match self.answer(question, k, history.recent()).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("Failed to answer: {}", e);
                    format!("Error: {}", e)
                }
            };
            println!("\n{}", reply);

            history.push(Role::User, question);
            history.push(Role::Assistant, &reply);
            if let Some(path) = history_path {
                if let Err(e) = history.save(path) {
                    warn!("Failed to save chat history: {}", e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::FakeProvider;
    use crate::embeddings::RetryPolicy;
    use crate::index::ChunkMetadata;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingAnswerer {
        contexts: RefCell<Vec<String>>,
        history_lens: RefCell<Vec<usize>>,
    }

    impl Answerer for RecordingAnswerer {
        async fn answer(&self, request: AnswerRequest<'_>) -> Result<String> {
            self.contexts.borrow_mut().push(request.context.to_string());
            self.history_lens.borrow_mut().push(request.history.len());
            Ok(format!("answer to {}", request.query))
        }
    }

    fn engine(dir: &std::path::Path) -> RagEngine<FakeProvider, RecordingAnswerer> {
        let provider = FakeProvider::new(2).with_vector("budget?", vec![1.0, 0.0]);
        let embedder = Embedder::new(provider, 2, RetryPolicy::immediate(1));
        RagEngine::new(
            embedder,
            RecordingAnswerer::default(),
            IndexPaths::in_dir(dir),
            8000,
        )
    }

    fn persist_store(dir: &std::path::Path, preview: &str) {
        let mut store = IndexStore::new(2, "fake-embedding");
        store
            .add(
                &[1.0, 0.0],
                ChunkMetadata {
                    filename: "finance.txt".to_string(),
                    path: "parsed/finance.txt".to_string(),
                    chunk_id: 3,
                    text_preview: preview.to_string(),
                },
            )
            .unwrap();
        store.persist(&IndexPaths::in_dir(dir)).unwrap();
    }

    #[test]
    fn test_history_sends_latest_turns() {
        let mut history = ChatHistory::new(3);
        for i in 0..5 {
            history.push(Role::User, &i.to_string());
        }
        let contents: Vec<_> = history.recent().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);
        assert_eq!(history.turns().len(), 5);

        history.clear();
        assert!(history.recent().is_empty());
    }

    #[test]
    fn test_history_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_history.json");

        let fresh = ChatHistory::load(&path, 6).unwrap();
        assert!(fresh.turns().is_empty());

        let mut history = ChatHistory::new(6);
        history.push(Role::User, "What was decided in July?");
        history.push(Role::Assistant, "The budget was approved [finance.txt#3].");
        history.save(&path).unwrap();

        let loaded = ChatHistory::load(&path, 6).unwrap();
        assert_eq!(loaded.turns(), history.turns());
        assert!(loaded.turns()[0].timestamp.is_some());
        assert_eq!(loaded.turns()[1].role, Role::Assistant);
    }

    #[test]
    fn test_history_without_timestamps_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_history.json");
        fs::write(&path, r#"[{"role":"user","content":"hi"}]"#).unwrap();

        let loaded = ChatHistory::load(&path, 6).unwrap();
        assert_eq!(loaded.turns()[0].content, "hi");
        assert!(loaded.turns()[0].timestamp.is_none());

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ChatHistory::load(&path, 6),
            Err(RagError::History { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_index_gives_friendly_reply() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());

        let reply = engine.answer("budget?", 5, &[]).await.unwrap();
        assert_eq!(reply, INDEX_MISSING_REPLY);
        assert!(engine.answerer.contexts.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_answer_passes_cited_context() {
        let dir = tempfile::tempdir().unwrap();
        persist_store(dir.path(), "Q3 budget approved");
        let mut engine = engine(dir.path());

        let history = vec![ChatTurn::new(Role::User, "hello")];
        let reply = engine.answer("budget?", 5, &history).await.unwrap();

        assert_eq!(reply, "answer to budget?");
        let contexts = engine.answerer.contexts.borrow();
        assert_eq!(contexts[0], "[finance.txt#3]\nQ3 budget approved\n");
        assert_eq!(engine.answerer.history_lens.borrow()[0], 1);
    }

    #[tokio::test]
    async fn test_context_that_does_not_fit_means_no_information() {
        let dir = tempfile::tempdir().unwrap();
        persist_store(dir.path(), &"z".repeat(9000));
        let mut engine = engine(dir.path());

        let reply = engine.answer("budget?", 5, &[]).await.unwrap();
        assert_eq!(reply, NO_INFORMATION_REPLY);
        assert!(engine.answerer.contexts.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());
        assert_eq!(
            engine.answer("budget?", 5, &[]).await.unwrap(),
            INDEX_MISSING_REPLY
        );

        persist_store(dir.path(), "fresh");
        engine.reload();
        assert_eq!(engine.store().unwrap().len(), 1);
        assert_eq!(
            engine.answer("budget?", 5, &[]).await.unwrap(),
            "answer to budget?"
        );
    }
}
