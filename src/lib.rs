pub mod chunking;
pub mod config;
pub mod context;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod openai;
pub mod pipeline;
pub mod rag;
pub mod retrieval;

pub use error::{RagError, Result};
