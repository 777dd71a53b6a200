use crate::error::{RagError, Result};
use std::ops::Range;

/// Default maximum chunk size in characters
pub const DEFAULT_MAX_CHARS: usize = 3500;
/// Default number of characters shared by consecutive chunks
pub const DEFAULT_OVERLAP: usize = 300;

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// File name of the document this chunk belongs to
    pub source_filename: String,
    /// 0-based position of this chunk within its document
    pub chunk_id: usize,
    /// The actual text content of this chunk
    pub text: String,
    /// Character range `[start, end)` of this chunk in the source text
    pub char_range: Range<usize>,
}

/// Splits documents into fixed-size overlapping character windows
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chars: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Chunker {
            max_chars: DEFAULT_MAX_CHARS,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl Chunker {
    /// Create a chunker, rejecting settings that would never advance
    pub fn new(max_chars: usize, overlap: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(RagError::InvalidConfig(
                "chunk max_chars must be greater than zero".to_string(),
            ));
        }
        if overlap >= max_chars {
            return Err(RagError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than max_chars ({})",
                overlap, max_chars
            )));
        }

        Ok(Chunker { max_chars, overlap })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into windows of at most `max_chars` characters.
    ///
    /// Each window starts `max_chars - overlap` characters after the previous
    /// one, so the tail of chunk *i* is repeated at the head of chunk *i+1*.
    /// The final window always ends at the end of the text and may be shorter.
    pub fn split(&self, source_filename: &str, text: &str) -> Vec<Chunk> {
        // Byte offset of every char boundary, plus the end of the string
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;

        let step = self.max_chars - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total_chars {
            let end = (start + self.max_chars).min(total_chars);
            chunks.push(Chunk {
                source_filename: source_filename.to_string(),
                chunk_id: chunks.len(),
                text: text[boundaries[start]..boundaries[end]].to_string(),
                char_range: start..end,
            });

            if end == total_chars {
                break;
            }
            start += step;
        }

        chunks
    }
}

/// Split `text` into overlapping chunks with the given window settings
pub fn chunk(
    source_filename: &str,
    text: &str,
    max_chars: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    Ok(Chunker::new(max_chars, overlap)?.split(source_filename, text))
}

/// First `max_chars` characters of `text`
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
