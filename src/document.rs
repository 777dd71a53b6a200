use crate::error::{RagError, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A source document with its extracted text
#[derive(Debug, Clone)]
pub struct Document {
    /// The document's file name
    pub filename: String,
    /// Path the document was read from
    pub path: String,
    /// Extracted text content
    pub raw_text: String,
    /// The document's MIME type
    pub mime_type: String,
}

impl Document {
    /// Build a document from text already in memory
    pub fn from_text(filename: &str, raw_text: &str) -> Self {
        Document {
            filename: filename.to_string(),
            path: filename.to_string(),
            raw_text: raw_text.to_string(),
            mime_type: "text/plain".to_string(),
        }
    }

    /// Create a new document from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| extraction_error(path, "invalid file name"))?
            .to_string();

        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type: {}", mime_type);

        let raw_text = read_document_content(path, &mime_type)?;

        Ok(Document {
            filename,
            path: path.display().to_string(),
            raw_text,
            mime_type,
        })
    }
}

/// Whether the extractor can handle this MIME type
pub fn is_supported(mime_type: &str) -> bool {
    mime_type.starts_with("application/pdf") || mime_type.starts_with("text/")
}

/// Read content from a document based on its MIME type
pub fn read_document_content<P: AsRef<Path>>(file_path: P, mime_type: &str) -> Result<String> {
    let path = file_path.as_ref();

    match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF document: {}", path.display());
            let content =
                extract_text(path).map_err(|e| extraction_error(path, &e.to_string()))?;

            // PDF extraction can sometimes include excessive whitespace
            let cleaned_content = normalize_whitespace(&content);

            if cleaned_content.is_empty() {
                warn!("Extracted PDF content is empty or contains only whitespace");
            }

            Ok(cleaned_content)
        }

        mime if mime.starts_with("text/") => {
            debug!("Processing text document: {}", path.display());
            let bytes = fs::read(path).map_err(|e| extraction_error(path, &e.to_string()))?;
            Ok(match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!("{} is not valid UTF-8, decoding lossily", path.display());
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            })
        }

        _ => Err(extraction_error(
            path,
            &format!(
                "unsupported document format {}; only text and PDF files are supported",
                mime_type
            ),
        )),
    }
}

fn extraction_error(path: &Path, reason: &str) -> RagError {
    RagError::Extraction {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Walks a directory and yields every supported document in path order
pub struct DirectorySource {
    files: std::vec::IntoIter<PathBuf>,
}

impl DirectorySource {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(RagError::InvalidConfig(format!(
                "document directory {} does not exist",
                root.display()
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let mime = from_path(entry.path()).first_or_octet_stream();
            if is_supported(mime.essence_str()) {
                files.push(entry.into_path());
            } else {
                debug!("Skipping unsupported file {} ({})", entry.path().display(), mime);
            }
        }
        files.sort();

        info!("Found {} documents under {}", files.len(), root.display());
        Ok(DirectorySource {
            files: files.into_iter(),
        })
    }

    /// Number of documents left to read
    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

impl Iterator for DirectorySource {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        self.files.next().map(Document::from_file)
    }
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    // Replace multiple consecutive newlines with double newlines (paragraph separator)
    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
            continue;
        }

        if newline_count > 0 {
            normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
            newline_count = 0;
        }

        // Don't add consecutive spaces
        if !(c == ' ' && prev_char == ' ') {
            normalized.push(c);
        }
        prev_char = c;
    }

    normalized.trim().to_string()
}
