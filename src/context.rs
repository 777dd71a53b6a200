use crate::retrieval::SearchHit;
use log::debug;

const SNIPPET_SEPARATOR: &str = "\n";

/// Citation tag for a chunk, e.g. `[report.txt#3]`
pub fn citation_tag(filename: &str, chunk_id: usize) -> String {
    format!("[{}#{}]", filename, chunk_id)
}

/// Format one hit as a tagged snippet
pub fn format_snippet(hit: &SearchHit) -> String {
    format!(
        "{}\n{}\n",
        citation_tag(&hit.metadata.filename, hit.metadata.chunk_id),
        hit.metadata.text_preview
    )
}

/// Pack hits, most relevant first, into a context block of at most
/// `max_chars` characters.
///
/// Assembly stops at the first snippet that would overflow the budget; that
/// snippet and everything after it are dropped rather than cut.
pub fn assemble(hits: &[SearchHit], max_chars: usize) -> String {
    let separator_len = SNIPPET_SEPARATOR.chars().count();
    let mut parts: Vec<String> = Vec::new();
    let mut total = 0;

    for hit in hits {
        let snippet = format_snippet(hit);
        let joined_len = if parts.is_empty() { 0 } else { separator_len };
        let snippet_len = snippet.chars().count() + joined_len;

        if total + snippet_len > max_chars {
            debug!(
                "Context budget reached after {} of {} snippets",
                parts.len(),
                hits.len()
            );
            break;
        }
        parts.push(snippet);
        total += snippet_len;
    }

    parts.join(SNIPPET_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ChunkMetadata;

    fn hit(filename: &str, chunk_id: usize, text: &str) -> SearchHit {
        SearchHit {
            id: chunk_id as u64,
            distance: chunk_id as f32,
            metadata: ChunkMetadata {
                filename: filename.to_string(),
                path: filename.to_string(),
                chunk_id,
                text_preview: text.to_string(),
            },
        }
    }

    #[test]
    fn test_snippets_are_tagged_and_joined() {
        let hits = vec![hit("a.txt", 0, "alpha"), hit("b.txt", 4, "beta")];
        assert_eq!(
            assemble(&hits, 8000),
            "[a.txt#0]\nalpha\n\n[b.txt#4]\nbeta\n"
        );
    }

    #[test]
    fn test_oversized_first_snippet_yields_empty_context() {
        let text = "x".repeat(9000);
        assert_eq!(assemble(&[hit("big.txt", 0, &text)], 8000), "");
    }

    #[test]
    fn test_overflowing_snippet_is_dropped_not_truncated() {
        let hits = vec![
            hit("a.txt", 0, &"a".repeat(40)),
            hit("b.txt", 1, &"b".repeat(40)),
            hit("c.txt", 2, "c"),
        ];
        // First snippet is 9 + 1 + 40 + 1 = 51 chars
        let context = assemble(&hits, 80);
        assert_eq!(context, format!("[a.txt#0]\n{}\n", "a".repeat(40)));
    }

    #[test]
    fn test_output_never_exceeds_budget() {
        let hits: Vec<_> = (0..20)
            .map(|i| hit("doc.txt", i, &"é".repeat(i * 7)))
            .collect();
        for budget in [0, 10, 15, 16, 17, 50, 200, 1000] {
            let context = assemble(&hits, budget);
            assert!(context.chars().count() <= budget, "budget {}", budget);
        }
    }

    #[test]
    fn test_exact_fit_is_kept() {
        let hits = vec![hit("a.txt", 0, "x"), hit("a.txt", 1, "y")];
        // Each snippet is 12 chars, plus one separator
        assert_eq!(assemble(&hits, 25).chars().count(), 25);
        assert_eq!(assemble(&hits, 24).chars().count(), 12);
    }

    #[test]
    fn test_no_hits_is_empty() {
        assert_eq!(assemble(&[], 100), "");
    }
}
