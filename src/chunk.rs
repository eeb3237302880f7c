//! Token-aware, structure-aware text chunker.
//!
//! Splits are attempted in order of preference: section headings, paragraph
//! breaks, sentence boundaries, word boundaries, and last-resort character
//! boundaries. Chunks are then packed greedily up to a preset's `max_tokens`,
//! carrying the trailing `overlap_tokens` words into the next chunk so that
//! adjacent chunks from the same page overlap by exactly `overlap_tokens`
//! words. "Tokens" here are approximated as whitespace-separated words, the
//! same chars-per-token-style approximation the rest of this codebase uses
//! for embedding batch sizing.

use uuid::Uuid;

use crate::config::ChunkingStrategy;
use crate::models::{Chunk, Page};

/// Split a document's pages into [`Chunk`]s under the given preset.
/// `chunk_index` is contiguous across the whole document, not per-page.
pub fn chunk_document(
    document_id: &str,
    source_name: &str,
    pages: &[Page],
    strategy: ChunkingStrategy,
) -> Vec<Chunk> {
    let max_tokens = strategy.max_tokens();
    let overlap_tokens = strategy.overlap_tokens();
    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    for page in pages {
        if page.text.trim().is_empty() {
            continue;
        }
        let pieces = split_into_pieces(&page.text, max_tokens);
        for text in pack_pieces(&pieces, max_tokens, overlap_tokens) {
            if text.trim().is_empty() {
                continue;
            }
            chunks.push(make_chunk(
                document_id,
                source_name,
                Some(page.page_number),
                chunk_index,
                &text,
            ));
            chunk_index += 1;
        }
    }

    chunks
}

fn make_chunk(
    document_id: &str,
    source_name: &str,
    page: Option<u32>,
    chunk_index: i64,
    text: &str,
) -> Chunk {
    Chunk {
        chunk_id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        source_name: source_name.to_string(),
        page,
        chunk_index,
        token_count: word_count(text).max(1),
        text: text.to_string(),
        embedding: None,
        content_type: "text".to_string(),
    }
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

// ============ Boundary-preference splitting ============

/// Break page text into pieces, each at most `max_tokens` words where
/// possible, preferring to cut at the highest-fidelity boundary available.
fn split_into_pieces(text: &str, max_tokens: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    for section in split_sections(text) {
        if word_count(&section) <= max_tokens {
            push_nonempty(&mut pieces, section);
            continue;
        }
        for para in section.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }
            if word_count(para) <= max_tokens {
                push_nonempty(&mut pieces, para.to_string());
                continue;
            }
            for sentence in split_sentences(para) {
                if word_count(&sentence) <= max_tokens {
                    push_nonempty(&mut pieces, sentence);
                    continue;
                }
                for group in split_words(&sentence, max_tokens) {
                    push_nonempty(&mut pieces, group);
                }
            }
        }
    }
    pieces
}

fn push_nonempty(pieces: &mut Vec<String>, s: String) {
    if !s.trim().is_empty() {
        pieces.push(s);
    }
}

/// Split on heading-like lines (markdown `#` headers, short all-caps lines,
/// short label lines ending in `:`). Falls back to the whole text as one
/// section when no heading is detected.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if looks_like_heading(line) && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    if sections.is_empty() {
        sections.push(text.to_string());
    }
    sections
}

fn looks_like_heading(line: &str) -> bool {
    let t = line.trim();
    if t.is_empty() || t.len() > 80 || t.split_whitespace().count() > 10 {
        return false;
    }
    if t.starts_with('#') {
        return true;
    }
    if t.ends_with(':') {
        return true;
    }
    let letters: Vec<char> = t.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return false;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters.len() as f64 > 0.8
}

/// Split on sentence-ending punctuation followed by whitespace or EOF.
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut buf = String::new();

    for (i, &c) in chars.iter().enumerate() {
        buf.push(c);
        if matches!(c, '.' | '!' | '?') && (i + 1 == chars.len() || chars[i + 1].is_whitespace()) {
            let s = buf.trim().to_string();
            if !s.is_empty() {
                sentences.push(s);
            }
            buf.clear();
        }
    }
    let tail = buf.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Group words into chunks of at most `max_tokens`; a pathologically long
/// single "word" (no internal whitespace) is split at character boundaries
/// as the last-resort fallback.
fn split_words(text: &str, max_tokens: usize) -> Vec<String> {
    let max_tokens = max_tokens.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out = Vec::new();

    for group in words.chunks(max_tokens) {
        if group.len() == 1 && group[0].len() > max_tokens * 20 {
            out.extend(split_chars(group[0], max_tokens * 6));
        } else {
            out.push(group.join(" "));
        }
    }
    out
}

fn split_chars(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    text.chars()
        .collect::<Vec<char>>()
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

// ============ Greedy packing with overlap ============

/// Pack pieces into `max_tokens`-bounded chunks, carrying the trailing
/// `overlap_tokens` words of each flushed chunk into the start of the next.
fn pack_pieces(pieces: &[String], max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let max_tokens = max_tokens.max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for piece in pieces {
        let mut piece_words: Vec<String> =
            piece.split_whitespace().map(|w| w.to_string()).collect();
        if piece_words.is_empty() {
            continue;
        }

        if piece_words.len() > max_tokens {
            if !current.is_empty() {
                chunks.push(current.join(" "));
                current.clear();
            }
            for group in piece_words.chunks(max_tokens) {
                chunks.push(group.join(" "));
            }
            continue;
        }

        // Flush the chunk in progress, carrying its trailing overlap_tokens
        // words into the next one.
        if !current.is_empty() && current.len() + piece_words.len() > max_tokens {
            chunks.push(current.join(" "));
            let keep = overlap_tokens.min(current.len());
            current = current.split_off(current.len() - keep);
        }

        // The carried overlap plus the new piece can still overflow
        // max_tokens (e.g. overlap 50 + a near-max-length piece). Pull only
        // as many piece words as fit, flush, and carry overlap forward again
        // until what's left fits — every boundary still overlaps exactly,
        // and no words are ever dropped.
        while current.len() + piece_words.len() > max_tokens {
            let space = max_tokens.saturating_sub(current.len());
            let take: Vec<String> = piece_words.drain(..space.min(piece_words.len())).collect();
            current.extend(take);
            chunks.push(current.join(" "));
            let keep = overlap_tokens.min(current.len());
            current = current.split_off(current.len() - keep);
        }

        current.append(&mut piece_words);
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32, text: &str) -> Page {
        Page {
            page_number: n,
            text: text.to_string(),
            extracted_images: Vec::new(),
        }
    }

    #[test]
    fn small_text_single_chunk() {
        let pages = vec![page(1, "Hello, world!")];
        let chunks = chunk_document("doc1", "a.txt", &pages, ChunkingStrategy::Balanced);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].page, Some(1));
    }

    #[test]
    fn empty_page_produces_no_chunks() {
        let pages = vec![page(1, "")];
        let chunks = chunk_document("doc1", "a.txt", &pages, ChunkingStrategy::Balanced);
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_indices_contiguous_across_pages() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let pages = vec![page(1, &text), page(2, &text)];
        let chunks = chunk_document("doc1", "a.txt", &pages, ChunkingStrategy::Precise);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn token_count_respects_preset_bound() {
        let text = (0..2000)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let pages = vec![page(1, &text)];
        let chunks = chunk_document("doc1", "a.txt", &pages, ChunkingStrategy::Precise);
        for c in &chunks {
            assert!(c.token_count >= 1);
            assert!(c.token_count <= ChunkingStrategy::Precise.max_tokens());
        }
    }

    #[test]
    fn adjacent_chunks_overlap_by_overlap_tokens() {
        let text = (0..2000)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let pages = vec![page(1, &text)];
        let strategy = ChunkingStrategy::Precise;
        let chunks = chunk_document("doc1", "a.txt", &pages, strategy);
        let overlap = strategy.overlap_tokens();
        for pair in chunks.windows(2) {
            let a_words: Vec<&str> = pair[0].text.split_whitespace().collect();
            let b_words: Vec<&str> = pair[1].text.split_whitespace().collect();
            if a_words.len() < overlap || b_words.len() < overlap {
                continue;
            }
            let a_suffix = &a_words[a_words.len() - overlap..];
            let b_prefix = &b_words[..overlap];
            assert_eq!(a_suffix, b_prefix);
        }
    }

    #[test]
    fn heading_is_detected_as_section_boundary() {
        assert!(looks_like_heading("INTRODUCTION"));
        assert!(looks_like_heading("# Section One"));
        assert!(looks_like_heading("Summary:"));
        assert!(!looks_like_heading(
            "This is a normal sentence that should not be treated as a heading."
        ));
    }

    #[test]
    fn deterministic() {
        let pages = vec![page(1, "Alpha beta gamma delta epsilon zeta eta theta.")];
        let c1 = chunk_document("doc1", "a.txt", &pages, ChunkingStrategy::Balanced);
        let c2 = chunk_document("doc1", "a.txt", &pages, ChunkingStrategy::Balanced);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }
}
