//! ABOUTME: Sentence-window text splitting used by the document splitter step

/// Split text into chunks of at most `chunk_size` characters, preferring
/// sentence boundaries, with `overlap` characters carried between chunks.
#[must_use]
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size.saturating_sub(1));
    let sentences = split_sentences(text);

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for sentence in sentences {
        if !current.is_empty() && current.len() + sentence.len() > chunk_size {
            push_chunk(&mut chunks, &current);
            let tail_start = current.len().saturating_sub(overlap);
            let tail = carry_tail(&current, tail_start);
            current = tail;
        }
        // A single sentence longer than the window is hard-wrapped.
        if sentence.len() > chunk_size {
            for piece in hard_wrap(&sentence, chunk_size) {
                if !current.is_empty() {
                    push_chunk(&mut chunks, &current);
                    current.clear();
                }
                current = piece;
                push_chunk(&mut chunks, &current);
                current.clear();
            }
            continue;
        }
        current.push_str(&sentence);
    }
    push_chunk(&mut chunks, &current);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, chunk: &str) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn carry_tail(current: &str, start: usize) -> String {
    let mut index = start;
    while index < current.len() && !current.is_char_boundary(index) {
        index += 1;
    }
    current[index..].to_string()
}

fn hard_wrap(sentence: &str, chunk_size: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < sentence.len() {
        let mut end = (start + chunk_size).min(sentence.len());
        while end < sentence.len() && !sentence.is_char_boundary(end) {
            end += 1;
        }
        pieces.push(sentence[start..end].to_string());
        start = end;
    }
    pieces
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?' | '\n') {
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = split_text("One sentence.", 100, 10);
        assert_eq!(chunks, vec!["One sentence."]);
    }

    #[test]
    fn test_chunks_respect_sentence_boundaries() {
        let text = "First sentence here. Second sentence here. Third sentence here.";
        let chunks = split_text(text, 45, 0);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn test_overlap_carries_trailing_text() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
        let chunks = split_text(text, 30, 10);
        assert!(chunks.len() >= 2);
        let tail: String = chunks[0].chars().rev().take(5).collect();
        let reversed_tail: String = tail.chars().rev().collect();
        assert!(chunks[1].contains(reversed_tail.trim()));
    }

    #[test]
    fn test_oversized_sentence_hard_wraps() {
        let long = "x".repeat(120);
        let chunks = split_text(&long, 50, 5);
        assert!(chunks.iter().all(|c| c.len() <= 50));
        let total: usize = chunks.iter().map(String::len).sum();
        assert_eq!(total, 120);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(split_text("", 100, 10).is_empty());
    }
}
