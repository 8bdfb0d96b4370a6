//! Deterministic word-window chunking.
//!
//! The window and overlap are tunables, not correctness constants, but
//! the split must be reproducible for a given input so a re-run of the
//! embedding stage replaces chunks with identical content.

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub size_words: usize,
    pub overlap_words: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            size_words: 256,
            overlap_words: 20,
        }
    }
}

pub fn split_into_chunks(text: &str, config: ChunkerConfig) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let size = config.size_words.max(1);
    let step = size.saturating_sub(config.overlap_words).max(1);

    // One window per stride, including a short trailing window, so a
    // given input always splits into the same chunk set.
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize, overlap: usize) -> ChunkerConfig {
        ChunkerConfig {
            size_words: size,
            overlap_words: overlap,
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_into_chunks("", ChunkerConfig::default()).is_empty());
        assert!(split_into_chunks("   \n\t ", ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_into_chunks("just a few words", config(256, 20));
        assert_eq!(chunks, vec!["just a few words"]);
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let text = (0..10).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let chunks = split_into_chunks(&text, config(4, 2));

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0], "0 1 2 3");
        assert_eq!(chunks[1], "2 3 4 5");
        assert_eq!(chunks[2], "4 5 6 7");
        assert_eq!(chunks[3], "6 7 8 9");
        assert_eq!(chunks.last().unwrap(), "8 9");
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let first = split_into_chunks(text, config(3, 1));
        let second = split_into_chunks(text, config(3, 1));
        assert_eq!(first, second);
    }

    #[test]
    fn every_word_appears_in_some_chunk() {
        let text = (0..50).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = split_into_chunks(&text, config(7, 3));
        let joined = chunks.join(" ");
        for i in 0..50 {
            assert!(joined.contains(&format!("w{i}")));
        }
    }
}
