use crate::error::ConfigError;
use crate::models::IndexingOptions;
use std::collections::VecDeque;

/// Coarsest first. The empty separator falls back to single characters.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ".", " ", ""];

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IndexingOptions::default())
    }
}

impl From<&IndexingOptions> for ChunkingConfig {
    fn from(value: &IndexingOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
            separators: DEFAULT_SEPARATORS
                .iter()
                .map(|separator| separator.to_string())
                .collect(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chars == 0 {
            return Err(ConfigError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(ConfigError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Splits `text` into trimmed, non-empty chunks of at most `max_chars`
/// characters. A piece that no configured separator can break is emitted
/// whole even when it is longer than the bound.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    split_recursive(text, &config.separators, config)
        .into_iter()
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

fn split_recursive(text: &str, separators: &[String], config: &ChunkingConfig) -> Vec<String> {
    let mut separator = separators.last().map(String::as_str).unwrap_or("");
    let mut finer: &[String] = &[];

    for (position, candidate) in separators.iter().enumerate() {
        if candidate.is_empty() {
            separator = "";
            break;
        }
        if text.contains(candidate.as_str()) {
            separator = candidate;
            finer = &separators[position + 1..];
            break;
        }
    }

    let mut chunks = Vec::new();
    let mut small_pieces = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < config.max_chars {
            small_pieces.push(piece);
            continue;
        }

        if !small_pieces.is_empty() {
            chunks.extend(merge_pieces(&small_pieces, config));
            small_pieces.clear();
        }

        if finer.is_empty() {
            chunks.push(piece.to_string());
        } else {
            chunks.extend(split_recursive(piece, finer, config));
        }
    }

    if !small_pieces.is_empty() {
        chunks.extend(merge_pieces(&small_pieces, config));
    }

    chunks
}

/// Each separator stays attached to the start of the piece that follows it,
/// so concatenating the pieces gives back the input.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (position, _) in text.match_indices(separator) {
        if position > start {
            pieces.push(&text[start..position]);
        }
        start = position;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedy left-to-right merge. When a chunk is flushed, trailing pieces
/// totalling at most `overlap_chars` are carried into the next chunk.
fn merge_pieces(pieces: &[&str], config: &ChunkingConfig) -> Vec<String> {
    let mut merged = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let length = char_len(piece);

        if total + length > config.max_chars && !window.is_empty() {
            if let Some(chunk) = join_window(&window) {
                merged.push(chunk);
            }

            while total > config.overlap_chars
                || (total + length > config.max_chars && total > 0)
            {
                match window.pop_front() {
                    Some(dropped) => total -= char_len(dropped),
                    None => break,
                }
            }
        }

        window.push_back(piece);
        total += length;
    }

    if let Some(chunk) = join_window(&window) {
        merged.push(chunk);
    }

    merged
}

fn join_window(window: &VecDeque<&str>) -> Option<String> {
    let joined = window.iter().copied().collect::<String>();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chars: usize, overlap_chars: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chars,
            overlap_chars,
            ..ChunkingConfig::default()
        }
    }

    fn numbered_tokens(count: usize) -> String {
        (0..count)
            .map(|index| format!("token{index}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn short_text_is_a_single_trimmed_chunk() {
        let chunks = chunk_text("  Hydraulic pump overview.  ", &ChunkingConfig::default());
        assert_eq!(chunks, vec!["Hydraulic pump overview.".to_string()]);
    }

    #[test]
    fn whitespace_only_input_produces_nothing() {
        assert!(chunk_text(" \n\n \n ", &ChunkingConfig::default()).is_empty());
        assert!(chunk_text("", &ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn chunks_respect_the_bound_and_are_never_blank() {
        let text = format!(
            "{}\n\n{}\n{}",
            numbered_tokens(300),
            "Sentence one. Sentence two. ".repeat(60),
            numbered_tokens(150)
        );
        let chunks = chunk_text(&text, &ChunkingConfig::default());

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 1_000, "chunk too long: {}", chunk.len());
            assert!(!chunk.trim().is_empty());
            assert_eq!(chunk.trim(), chunk);
        }
    }

    #[test]
    fn adjacent_chunks_of_one_span_overlap() {
        let config = ChunkingConfig::default();
        let text = numbered_tokens(400);
        let chunks = chunk_text(&text, &config);

        assert_eq!(chunks.len(), 5);
        for pair in chunks.windows(2) {
            let previous: Vec<&str> = pair[0].split(' ').collect();

            // Each carried word was a piece with its leading space.
            let mut carried = Vec::new();
            let mut carried_chars = 0;
            for word in previous.iter().rev() {
                let piece_chars = word.chars().count() + 1;
                if carried_chars + piece_chars > config.overlap_chars {
                    break;
                }
                carried.insert(0, *word);
                carried_chars += piece_chars;
            }
            assert!(!carried.is_empty());

            let shared = carried.join(" ");
            assert!(shared.chars().count() <= config.overlap_chars);
            assert!(pair[0].ends_with(&shared));
            assert!(
                pair[1].starts_with(&format!("{shared} ")),
                "next chunk should open with the tail of the previous one"
            );

            let first_new_word = pair[1].split(' ').nth(carried.len());
            assert!(first_new_word.is_some_and(|word| !previous.contains(&word)));
        }
    }

    #[test]
    fn paragraph_boundaries_are_preferred() {
        let text = format!("{}\n\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = chunk_text(&text, &config(40, 5));
        assert_eq!(chunks, vec!["a".repeat(30), "b".repeat(30)]);
    }

    #[test]
    fn unbreakable_text_falls_back_to_characters() {
        let chunks = chunk_text(&"a".repeat(25), &config(10, 3));
        assert_eq!(
            chunks,
            vec!["a".repeat(10), "a".repeat(10), "a".repeat(10), "a".repeat(4)]
        );
    }

    #[test]
    fn atomic_token_is_emitted_whole_without_character_fallback() {
        let config = ChunkingConfig {
            max_chars: 10,
            overlap_chars: 2,
            separators: vec!["\n\n".to_string(), " ".to_string()],
        };
        let long_token = "x".repeat(25);
        let chunks = chunk_text(&format!("short {long_token} tail"), &config);

        assert!(chunks.contains(&long_token));
        assert!(chunks
            .iter()
            .filter(|chunk| **chunk != long_token)
            .all(|chunk| chunk.chars().count() <= 10));
    }

    #[test]
    fn multibyte_text_is_measured_in_characters() {
        let text = "é".repeat(30);
        let chunks = chunk_text(&text, &config(10, 2));
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
        assert_eq!(chunks[0], "é".repeat(10));
    }

    #[test]
    fn split_keeps_separators_with_following_piece() {
        assert_eq!(
            split_keeping_separator("a.b.c", "."),
            vec!["a", ".b", ".c"]
        );
        assert_eq!(split_keeping_separator(".a", "."), vec![".a"]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(config(10, 10).validate().is_err());
        assert!(config(0, 0).validate().is_err());
        assert!(config(10, 2).validate().is_ok());
    }
}
