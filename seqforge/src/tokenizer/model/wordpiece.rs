//! Greedy longest-match-first sub-word segmentation.

use std::collections::HashMap;

use tracing::debug;

use super::TokenizerModel;
use crate::vocab::Vocabulary;
use crate::Result;

#[derive(Debug)]
pub struct WordPiece {
    vocab: Vocabulary,
    unk_token: String,
    continuing_subword_prefix: String,
    max_input_chars_per_word: usize,
}

impl WordPiece {
    /// # Errors
    /// Returns [`crate::Error::Config`] if two tokens share an id.
    pub fn new(
        vocab: HashMap<String, u32>,
        unk_token: &str,
        continuing_subword_prefix: &str,
        max_input_chars_per_word: usize,
    ) -> Result<Self> {
        let mut vocab = Vocabulary::from_map(vocab)?;
        if vocab.contains(unk_token) {
            vocab = vocab.with_unk_token(unk_token)?;
        }
        debug!(vocab_size = vocab.len(), unk_token, "Built WordPiece model");
        Ok(Self {
            vocab,
            unk_token: unk_token.to_string(),
            continuing_subword_prefix: continuing_subword_prefix.to_string(),
            max_input_chars_per_word,
        })
    }

    /// Longest known piece of `word` starting at byte `start`.
    fn longest_piece(&self, word: &str, start: usize) -> Option<(String, usize)> {
        let rest = &word[start..];
        let mut ends: Vec<usize> = rest.char_indices().map(|(i, c)| i + c.len_utf8()).collect();
        while let Some(end) = ends.pop() {
            let piece = if start > 0 {
                format!("{}{}", self.continuing_subword_prefix, &rest[..end])
            } else {
                rest[..end].to_string()
            };
            if self.vocab.contains(&piece) {
                return Some((piece, start + end));
            }
        }
        None
    }
}

impl TokenizerModel for WordPiece {
    fn tokenize(&self, pre_token: &str) -> Result<Vec<String>> {
        if pre_token.chars().count() > self.max_input_chars_per_word {
            return Ok(vec![self.unk_token.clone()]);
        }
        let mut pieces = Vec::new();
        let mut start = 0;
        while start < pre_token.len() {
            match self.longest_piece(pre_token, start) {
                Some((piece, end)) => {
                    pieces.push(piece);
                    start = end;
                }
                // No partial credit: the whole word is unknown.
                None => return Ok(vec![self.unk_token.clone()]),
            }
        }
        Ok(pieces)
    }

    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }
}
