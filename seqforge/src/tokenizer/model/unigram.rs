//! Unigram language-model segmentation (SentencePiece style).

use tracing::debug;

use super::{byte_fallback_tokens, TokenizerModel};
use crate::trie::Trie;
use crate::vocab::Vocabulary;
use crate::{Error, Result};

/// Penalty subtracted from the lowest vocabulary score for unknown chars.
const UNK_PENALTY: f64 = 10.0;

/// Viterbi segmentation over a lattice of vocabulary pieces.
#[derive(Debug)]
pub struct Unigram {
    vocab: Vocabulary,
    /// Indexed by token id.
    scores: Vec<f64>,
    trie: Trie,
    unk_score: f64,
    byte_fallback: bool,
}

/// Best path ending at one char position.
#[derive(Debug, Clone, Copy)]
struct Node {
    score: f64,
    /// Char position the last piece starts at.
    start: usize,
    /// `None` marks an unknown single char.
    id: Option<u32>,
}

impl Unigram {
    /// # Errors
    /// Returns [`Error::Config`] if the vocabulary is empty or `unk_id` is out
    /// of range.
    pub fn new(vocab: Vec<(String, f64)>, unk_id: Option<u32>, byte_fallback: bool) -> Result<Self> {
        if vocab.is_empty() {
            return Err(Error::config("Unigram vocabulary is empty"));
        }
        let scores: Vec<f64> = vocab.iter().map(|(_, s)| *s).collect();
        let min_score = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let trie: Trie = vocab.iter().map(|(t, _)| t.as_str()).collect();

        let mut vocabulary = Vocabulary::from_tokens(vocab.into_iter().map(|(t, _)| t));
        if let Some(id) = unk_id {
            vocabulary = vocabulary.with_unk_id(id)?;
        }

        debug!(
            vocab_size = vocabulary.len(),
            min_score,
            byte_fallback,
            "Built Unigram model"
        );

        Ok(Self {
            vocab: vocabulary,
            scores,
            trie,
            unk_score: min_score - UNK_PENALTY,
            byte_fallback,
        })
    }

    /// Highest-scoring segmentation as `(piece, id)` pairs; unknown pieces
    /// carry `None` and are already fused.
    fn viterbi<'a>(&self, text: &'a str) -> Vec<(&'a str, Option<u32>)> {
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let n = offsets.len() - 1;
        let mut best: Vec<Option<Node>> = vec![None; n + 1];
        best[0] = Some(Node {
            score: 0.0,
            start: 0,
            id: None,
        });

        for start in 0..n {
            let Some(reached) = best[start] else {
                continue;
            };
            let suffix = &text[offsets[start]..];
            let mut has_single_char = false;
            for piece in self.trie.common_prefix_search(suffix) {
                let Some(id) = self.vocab.token_to_id(piece) else {
                    continue;
                };
                let len = piece.chars().count();
                has_single_char |= len == 1;
                let score = reached.score + self.scores[id as usize];
                relax(&mut best[start + len], score, start, Some(id));
            }
            if !has_single_char {
                relax(&mut best[start + 1], reached.score + self.unk_score, start, None);
            }
        }

        let mut pieces = Vec::new();
        let mut pos = n;
        while pos > 0 {
            let Some(node) = best[pos] else { break };
            pieces.push((&text[offsets[node.start]..offsets[pos]], node.id, node.start));
            pos = node.start;
        }
        pieces.reverse();

        // Fuse runs of unknown chars into one piece.
        let mut fused: Vec<(&str, Option<u32>)> = Vec::with_capacity(pieces.len());
        let mut run_start: Option<usize> = None;
        for (i, &(piece, id, start)) in pieces.iter().enumerate() {
            if id.is_some() {
                fused.push((piece, id));
                run_start = None;
                continue;
            }
            match run_start {
                Some(first) if i > 0 => {
                    let begin = offsets[first];
                    let end = offsets[start] + piece.len();
                    if let Some(last) = fused.last_mut() {
                        *last = (&text[begin..end], None);
                    }
                }
                _ => {
                    run_start = Some(start);
                    fused.push((piece, None));
                }
            }
        }
        fused
    }
}

/// Replace `slot` only on a strictly better score, so the first path found
/// wins ties.
fn relax(slot: &mut Option<Node>, score: f64, start: usize, id: Option<u32>) {
    if slot.map_or(true, |node| score > node.score) {
        *slot = Some(Node { score, start, id });
    }
}

impl TokenizerModel for Unigram {
    fn tokenize(&self, pre_token: &str) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        for (piece, id) in self.viterbi(pre_token) {
            if id.is_some() {
                tokens.push(piece.to_string());
                continue;
            }
            if self.byte_fallback {
                if let Some(bytes) = byte_fallback_tokens(&self.vocab, piece) {
                    tokens.extend(bytes);
                    continue;
                }
            }
            let unk = self.vocab.unk_token().ok_or_else(|| {
                Error::Tokenizer(format!(
                    "{piece:?} cannot be segmented and the model has no unknown token"
                ))
            })?;
            tokens.push(unk.to_string());
        }
        Ok(tokens)
    }

    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }
}
