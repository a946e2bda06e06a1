//! Segmentation models: pre-token → sub-word tokens.

mod bpe;
mod unigram;
mod wordpiece;

use std::collections::HashMap;

use serde::Deserialize;

use crate::vocab::Vocabulary;
use crate::Result;

pub use bpe::{Bpe, BpeOptions};
pub use unigram::Unigram;
pub use wordpiece::WordPiece;

/// Splits a single pre-token into vocabulary tokens.
pub trait TokenizerModel: Send + Sync + std::fmt::Debug {
    /// Segment one pre-token into token strings.
    ///
    /// # Errors
    /// Returns an error if the pre-token cannot be represented.
    fn tokenize(&self, pre_token: &str) -> Result<Vec<String>>;

    /// The model's own vocabulary (without added tokens).
    fn vocab(&self) -> &Vocabulary;

    /// Segment every pre-token and map the pieces to ids.
    ///
    /// # Errors
    /// Returns an error if a piece is unknown and no unknown token exists.
    fn encode(&self, pre_tokens: &[String]) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for pre_token in pre_tokens {
            for token in self.tokenize(pre_token)? {
                ids.push(self.vocab().resolve(&token)?);
            }
        }
        Ok(ids)
    }
}

/// A BPE merge rule, written either as `"a b"` or `["a", "b"]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MergeRule {
    Joined(String),
    Pair(String, String),
}

/// `model` entry of `tokenizer.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum TokenizerModelConfig {
    #[serde(rename = "BPE")]
    Bpe {
        vocab: HashMap<String, u32>,
        #[serde(default)]
        merges: Vec<MergeRule>,
        #[serde(default)]
        unk_token: Option<String>,
        #[serde(default)]
        continuing_subword_prefix: Option<String>,
        #[serde(default)]
        end_of_word_suffix: Option<String>,
        #[serde(default)]
        byte_fallback: bool,
        #[serde(default)]
        fuse_unk: bool,
        #[serde(default)]
        ignore_merges: bool,
    },
    Unigram {
        vocab: Vec<(String, f64)>,
        #[serde(default)]
        unk_id: Option<u32>,
        #[serde(default)]
        byte_fallback: bool,
    },
    WordPiece {
        vocab: HashMap<String, u32>,
        #[serde(default = "default_wordpiece_unk")]
        unk_token: String,
        #[serde(default = "default_wordpiece_prefix")]
        continuing_subword_prefix: String,
        #[serde(default = "default_max_input_chars")]
        max_input_chars_per_word: usize,
    },
}

fn default_wordpiece_unk() -> String {
    "[UNK]".to_string()
}

pub(crate) fn default_wordpiece_prefix() -> String {
    "##".to_string()
}

fn default_max_input_chars() -> usize {
    100
}

impl TokenizerModelConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bpe { .. } => "BPE",
            Self::Unigram { .. } => "Unigram",
            Self::WordPiece { .. } => "WordPiece",
        }
    }

    /// Construct the configured model.
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] if the vocabulary or merges are malformed.
    pub fn build(&self) -> Result<Box<dyn TokenizerModel>> {
        Ok(match self {
            Self::Bpe {
                vocab,
                merges,
                unk_token,
                continuing_subword_prefix,
                end_of_word_suffix,
                byte_fallback,
                fuse_unk,
                ignore_merges,
            } => {
                let options = BpeOptions {
                    unk_token: unk_token.clone(),
                    continuing_subword_prefix: continuing_subword_prefix.clone(),
                    end_of_word_suffix: end_of_word_suffix.clone(),
                    byte_fallback: *byte_fallback,
                    fuse_unk: *fuse_unk,
                    ignore_merges: *ignore_merges,
                };
                Box::new(Bpe::new(vocab.clone(), merges, options)?)
            }
            Self::Unigram {
                vocab,
                unk_id,
                byte_fallback,
            } => Box::new(Unigram::new(vocab.clone(), *unk_id, *byte_fallback)?),
            Self::WordPiece {
                vocab,
                unk_token,
                continuing_subword_prefix,
                max_input_chars_per_word,
            } => Box::new(WordPiece::new(
                vocab.clone(),
                unk_token,
                continuing_subword_prefix,
                *max_input_chars_per_word,
            )?),
        })
    }
}

/// `<0xAB>` spelling of a raw byte.
pub(crate) fn byte_token(byte: u8) -> String {
    format!("<0x{byte:02X}>")
}

/// Byte-fallback pieces for `text`, or `None` if any byte token is missing.
pub(crate) fn byte_fallback_tokens(vocab: &Vocabulary, text: &str) -> Option<Vec<String>> {
    text.bytes()
        .map(|b| {
            let token = byte_token(b);
            vocab.contains(&token).then_some(token)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_type_rejected() {
        let err = serde_json::from_str::<TokenizerModelConfig>(r#"{"type":"Mystery","vocab":{}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_merges_in_both_spellings() {
        let cfg: TokenizerModelConfig = serde_json::from_str(
            r#"{"type":"BPE","vocab":{"a":0,"b":1,"ab":2,"c":3,"abc":4},
                "merges":["a b",["ab","c"]]}"#,
        )
        .unwrap();
        let model = cfg.build().unwrap();
        assert_eq!(model.tokenize("abc").unwrap(), vec!["abc"]);
    }

    #[test]
    fn test_byte_fallback_tokens() {
        let vocab = Vocabulary::from_tokens(["<0x41>", "<0x42>"]);
        assert_eq!(
            byte_fallback_tokens(&vocab, "AB"),
            Some(vec!["<0x41>".to_string(), "<0x42>".to_string()])
        );
        assert_eq!(byte_fallback_tokens(&vocab, "AC"), None);
    }
}
