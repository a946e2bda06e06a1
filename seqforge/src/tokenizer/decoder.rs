//! Token strings → text, undoing pre-tokenizer and model surface forms.

use fancy_regex::Regex;
use serde::Deserialize;

use super::byte_level;
use super::normalizer::{replace_all, Pattern};
use super::pre_tokenizer::{default_replacement, resolve_prepend_scheme, PrependScheme};
use crate::Result;

/// Turns a token sequence back into text.
pub trait Decoder: Send + Sync + std::fmt::Debug {
    /// Transform tokens into text fragments that concatenate to the output.
    ///
    /// # Errors
    /// Returns an error if a regex-backed decoder fails to match.
    fn decode_chain(&self, tokens: Vec<String>) -> Result<Vec<String>>;

    /// # Errors
    /// Returns an error if a regex-backed decoder fails to match.
    fn decode(&self, tokens: Vec<String>) -> Result<String> {
        Ok(self.decode_chain(tokens)?.concat())
    }
}

/// Undo the spacing artifacts of whitespace tokenization.
#[must_use]
pub fn clean_up_tokenization(text: &str) -> String {
    text.replace(" .", ".")
        .replace(" ?", "?")
        .replace(" !", "!")
        .replace(" ,", ",")
        .replace(" ' ", "'")
        .replace(" n't", "n't")
        .replace(" 'm", "'m")
        .replace(" 's", "'s")
        .replace(" 've", "'ve")
        .replace(" 're", "'re")
}

/// `decoder` entry of `tokenizer.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DecoderConfig {
    WordPiece {
        #[serde(default = "super::model::default_wordpiece_prefix")]
        prefix: String,
        #[serde(default = "default_true")]
        cleanup: bool,
    },
    Metaspace {
        #[serde(default = "default_replacement")]
        replacement: char,
        #[serde(default)]
        prepend_scheme: Option<PrependScheme>,
        #[serde(default)]
        add_prefix_space: Option<bool>,
    },
    ByteLevel,
    #[serde(rename = "BPEDecoder")]
    BpeDecoder {
        #[serde(default = "default_bpe_suffix")]
        suffix: String,
    },
    ByteFallback,
    Fuse,
    Strip {
        content: char,
        #[serde(default)]
        start: usize,
        #[serde(default)]
        stop: usize,
    },
    Replace {
        pattern: Pattern,
        content: String,
    },
    Sequence {
        decoders: Vec<DecoderConfig>,
    },
}

fn default_true() -> bool {
    true
}

fn default_bpe_suffix() -> String {
    "</w>".to_string()
}

impl DecoderConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WordPiece { .. } => "WordPiece",
            Self::Metaspace { .. } => "Metaspace",
            Self::ByteLevel => "ByteLevel",
            Self::BpeDecoder { .. } => "BPEDecoder",
            Self::ByteFallback => "ByteFallback",
            Self::Fuse => "Fuse",
            Self::Strip { .. } => "Strip",
            Self::Replace { .. } => "Replace",
            Self::Sequence { .. } => "Sequence",
        }
    }

    /// Construct the configured decoder.
    ///
    /// # Errors
    /// Returns an error if a pattern does not compile.
    pub fn build(&self) -> Result<Box<dyn Decoder>> {
        Ok(match self {
            Self::WordPiece { prefix, cleanup } => Box::new(WordPiece {
                prefix: prefix.clone(),
                cleanup: *cleanup,
            }),
            Self::Metaspace {
                replacement,
                prepend_scheme,
                add_prefix_space,
            } => Box::new(Metaspace {
                replacement: *replacement,
                strip_leading: resolve_prepend_scheme(*prepend_scheme, *add_prefix_space)
                    != PrependScheme::Never,
            }),
            Self::ByteLevel => Box::new(ByteLevel),
            Self::BpeDecoder { suffix } => Box::new(BpeSuffix(suffix.clone())),
            Self::ByteFallback => Box::new(ByteFallback),
            Self::Fuse => Box::new(Fuse),
            Self::Strip {
                content,
                start,
                stop,
            } => Box::new(Strip {
                content: *content,
                start: *start,
                stop: *stop,
            }),
            Self::Replace { pattern, content } => Box::new(Replace {
                regex: pattern.compile()?,
                content: content.clone(),
            }),
            Self::Sequence { decoders } => Box::new(Sequence(
                decoders
                    .iter()
                    .map(DecoderConfig::build)
                    .collect::<Result<_>>()?,
            )),
        })
    }
}

#[derive(Debug)]
struct WordPiece {
    prefix: String,
    cleanup: bool,
}

impl Decoder for WordPiece {
    fn decode_chain(&self, tokens: Vec<String>) -> Result<Vec<String>> {
        Ok(tokens
            .into_iter()
            .enumerate()
            .map(|(i, token)| {
                let token = if i == 0 {
                    token
                } else if let Some(rest) = token.strip_prefix(self.prefix.as_str()) {
                    rest.to_string()
                } else {
                    format!(" {token}")
                };
                if self.cleanup {
                    clean_up_tokenization(&token)
                } else {
                    token
                }
            })
            .collect())
    }
}

#[derive(Debug)]
struct Metaspace {
    replacement: char,
    strip_leading: bool,
}

impl Decoder for Metaspace {
    fn decode_chain(&self, tokens: Vec<String>) -> Result<Vec<String>> {
        Ok(tokens
            .into_iter()
            .enumerate()
            .map(|(i, token)| {
                let text = token.replace(self.replacement, " ");
                if i == 0 && self.strip_leading {
                    text.strip_prefix(' ').map(str::to_string).unwrap_or(text)
                } else {
                    text
                }
            })
            .collect())
    }
}

#[derive(Debug)]
struct ByteLevel;

impl Decoder for ByteLevel {
    fn decode_chain(&self, tokens: Vec<String>) -> Result<Vec<String>> {
        Ok(vec![byte_level::decode_bytes(&tokens.concat())])
    }
}

#[derive(Debug)]
struct BpeSuffix(String);

impl Decoder for BpeSuffix {
    fn decode_chain(&self, tokens: Vec<String>) -> Result<Vec<String>> {
        let last = tokens.len().saturating_sub(1);
        Ok(tokens
            .into_iter()
            .enumerate()
            .map(|(i, token)| token.replace(&self.0, if i == last { "" } else { " " }))
            .collect())
    }
}

/// Reassembles `<0xAB>` byte tokens into UTF-8 text.
#[derive(Debug)]
struct ByteFallback;

fn parse_byte_token(token: &str) -> Option<u8> {
    let hex = token.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

fn flush_bytes(bytes: &mut Vec<u8>, out: &mut Vec<String>) {
    if bytes.is_empty() {
        return;
    }
    match String::from_utf8(std::mem::take(bytes)) {
        Ok(text) => out.push(text),
        Err(err) => {
            let n = err.as_bytes().len();
            out.extend(std::iter::repeat("\u{FFFD}".to_string()).take(n));
        }
    }
}

impl Decoder for ByteFallback {
    fn decode_chain(&self, tokens: Vec<String>) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut pending = Vec::new();
        for token in tokens {
            if let Some(byte) = parse_byte_token(&token) {
                pending.push(byte);
            } else {
                flush_bytes(&mut pending, &mut out);
                out.push(token);
            }
        }
        flush_bytes(&mut pending, &mut out);
        Ok(out)
    }
}

#[derive(Debug)]
struct Fuse;

impl Decoder for Fuse {
    fn decode_chain(&self, tokens: Vec<String>) -> Result<Vec<String>> {
        Ok(vec![tokens.concat()])
    }
}

#[derive(Debug)]
struct Strip {
    content: char,
    start: usize,
    stop: usize,
}

impl Decoder for Strip {
    fn decode_chain(&self, tokens: Vec<String>) -> Result<Vec<String>> {
        Ok(tokens
            .into_iter()
            .map(|token| {
                let mut s = token.as_str();
                for _ in 0..self.start {
                    match s.strip_prefix(self.content) {
                        Some(rest) => s = rest,
                        None => break,
                    }
                }
                for _ in 0..self.stop {
                    match s.strip_suffix(self.content) {
                        Some(rest) => s = rest,
                        None => break,
                    }
                }
                s.to_string()
            })
            .collect())
    }
}

#[derive(Debug)]
struct Replace {
    regex: Regex,
    content: String,
}

impl Decoder for Replace {
    fn decode_chain(&self, tokens: Vec<String>) -> Result<Vec<String>> {
        tokens
            .iter()
            .map(|t| replace_all(&self.regex, t, &self.content))
            .collect()
    }
}

#[derive(Debug)]
struct Sequence(Vec<Box<dyn Decoder>>);

impl Decoder for Sequence {
    fn decode_chain(&self, tokens: Vec<String>) -> Result<Vec<String>> {
        self.0
            .iter()
            .try_fold(tokens, |tokens, decoder| decoder.decode_chain(tokens))
    }
}
