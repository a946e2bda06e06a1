//! Text → text normalization stage.

use base64::Engine as _;
use fancy_regex::Regex;
use serde::Deserialize;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::{Error, Result};

/// A text → text transform applied before pre-tokenization.
pub trait Normalizer: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Returns an error if a regex-backed normalizer fails to match.
    fn normalize(&self, text: &str) -> Result<String>;
}

/// A search pattern as written in `tokenizer.json`: a literal string or a regex.
#[derive(Debug, Clone, Deserialize)]
pub enum Pattern {
    String(String),
    Regex(String),
}

impl Pattern {
    /// # Errors
    /// Returns [`Error::Regex`] if the pattern does not compile.
    pub fn compile(&self) -> Result<Regex> {
        let source = match self {
            Self::String(s) => fancy_regex::escape(s).into_owned(),
            Self::Regex(r) => r.clone(),
        };
        Ok(Regex::new(&source)?)
    }
}

/// `normalizer` entry of `tokenizer.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum NormalizerConfig {
    Lowercase,
    #[serde(rename = "NFC")]
    Nfc,
    #[serde(rename = "NFD")]
    Nfd,
    #[serde(rename = "NFKC")]
    Nfkc,
    #[serde(rename = "NFKD")]
    Nfkd,
    StripAccents,
    Strip {
        #[serde(default = "default_true")]
        strip_left: bool,
        #[serde(default = "default_true")]
        strip_right: bool,
    },
    Replace {
        pattern: Pattern,
        content: String,
    },
    Prepend {
        prepend: String,
    },
    BertNormalizer {
        #[serde(default = "default_true")]
        clean_text: bool,
        #[serde(default = "default_true")]
        handle_chinese_chars: bool,
        #[serde(default)]
        strip_accents: Option<bool>,
        #[serde(default = "default_true")]
        lowercase: bool,
    },
    Precompiled {
        #[serde(default)]
        precompiled_charsmap: Option<String>,
    },
    Sequence {
        normalizers: Vec<NormalizerConfig>,
    },
}

fn default_true() -> bool {
    true
}

impl NormalizerConfig {
    /// Short variant name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lowercase => "Lowercase",
            Self::Nfc => "NFC",
            Self::Nfd => "NFD",
            Self::Nfkc => "NFKC",
            Self::Nfkd => "NFKD",
            Self::StripAccents => "StripAccents",
            Self::Strip { .. } => "Strip",
            Self::Replace { .. } => "Replace",
            Self::Prepend { .. } => "Prepend",
            Self::BertNormalizer { .. } => "BertNormalizer",
            Self::Precompiled { .. } => "Precompiled",
            Self::Sequence { .. } => "Sequence",
        }
    }

    /// Construct the configured normalizer.
    ///
    /// # Errors
    /// Returns an error if a pattern or precompiled map is malformed.
    pub fn build(&self) -> Result<Box<dyn Normalizer>> {
        Ok(match self {
            Self::Lowercase => Box::new(Lowercase),
            Self::Nfc => Box::new(UnicodeForm::Nfc),
            Self::Nfd => Box::new(UnicodeForm::Nfd),
            Self::Nfkc => Box::new(UnicodeForm::Nfkc),
            Self::Nfkd => Box::new(UnicodeForm::Nfkd),
            Self::StripAccents => Box::new(StripAccents),
            Self::Strip {
                strip_left,
                strip_right,
            } => Box::new(Strip {
                left: *strip_left,
                right: *strip_right,
            }),
            Self::Replace { pattern, content } => Box::new(Replace {
                regex: pattern.compile()?,
                content: content.clone(),
            }),
            Self::Prepend { prepend } => Box::new(Prepend(prepend.clone())),
            Self::BertNormalizer {
                clean_text,
                handle_chinese_chars,
                strip_accents,
                lowercase,
            } => Box::new(BertNormalizer {
                clean_text: *clean_text,
                handle_chinese_chars: *handle_chinese_chars,
                strip_accents: strip_accents.unwrap_or(*lowercase),
                lowercase: *lowercase,
            }),
            Self::Precompiled {
                precompiled_charsmap,
            } => match precompiled_charsmap {
                Some(encoded) if !encoded.is_empty() => Box::new(Precompiled::from_base64(encoded)?),
                _ => Box::new(Sequence(Vec::new())),
            },
            Self::Sequence { normalizers } => Box::new(Sequence(
                normalizers
                    .iter()
                    .map(NormalizerConfig::build)
                    .collect::<Result<_>>()?,
            )),
        })
    }
}

#[derive(Debug)]
struct Lowercase;

impl Normalizer for Lowercase {
    fn normalize(&self, text: &str) -> Result<String> {
        Ok(text.to_lowercase())
    }
}

#[derive(Debug, Clone, Copy)]
enum UnicodeForm {
    Nfc,
    Nfd,
    Nfkc,
    Nfkd,
}

impl Normalizer for UnicodeForm {
    fn normalize(&self, text: &str) -> Result<String> {
        Ok(match self {
            Self::Nfc => text.nfc().collect(),
            Self::Nfd => text.nfd().collect(),
            Self::Nfkc => text.nfkc().collect(),
            Self::Nfkd => text.nfkd().collect(),
        })
    }
}

/// Removes combining marks. Only meaningful after NFD/NFKD.
#[derive(Debug)]
struct StripAccents;

impl Normalizer for StripAccents {
    fn normalize(&self, text: &str) -> Result<String> {
        Ok(text.chars().filter(|&c| !is_combining_mark(c)).collect())
    }
}

#[derive(Debug)]
struct Strip {
    left: bool,
    right: bool,
}

impl Normalizer for Strip {
    fn normalize(&self, text: &str) -> Result<String> {
        let mut s = text;
        if self.left {
            s = s.trim_start();
        }
        if self.right {
            s = s.trim_end();
        }
        Ok(s.to_string())
    }
}

#[derive(Debug)]
struct Replace {
    regex: Regex,
    content: String,
}

impl Normalizer for Replace {
    fn normalize(&self, text: &str) -> Result<String> {
        replace_all(&self.regex, text, &self.content)
    }
}

/// Literal (non-expanding) replacement of every non-empty match.
pub(crate) fn replace_all(regex: &Regex, text: &str, content: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in regex.find_iter(text) {
        let m = m?;
        if m.start() == m.end() {
            continue;
        }
        out.push_str(&text[last..m.start()]);
        out.push_str(content);
        last = m.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[derive(Debug)]
struct Prepend(String);

impl Normalizer for Prepend {
    fn normalize(&self, text: &str) -> Result<String> {
        if text.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("{}{text}", self.0))
    }
}

#[derive(Debug)]
struct BertNormalizer {
    clean_text: bool,
    handle_chinese_chars: bool,
    strip_accents: bool,
    lowercase: bool,
}

/// Control (Cc), format (Cf) and private-use (Co) chars, except the
/// whitespace controls.
fn is_control(c: char) -> bool {
    if matches!(c, '\t' | '\n' | '\r') {
        return false;
    }
    c.is_control()
        || matches!(
            u32::from(c),
            0x00AD
                | 0x0600..=0x0605
                | 0x061C
                | 0x06DD
                | 0x070F
                | 0x0890..=0x0891
                | 0x08E2
                | 0x180E
                | 0x200B..=0x200F
                | 0x202A..=0x202E
                | 0x2060..=0x2064
                | 0x2066..=0x206F
                | 0xFEFF
                | 0xFFF9..=0xFFFB
                | 0x110BD
                | 0x110CD
                | 0x13430..=0x1343F
                | 0x1BCA0..=0x1BCA3
                | 0x1D173..=0x1D17A
                | 0xE0001
                | 0xE0020..=0xE007F
                | 0xE000..=0xF8FF
                | 0xF0000..=0xFFFFD
                | 0x100000..=0x10FFFD
        )
}

fn is_chinese_char(c: char) -> bool {
    matches!(
        u32::from(c),
        0x4E00..=0x9FFF
            | 0x3400..=0x4DBF
            | 0x20000..=0x2A6DF
            | 0x2A700..=0x2B73F
            | 0x2B740..=0x2B81F
            | 0x2B820..=0x2CEAF
            | 0xF900..=0xFAFF
            | 0x2F800..=0x2FA1F
    )
}

impl Normalizer for BertNormalizer {
    fn normalize(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if self.clean_text {
                if c == '\0' || c == '\u{FFFD}' || is_control(c) {
                    continue;
                }
                if c.is_whitespace() {
                    out.push(' ');
                    continue;
                }
            }
            if self.handle_chinese_chars && is_chinese_char(c) {
                out.push(' ');
                out.push(c);
                out.push(' ');
            } else {
                out.push(c);
            }
        }
        if self.strip_accents {
            out = out.nfd().filter(|&c| !is_combining_mark(c)).collect();
        }
        if self.lowercase {
            out = out.to_lowercase();
        }
        Ok(out)
    }
}

#[derive(Debug)]
struct Sequence(Vec<Box<dyn Normalizer>>);

impl Normalizer for Sequence {
    fn normalize(&self, text: &str) -> Result<String> {
        let mut current = text.to_string();
        for n in &self.0 {
            current = n.normalize(&current)?;
        }
        Ok(current)
    }
}

// ---------------------------------------------------------------------------
// SentencePiece precompiled character map
// ---------------------------------------------------------------------------

/// A SentencePiece `precompiled_charsmap`: a darts-clone double-array trie
/// from UTF-8 byte sequences to offsets in a NUL-separated replacement blob.
#[derive(Debug)]
pub struct Precompiled {
    units: Vec<u32>,
    normalized: Vec<u8>,
}

fn unit_has_leaf(unit: u32) -> bool {
    (unit >> 8) & 1 == 1
}

fn unit_value(unit: u32) -> u32 {
    unit & 0x7FFF_FFFF
}

fn unit_label(unit: u32) -> u32 {
    unit & ((1 << 31) | 0xFF)
}

fn unit_offset(unit: u32) -> usize {
    ((unit >> 10) << ((unit & (1 << 9)) >> 6)) as usize
}

impl Precompiled {
    /// # Errors
    /// Returns [`Error::Config`] if the payload is not valid base64 or is
    /// truncated.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        Self::from_bytes(&bytes)
    }

    /// # Errors
    /// Returns [`Error::Config`] if the blob is truncated.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: [u8; 4] = bytes
            .get(..4)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| Error::config("precompiled charsmap is too short"))?;
        let trie_size = u32::from_le_bytes(header) as usize;
        let trie_end = 4 + trie_size;
        if trie_size % 4 != 0 || bytes.len() < trie_end {
            return Err(Error::config("precompiled charsmap trie is truncated"));
        }
        let units = bytes[4..trie_end]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            units,
            normalized: bytes[trie_end..].to_vec(),
        })
    }

    /// Every key that prefixes `key`, shortest first, as
    /// `(matched byte length, blob offset)`.
    fn prefix_matches(&self, key: &[u8]) -> Vec<(usize, usize)> {
        let mut matches = Vec::new();
        let Some(&root) = self.units.first() else {
            return matches;
        };
        let mut pos = unit_offset(root);
        for (i, &byte) in key.iter().enumerate() {
            if byte == 0 {
                break;
            }
            pos ^= usize::from(byte);
            let Some(&unit) = self.units.get(pos) else {
                break;
            };
            if unit_label(unit) != u32::from(byte) {
                break;
            }
            pos ^= unit_offset(unit);
            if unit_has_leaf(unit) {
                let Some(&leaf) = self.units.get(pos) else {
                    break;
                };
                matches.push((i + 1, unit_value(leaf) as usize));
            }
        }
        matches
    }

    fn replacement(&self, offset: usize) -> Option<&str> {
        let rest = self.normalized.get(offset..)?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        std::str::from_utf8(&rest[..end]).ok()
    }
}

impl Normalizer for Precompiled {
    fn normalize(&self, text: &str) -> Result<String> {
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;
        while pos < text.len() {
            // Longest match that ends on a char boundary.
            let matched = self
                .prefix_matches(&bytes[pos..])
                .into_iter()
                .rev()
                .filter(|&(len, _)| text.is_char_boundary(pos + len))
                .find_map(|(len, offset)| self.replacement(offset).map(|r| (len, r)));
            if let Some((len, replacement)) = matched {
                out.push_str(replacement);
                pos += len;
            } else {
                let ch_len = text[pos..].chars().next().map_or(1, char::len_utf8);
                out.push_str(&text[pos..pos + ch_len]);
                pos += ch_len;
            }
        }
        Ok(out)
    }
}
