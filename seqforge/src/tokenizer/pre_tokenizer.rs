//! Text → pre-token splitting stage.

use fancy_regex::Regex;
use serde::Deserialize;

use super::byte_level;
use super::normalizer::Pattern;
use crate::Result;

/// GPT-2 splitting pattern used by byte-level tokenizers.
const GPT2_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Unicode punctuation plus every ASCII symbol BERT treats as punctuation.
const PUNCTUATION_CLASS: &str = r"\p{P}\x21-\x2F\x3A-\x40\x5B-\x60\x7B-\x7E";

/// Splits text into pre-tokens that the model segments independently.
pub trait PreTokenizer: Send + Sync + std::fmt::Debug {
    /// Split one section of the input.
    ///
    /// `at_start` is true when `text` begins at the start of the whole input
    /// (no added token or earlier section precedes it).
    ///
    /// # Errors
    /// Returns an error if a regex fails to match.
    fn pre_tokenize_section(&self, text: &str, at_start: bool) -> Result<Vec<String>>;

    /// Split a complete input.
    ///
    /// # Errors
    /// Returns an error if a regex fails to match.
    fn pre_tokenize(&self, text: &str) -> Result<Vec<String>> {
        self.pre_tokenize_section(text, true)
    }
}

/// How a [`PreTokenizerConfig::Split`] treats the delimiters it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum SplitBehavior {
    Removed,
    #[default]
    Isolated,
    MergedWithPrevious,
    MergedWithNext,
    Contiguous,
}

/// When Metaspace prepends its replacement character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrependScheme {
    Always,
    First,
    Never,
}

/// `pre_tokenizer` entry of `tokenizer.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PreTokenizerConfig {
    Whitespace,
    WhitespaceSplit,
    BertPreTokenizer,
    Metaspace {
        #[serde(default = "default_replacement")]
        replacement: char,
        #[serde(default)]
        prepend_scheme: Option<PrependScheme>,
        #[serde(default)]
        add_prefix_space: Option<bool>,
        #[serde(default = "default_true")]
        split: bool,
    },
    ByteLevel {
        #[serde(default = "default_true")]
        add_prefix_space: bool,
        #[serde(default = "default_true")]
        use_regex: bool,
    },
    Split {
        pattern: Pattern,
        #[serde(default)]
        behavior: SplitBehavior,
        #[serde(default)]
        invert: bool,
    },
    Punctuation {
        #[serde(default)]
        behavior: SplitBehavior,
    },
    Digits {
        #[serde(default)]
        individual_digits: bool,
    },
    Sequence {
        pretokenizers: Vec<PreTokenizerConfig>,
    },
}

pub(crate) fn default_replacement() -> char {
    '▁'
}

fn default_true() -> bool {
    true
}

/// Resolve the modern `prepend_scheme` against the legacy `add_prefix_space`.
pub(crate) fn resolve_prepend_scheme(
    scheme: Option<PrependScheme>,
    add_prefix_space: Option<bool>,
) -> PrependScheme {
    match (scheme, add_prefix_space) {
        (Some(s), _) => s,
        (None, Some(false)) => PrependScheme::Never,
        (None, _) => PrependScheme::Always,
    }
}

impl PreTokenizerConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Whitespace => "Whitespace",
            Self::WhitespaceSplit => "WhitespaceSplit",
            Self::BertPreTokenizer => "BertPreTokenizer",
            Self::Metaspace { .. } => "Metaspace",
            Self::ByteLevel { .. } => "ByteLevel",
            Self::Split { .. } => "Split",
            Self::Punctuation { .. } => "Punctuation",
            Self::Digits { .. } => "Digits",
            Self::Sequence { .. } => "Sequence",
        }
    }

    /// Construct the configured pre-tokenizer.
    ///
    /// # Errors
    /// Returns an error if a pattern does not compile.
    pub fn build(&self) -> Result<Box<dyn PreTokenizer>> {
        Ok(match self {
            Self::Whitespace => Box::new(RegexKeep(Regex::new(r"\w+|[^\w\s]+")?)),
            Self::WhitespaceSplit => Box::new(WhitespaceSplit),
            Self::BertPreTokenizer => Box::new(RegexKeep(Regex::new(&format!(
                r"[^\s{PUNCTUATION_CLASS}]+|[{PUNCTUATION_CLASS}]"
            ))?)),
            Self::Metaspace {
                replacement,
                prepend_scheme,
                add_prefix_space,
                split,
            } => Box::new(Metaspace {
                replacement: *replacement,
                prepend_scheme: resolve_prepend_scheme(*prepend_scheme, *add_prefix_space),
                split: *split,
            }),
            Self::ByteLevel {
                add_prefix_space,
                use_regex,
            } => Box::new(ByteLevel {
                add_prefix_space: *add_prefix_space,
                regex: if *use_regex {
                    Some(Regex::new(GPT2_PATTERN)?)
                } else {
                    None
                },
            }),
            Self::Split {
                pattern,
                behavior,
                invert,
            } => Box::new(Split {
                regex: pattern.compile()?,
                behavior: *behavior,
                invert: *invert,
            }),
            Self::Punctuation { behavior } => Box::new(Split {
                regex: Regex::new(&format!("[{PUNCTUATION_CLASS}]"))?,
                behavior: *behavior,
                invert: false,
            }),
            Self::Digits { individual_digits } => Box::new(Split {
                regex: Regex::new(r"\p{N}")?,
                behavior: if *individual_digits {
                    SplitBehavior::Isolated
                } else {
                    SplitBehavior::Contiguous
                },
                invert: false,
            }),
            Self::Sequence { pretokenizers } => Box::new(Sequence(
                pretokenizers
                    .iter()
                    .map(PreTokenizerConfig::build)
                    .collect::<Result<_>>()?,
            )),
        })
    }
}

// ---------------------------------------------------------------------------
// Splitting helpers
// ---------------------------------------------------------------------------

/// Non-empty match ranges of `regex` in `text`.
fn find_matches(regex: &Regex, text: &str) -> Result<Vec<(usize, usize)>> {
    let mut out = Vec::new();
    for m in regex.find_iter(text) {
        let m = m?;
        if m.start() < m.end() {
            out.push((m.start(), m.end()));
        }
    }
    Ok(out)
}

/// Cover `0..len` with alternating gap / match segments, tagged `is_match`.
fn segments(len: usize, matches: &[(usize, usize)]) -> Vec<((usize, usize), bool)> {
    let mut out = Vec::with_capacity(matches.len() * 2 + 1);
    let mut last = 0;
    for &(start, end) in matches {
        if start > last {
            out.push(((last, start), false));
        }
        out.push(((start, end), true));
        last = end;
    }
    if last < len {
        out.push(((last, len), false));
    }
    out
}

fn apply_behavior(
    segments: Vec<((usize, usize), bool)>,
    behavior: SplitBehavior,
) -> Vec<(usize, usize)> {
    match behavior {
        SplitBehavior::Isolated => segments.into_iter().map(|(r, _)| r).collect(),
        SplitBehavior::Removed => segments
            .into_iter()
            .filter(|(_, is_match)| !is_match)
            .map(|(r, _)| r)
            .collect(),
        SplitBehavior::MergedWithPrevious => {
            let mut acc: Vec<(usize, usize)> = Vec::new();
            let mut previous_match = false;
            for (range, is_match) in segments {
                let merge = is_match && !previous_match;
                previous_match = is_match;
                match acc.last_mut() {
                    Some(last) if merge => last.1 = range.1,
                    _ => acc.push(range),
                }
            }
            acc
        }
        SplitBehavior::MergedWithNext => {
            let mut acc: Vec<(usize, usize)> = Vec::new();
            let mut next_match = false;
            for (range, is_match) in segments.into_iter().rev() {
                let merge = is_match && !next_match;
                next_match = is_match;
                match acc.last_mut() {
                    Some(last) if merge => last.0 = range.0,
                    _ => acc.push(range),
                }
            }
            acc.reverse();
            acc
        }
        SplitBehavior::Contiguous => {
            let mut acc: Vec<(usize, usize)> = Vec::new();
            let mut previous_match = false;
            for (range, is_match) in segments {
                let merge = is_match && previous_match;
                previous_match = is_match;
                match acc.last_mut() {
                    Some(last) if merge => last.1 = range.1,
                    _ => acc.push(range),
                }
            }
            acc
        }
    }
}

fn split_by(
    regex: &Regex,
    text: &str,
    behavior: SplitBehavior,
    invert: bool,
) -> Result<Vec<String>> {
    let matches = find_matches(regex, text)?;
    let mut segs = segments(text.len(), &matches);
    if invert {
        for seg in &mut segs {
            seg.1 = !seg.1;
        }
    }
    Ok(apply_behavior(segs, behavior)
        .into_iter()
        .filter(|(s, e)| s < e)
        .map(|(s, e)| text[s..e].to_string())
        .collect())
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Keeps only the matches of a pattern that covers every non-space char.
#[derive(Debug)]
struct RegexKeep(Regex);

impl PreTokenizer for RegexKeep {
    fn pre_tokenize_section(&self, text: &str, _at_start: bool) -> Result<Vec<String>> {
        Ok(find_matches(&self.0, text)?
            .into_iter()
            .map(|(s, e)| text[s..e].to_string())
            .collect())
    }
}

#[derive(Debug)]
struct WhitespaceSplit;

impl PreTokenizer for WhitespaceSplit {
    fn pre_tokenize_section(&self, text: &str, _at_start: bool) -> Result<Vec<String>> {
        Ok(text.split_whitespace().map(str::to_string).collect())
    }
}

#[derive(Debug)]
struct Metaspace {
    replacement: char,
    prepend_scheme: PrependScheme,
    split: bool,
}

impl PreTokenizer for Metaspace {
    fn pre_tokenize_section(&self, text: &str, at_start: bool) -> Result<Vec<String>> {
        let mut replaced: String = text
            .chars()
            .map(|c| if c == ' ' { self.replacement } else { c })
            .collect();
        let prepend = match self.prepend_scheme {
            PrependScheme::Always => true,
            PrependScheme::First => at_start,
            PrependScheme::Never => false,
        };
        if prepend && !replaced.starts_with(self.replacement) {
            replaced.insert(0, self.replacement);
        }
        if !self.split {
            return Ok(vec![replaced]);
        }
        let bounds: Vec<(usize, usize)> = replaced
            .char_indices()
            .filter(|&(_, c)| c == self.replacement)
            .map(|(i, c)| (i, i + c.len_utf8()))
            .collect();
        Ok(
            apply_behavior(segments(replaced.len(), &bounds), SplitBehavior::MergedWithNext)
                .into_iter()
                .map(|(s, e)| replaced[s..e].to_string())
                .collect(),
        )
    }
}

#[derive(Debug)]
struct ByteLevel {
    add_prefix_space: bool,
    regex: Option<Regex>,
}

impl PreTokenizer for ByteLevel {
    fn pre_tokenize_section(&self, text: &str, _at_start: bool) -> Result<Vec<String>> {
        let owned;
        let text = if self.add_prefix_space && !text.starts_with(' ') {
            owned = format!(" {text}");
            owned.as_str()
        } else {
            text
        };
        let pieces = match &self.regex {
            Some(regex) => find_matches(regex, text)?
                .into_iter()
                .map(|(s, e)| &text[s..e])
                .collect(),
            None => vec![text],
        };
        Ok(pieces.into_iter().map(byte_level::encode_bytes).collect())
    }
}

#[derive(Debug)]
struct Split {
    regex: Regex,
    behavior: SplitBehavior,
    invert: bool,
}

impl PreTokenizer for Split {
    fn pre_tokenize_section(&self, text: &str, _at_start: bool) -> Result<Vec<String>> {
        split_by(&self.regex, text, self.behavior, self.invert)
    }
}

#[derive(Debug)]
struct Sequence(Vec<Box<dyn PreTokenizer>>);

impl PreTokenizer for Sequence {
    fn pre_tokenize_section(&self, text: &str, at_start: bool) -> Result<Vec<String>> {
        let mut pieces = vec![text.to_string()];
        for child in &self.0 {
            let mut next = Vec::with_capacity(pieces.len());
            for (i, piece) in pieces.iter().enumerate() {
                next.extend(child.pre_tokenize_section(piece, at_start && i == 0)?);
            }
            pieces = next;
        }
        Ok(pieces)
    }
}
