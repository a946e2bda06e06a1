//! Added tokens: literal strings matched before normalization.

use fancy_regex::Regex;
use serde::Deserialize;

use crate::Result;

/// An `added_tokens` entry of `tokenizer.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddedToken {
    pub id: u32,
    pub content: String,
    #[serde(default)]
    pub special: bool,
    /// Absorb whitespace to the left of the match.
    #[serde(default)]
    pub lstrip: bool,
    /// Absorb whitespace to the right of the match.
    #[serde(default)]
    pub rstrip: bool,
    #[serde(default)]
    pub single_word: bool,
    #[serde(default)]
    pub normalized: bool,
}

/// A slice of the input: ordinary text or a matched added token.
#[derive(Debug, Clone, Copy)]
pub enum Section<'a> {
    Text { text: &'a str, offset: usize },
    Added(&'a AddedToken),
}

/// Splits text on added-token occurrences, longest content first.
#[derive(Debug, Default)]
pub struct AddedTokenSplitter {
    tokens: Vec<AddedToken>,
    regex: Option<Regex>,
}

impl AddedTokenSplitter {
    /// # Errors
    /// Returns [`crate::Error::Regex`] if the alternation fails to compile.
    pub fn new(tokens: Vec<AddedToken>) -> Result<Self> {
        let mut contents: Vec<&str> = tokens
            .iter()
            .map(|t| t.content.as_str())
            .filter(|c| !c.is_empty())
            .collect();
        contents.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        contents.dedup();
        let regex = if contents.is_empty() {
            None
        } else {
            let alternation = contents
                .iter()
                .map(|c| fancy_regex::escape(c))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&alternation)?)
        };
        Ok(Self { tokens, regex })
    }

    #[must_use]
    pub fn tokens(&self) -> &[AddedToken] {
        &self.tokens
    }

    fn lookup(&self, content: &str) -> Option<&AddedToken> {
        self.tokens.iter().find(|t| t.content == content)
    }

    /// Split `text` into ordinary sections and added-token matches, in order.
    /// Empty text sections are dropped.
    ///
    /// # Errors
    /// Returns an error if matching fails.
    pub fn split<'a>(&'a self, text: &'a str) -> Result<Vec<Section<'a>>> {
        let Some(regex) = &self.regex else {
            return Ok(if text.is_empty() {
                Vec::new()
            } else {
                vec![Section::Text { text, offset: 0 }]
            });
        };

        let mut sections = Vec::new();
        let mut cursor = 0;
        for m in regex.find_iter(text) {
            let m = m?;
            let Some(token) = self.lookup(m.as_str()) else {
                continue;
            };
            let mut start = m.start();
            let mut end = m.end();
            if start < cursor {
                continue;
            }
            if token.lstrip {
                start = cursor + text[cursor..start].trim_end().len();
            }
            if token.rstrip {
                end = text.len() - text[end..].trim_start().len();
            }
            if start > cursor {
                sections.push(Section::Text {
                    text: &text[cursor..start],
                    offset: cursor,
                });
            }
            sections.push(Section::Added(token));
            cursor = end;
        }
        if cursor < text.len() {
            sections.push(Section::Text {
                text: &text[cursor..],
                offset: cursor,
            });
        }
        Ok(sections)
    }
}
