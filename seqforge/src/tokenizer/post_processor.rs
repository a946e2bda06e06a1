//! Special-token insertion around one or two encoded sequences.

use std::collections::HashMap;

use serde::Deserialize;

use crate::Result;

/// Tokens after post-processing, with a segment id per token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedTokens {
    pub tokens: Vec<String>,
    pub token_type_ids: Vec<u32>,
}

impl ProcessedTokens {
    /// `a` then `b` with no special tokens; `b` gets segment id 1.
    #[must_use]
    pub fn concat(a: Vec<String>, b: Option<Vec<String>>) -> Self {
        let mut token_type_ids = vec![0; a.len()];
        let mut tokens = a;
        if let Some(b) = b {
            token_type_ids.extend(std::iter::repeat(1).take(b.len()));
            tokens.extend(b);
        }
        Self {
            tokens,
            token_type_ids,
        }
    }

    fn push(&mut self, token: &str, type_id: u32) {
        self.tokens.push(token.to_string());
        self.token_type_ids.push(type_id);
    }

    fn extend(&mut self, tokens: &[String], type_id: u32) {
        self.tokens.extend_from_slice(tokens);
        self.token_type_ids
            .extend(std::iter::repeat(type_id).take(tokens.len()));
    }
}

/// Inserts special tokens around a single sequence or a sequence pair.
pub trait PostProcessor: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Returns an error if processing fails.
    fn post_process(&self, a: Vec<String>, b: Option<Vec<String>>) -> Result<ProcessedTokens>;

    /// Number of special tokens added for a single input or a pair.
    fn added_tokens(&self, is_pair: bool) -> usize {
        self.post_process(Vec::new(), is_pair.then(Vec::new))
            .map_or(0, |p| p.tokens.len())
    }
}

/// Which input a template `Sequence` piece refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SequenceId {
    A,
    B,
}

/// One element of a `TemplateProcessing` template.
#[derive(Debug, Clone, Deserialize)]
pub enum TemplatePiece {
    SpecialToken {
        id: String,
        #[serde(default)]
        type_id: u32,
    },
    Sequence {
        id: SequenceId,
        #[serde(default)]
        type_id: u32,
    },
}

/// `special_tokens` entry of a `TemplateProcessing` config.
#[derive(Debug, Clone, Deserialize)]
pub struct SpecialTokenSpec {
    pub id: String,
    #[serde(default)]
    pub ids: Vec<u32>,
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// `post_processor` entry of `tokenizer.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PostProcessorConfig {
    TemplateProcessing {
        single: Vec<TemplatePiece>,
        #[serde(default)]
        pair: Vec<TemplatePiece>,
        #[serde(default)]
        special_tokens: HashMap<String, SpecialTokenSpec>,
    },
    BertProcessing {
        sep: (String, u32),
        cls: (String, u32),
    },
    RobertaProcessing {
        sep: (String, u32),
        cls: (String, u32),
    },
    ByteLevel,
    Sequence {
        processors: Vec<PostProcessorConfig>,
    },
}

impl PostProcessorConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TemplateProcessing { .. } => "TemplateProcessing",
            Self::BertProcessing { .. } => "BertProcessing",
            Self::RobertaProcessing { .. } => "RobertaProcessing",
            Self::ByteLevel => "ByteLevel",
            Self::Sequence { .. } => "Sequence",
        }
    }

    /// `(token, id)` pairs this processor may insert.
    #[must_use]
    pub fn special_tokens(&self) -> Vec<(String, u32)> {
        match self {
            Self::TemplateProcessing { special_tokens, .. } => special_tokens
                .values()
                .flat_map(|special| special.tokens.iter().cloned().zip(special.ids.iter().copied()))
                .collect(),
            Self::BertProcessing { sep, cls } | Self::RobertaProcessing { sep, cls } => {
                vec![cls.clone(), sep.clone()]
            }
            Self::ByteLevel => Vec::new(),
            Self::Sequence { processors } => processors
                .iter()
                .flat_map(PostProcessorConfig::special_tokens)
                .collect(),
        }
    }

    /// Construct the configured post-processor.
    ///
    /// # Errors
    /// Returns an error if a nested processor fails to build.
    pub fn build(&self) -> Result<Box<dyn PostProcessor>> {
        Ok(match self {
            Self::TemplateProcessing {
                single,
                pair,
                special_tokens,
            } => Box::new(Template {
                single: single.clone(),
                pair: pair.clone(),
                special_tokens: special_tokens
                    .iter()
                    .map(|(k, v)| (k.clone(), v.tokens.clone()))
                    .collect(),
            }),
            Self::BertProcessing { sep, cls } => Box::new(Bert {
                sep: sep.0.clone(),
                cls: cls.0.clone(),
            }),
            Self::RobertaProcessing { sep, cls } => Box::new(Roberta {
                sep: sep.0.clone(),
                cls: cls.0.clone(),
            }),
            Self::ByteLevel => Box::new(Passthrough),
            Self::Sequence { processors } => {
                // ByteLevel only trims offsets, which are not tracked here.
                let mut children: Vec<Box<dyn PostProcessor>> = processors
                    .iter()
                    .filter(|p| !matches!(p, Self::ByteLevel))
                    .map(PostProcessorConfig::build)
                    .collect::<Result<_>>()?;
                match children.len() {
                    0 => Box::new(Passthrough),
                    1 => children.remove(0),
                    _ => Box::new(Sequence(children)),
                }
            }
        })
    }
}

#[derive(Debug)]
struct Template {
    single: Vec<TemplatePiece>,
    pair: Vec<TemplatePiece>,
    special_tokens: HashMap<String, Vec<String>>,
}

impl PostProcessor for Template {
    fn post_process(&self, a: Vec<String>, b: Option<Vec<String>>) -> Result<ProcessedTokens> {
        let template = if b.is_some() && !self.pair.is_empty() {
            &self.pair
        } else {
            &self.single
        };
        let mut out = ProcessedTokens::default();
        for piece in template {
            match piece {
                TemplatePiece::SpecialToken { id, type_id } => match self.special_tokens.get(id) {
                    Some(tokens) if !tokens.is_empty() => out.extend(tokens, *type_id),
                    _ => out.push(id, *type_id),
                },
                TemplatePiece::Sequence {
                    id: SequenceId::A,
                    type_id,
                } => out.extend(&a, *type_id),
                TemplatePiece::Sequence {
                    id: SequenceId::B,
                    type_id,
                } => {
                    if let Some(b) = &b {
                        out.extend(b, *type_id);
                    }
                }
            }
        }
        // A pair with only a single template still keeps the second sequence.
        if self.pair.is_empty() {
            if let Some(b) = b {
                out.extend(&b, 1);
            }
        }
        Ok(out)
    }
}

/// `[CLS] A [SEP]` / `[CLS] A [SEP] B [SEP]`.
#[derive(Debug)]
struct Bert {
    sep: String,
    cls: String,
}

impl PostProcessor for Bert {
    fn post_process(&self, a: Vec<String>, b: Option<Vec<String>>) -> Result<ProcessedTokens> {
        let mut out = ProcessedTokens::default();
        out.push(&self.cls, 0);
        out.extend(&a, 0);
        out.push(&self.sep, 0);
        if let Some(b) = b {
            out.extend(&b, 1);
            out.push(&self.sep, 1);
        }
        Ok(out)
    }
}

/// `<s> A </s>` / `<s> A </s></s> B </s>`.
#[derive(Debug)]
struct Roberta {
    sep: String,
    cls: String,
}

impl PostProcessor for Roberta {
    fn post_process(&self, a: Vec<String>, b: Option<Vec<String>>) -> Result<ProcessedTokens> {
        let mut out = ProcessedTokens::default();
        out.push(&self.cls, 0);
        out.extend(&a, 0);
        out.push(&self.sep, 0);
        if let Some(b) = b {
            out.push(&self.sep, 0);
            out.extend(&b, 0);
            out.push(&self.sep, 0);
        }
        Ok(out)
    }
}

#[derive(Debug)]
struct Passthrough;

impl PostProcessor for Passthrough {
    fn post_process(&self, a: Vec<String>, b: Option<Vec<String>>) -> Result<ProcessedTokens> {
        Ok(ProcessedTokens::concat(a, b))
    }
}

/// Children run in order; the first one sees the pair, later ones see the
/// already-merged tokens and keep the earlier segment ids.
#[derive(Debug)]
struct Sequence(Vec<Box<dyn PostProcessor>>);

impl PostProcessor for Sequence {
    fn post_process(&self, a: Vec<String>, b: Option<Vec<String>>) -> Result<ProcessedTokens> {
        let mut children = self.0.iter();
        let Some(first) = children.next() else {
            return Ok(ProcessedTokens::concat(a, b));
        };
        let mut current = first.post_process(a, b)?;
        for child in children {
            let next = child.post_process(current.tokens, None)?;
            let mut type_ids = current.token_type_ids;
            type_ids.resize(next.tokens.len(), 0);
            current = ProcessedTokens {
                tokens: next.tokens,
                token_type_ids: type_ids,
            };
        }
        Ok(current)
    }
}
