//! The five-stage tokenizer: normalize, pre-tokenize, segment, post-process,
//! and decode, plus batch padding and truncation.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use super::added_tokens::{AddedTokenSplitter, Section};
use super::config::{Side, SpecialTokenValue, TokenizerJson, TokenizerOptions};
use super::decoder::{clean_up_tokenization, Decoder};
use super::model::TokenizerModel;
use super::normalizer::Normalizer;
use super::post_processor::{PostProcessor, ProcessedTokens};
use super::pre_tokenizer::PreTokenizer;
use super::Tokenizer;
use crate::vocab::Vocabulary;
use crate::{Error, Result};

/// Ids of one encoded input with their segment ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoding {
    pub ids: Vec<u32>,
    pub token_type_ids: Vec<u32>,
}

impl Encoding {
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// How a batch is padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    #[default]
    None,
    /// Pad to the longest sequence in the batch.
    Longest,
    /// Pad to `max_length` (or `model_max_length`).
    MaxLength,
}

/// Options for [`TokenizerPipeline::encode_batch`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub add_special_tokens: bool,
    pub padding: Padding,
    pub truncation: bool,
    pub max_length: Option<usize>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            add_special_tokens: true,
            padding: Padding::None,
            truncation: false,
            max_length: None,
        }
    }
}

/// Options for [`TokenizerPipeline::decode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    pub skip_special_tokens: bool,
    /// Overrides `clean_up_tokenization_spaces` from the tokenizer options.
    pub clean_up_tokenization_spaces: Option<bool>,
}

/// Result of batch encoding. All three tables have the same shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchEncoding {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    pub token_type_ids: Vec<Vec<u32>>,
}

/// A tokenizer assembled from a `tokenizer.json` description.
///
/// Stages hold only immutable configuration after construction, so a
/// pipeline can be shared across threads and reused freely.
#[derive(Debug)]
pub struct TokenizerPipeline {
    normalizer: Option<Box<dyn Normalizer>>,
    pre_tokenizer: Option<Box<dyn PreTokenizer>>,
    model: Box<dyn TokenizerModel>,
    post_processor: Option<Box<dyn PostProcessor>>,
    decoder: Option<Box<dyn Decoder>>,
    added_tokens: AddedTokenSplitter,
    /// Model vocabulary plus added and post-processor tokens.
    vocab: Vocabulary,
    special_ids: HashSet<u32>,
    options: TokenizerOptions,
    bos_token_id: Option<u32>,
    eos_token_id: Option<u32>,
    pad_token_id: Option<u32>,
}

impl TokenizerPipeline {
    /// Build every stage. Invalid stage configuration fails here rather
    /// than on first use.
    ///
    /// # Errors
    /// Returns [`Error::Config`] or [`Error::Regex`] if a stage cannot be built.
    pub fn from_config(config: TokenizerJson, options: TokenizerOptions) -> Result<Self> {
        let normalizer = config.normalizer.as_ref().map(|c| c.build()).transpose()?;
        let pre_tokenizer = config
            .pre_tokenizer
            .as_ref()
            .map(|c| c.build())
            .transpose()?;
        let model = config.model.build()?;
        let post_processor = config
            .post_processor
            .as_ref()
            .map(|c| c.build())
            .transpose()?;
        let decoder = config.decoder.as_ref().map(|c| c.build()).transpose()?;

        let mut vocab = model.vocab().clone();
        let mut special_ids = HashSet::new();
        for token in &config.added_tokens {
            let id = vocab.insert(&token.content, token.id)?;
            if token.special {
                special_ids.insert(id);
            }
        }
        if let Some(pp) = &config.post_processor {
            for (token, id) in pp.special_tokens() {
                special_ids.insert(vocab.insert(&token, id)?);
            }
        }

        let lookup = |value: &Option<SpecialTokenValue>| {
            value.as_ref().and_then(|v| vocab.token_to_id(v.content()))
        };
        let bos_token_id = lookup(&options.bos_token);
        let eos_token_id = lookup(&options.eos_token);
        let pad_token_id = lookup(&options.pad_token);
        let unk_token_id = lookup(&options.unk_token);
        special_ids.extend(
            [bos_token_id, eos_token_id, pad_token_id, unk_token_id]
                .into_iter()
                .flatten(),
        );

        debug!(
            normalizer = config.normalizer.as_ref().map_or("none", |c| c.kind()),
            pre_tokenizer = config.pre_tokenizer.as_ref().map_or("none", |c| c.kind()),
            model = config.model.kind(),
            post_processor = config.post_processor.as_ref().map_or("none", |c| c.kind()),
            decoder = config.decoder.as_ref().map_or("none", |c| c.kind()),
            vocab_size = vocab.len(),
            added_tokens = config.added_tokens.len(),
            "Built tokenizer pipeline"
        );

        Ok(Self {
            normalizer,
            pre_tokenizer,
            model,
            post_processor,
            decoder,
            added_tokens: AddedTokenSplitter::new(config.added_tokens)?,
            vocab,
            special_ids,
            options,
            bos_token_id,
            eos_token_id,
            pad_token_id,
        })
    }

    /// # Errors
    /// Returns an error if the JSON is malformed or a stage cannot be built.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_config(TokenizerJson::from_json_str(json)?, TokenizerOptions::default())
    }

    /// # Errors
    /// Returns an error if the file cannot be read or a stage cannot be built.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(TokenizerJson::from_file(path)?, TokenizerOptions::default())
    }

    /// Load `tokenizer.json` and, when present, `tokenizer_config.json` from
    /// a local model directory.
    ///
    /// # Errors
    /// Returns an error if `tokenizer.json` is missing or invalid.
    pub fn from_pretrained(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let tokenizer_path = dir.join("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(Error::config(format!(
                "no tokenizer.json found in {}",
                dir.display()
            )));
        }
        let config_path = dir.join("tokenizer_config.json");
        let options = if config_path.exists() {
            TokenizerOptions::from_file(&config_path)?
        } else {
            TokenizerOptions::default()
        };
        Self::from_config(TokenizerJson::from_file(&tokenizer_path)?, options)
    }

    // ---- Encoding ----

    /// Segment `text` into tokens, without special tokens.
    fn tokenize_text(&self, text: &str) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        for section in self.added_tokens.split(text)? {
            match section {
                Section::Added(token) => tokens.push(token.content.clone()),
                Section::Text { text, offset } => {
                    let normalized = match &self.normalizer {
                        Some(n) => n.normalize(text)?,
                        None => text.to_string(),
                    };
                    let pre_tokens = match &self.pre_tokenizer {
                        Some(p) => p.pre_tokenize_section(&normalized, offset == 0)?,
                        None => vec![normalized],
                    };
                    for pre_token in pre_tokens.iter().filter(|p| !p.is_empty()) {
                        tokens.extend(self.model.tokenize(pre_token)?);
                    }
                }
            }
        }
        Ok(tokens)
    }

    /// Tokens of `text` followed by those of `pair`, without special tokens.
    ///
    /// # Errors
    /// Returns an error if any stage fails.
    pub fn tokenize(&self, text: &str, pair: Option<&str>) -> Result<Vec<String>> {
        let mut tokens = self.tokenize_text(text)?;
        if let Some(pair) = pair {
            tokens.extend(self.tokenize_text(pair)?);
        }
        Ok(tokens)
    }

    fn assemble(
        &self,
        a: Vec<String>,
        b: Option<Vec<String>>,
        add_special_tokens: bool,
    ) -> Result<Encoding> {
        let processed = match &self.post_processor {
            Some(pp) if add_special_tokens => pp.post_process(a, b)?,
            _ => ProcessedTokens::concat(a, b),
        };
        Ok(Encoding {
            ids: self.convert_tokens_to_ids(&processed.tokens)?,
            token_type_ids: processed.token_type_ids,
        })
    }

    /// Encode `text` (and an optional second segment) to ids and segment ids.
    ///
    /// # Errors
    /// Returns an error if any stage fails or a token cannot be resolved.
    pub fn encode_with_type_ids(
        &self,
        text: &str,
        pair: Option<&str>,
        add_special_tokens: bool,
    ) -> Result<Encoding> {
        let a = self.tokenize_text(text)?;
        let b = pair.map(|p| self.tokenize_text(p)).transpose()?;
        self.assemble(a, b, add_special_tokens)
    }

    /// # Errors
    /// Returns an error if any stage fails or a token cannot be resolved.
    pub fn encode(
        &self,
        text: &str,
        pair: Option<&str>,
        add_special_tokens: bool,
    ) -> Result<Vec<u32>> {
        Ok(self.encode_with_type_ids(text, pair, add_special_tokens)?.ids)
    }

    /// Encode a batch with optional truncation and padding.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if padding is requested without a pad token
    /// or `pairs` does not match `texts` in length, and any encoding error.
    pub fn encode_batch(
        &self,
        texts: &[&str],
        pairs: Option<&[&str]>,
        options: &EncodeOptions,
    ) -> Result<BatchEncoding> {
        if let Some(pairs) = pairs {
            if pairs.len() != texts.len() {
                return Err(Error::config(format!(
                    "got {} texts but {} pairs",
                    texts.len(),
                    pairs.len()
                )));
            }
        }
        let pad_id = match options.padding {
            Padding::None => None,
            Padding::Longest | Padding::MaxLength => Some(self.pad_token_id.ok_or_else(|| {
                Error::config("padding requested but the tokenizer has no pad token")
            })?),
        };
        let limit = options.max_length.or_else(|| self.options.max_length());

        let mut encodings = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let mut a = self.tokenize_text(text)?;
            let mut b = pairs.map(|p| self.tokenize_text(p[i])).transpose()?;
            if options.truncation {
                if let Some(max) = limit {
                    let reserved = match &self.post_processor {
                        Some(pp) if options.add_special_tokens => pp.added_tokens(b.is_some()),
                        _ => 0,
                    };
                    truncate_longest_first(
                        &mut a,
                        b.as_mut(),
                        max.saturating_sub(reserved),
                        self.options.truncation_side,
                    );
                }
            }
            encodings.push(self.assemble(a, b, options.add_special_tokens)?);
        }

        let longest = encodings.iter().map(Encoding::len).max().unwrap_or(0);
        let target = match options.padding {
            Padding::None => 0,
            Padding::Longest => longest,
            Padding::MaxLength => limit.unwrap_or(longest),
        };

        let mut batch = BatchEncoding::default();
        for encoding in encodings {
            let mut mask = vec![1; encoding.len()];
            let mut ids = encoding.ids;
            let mut type_ids = encoding.token_type_ids;
            if let Some(pad_id) = pad_id {
                let missing = target.saturating_sub(ids.len());
                pad(&mut ids, pad_id, missing, self.options.padding_side);
                pad(&mut mask, 0, missing, self.options.padding_side);
                pad(&mut type_ids, 0, missing, self.options.padding_side);
            }
            batch.input_ids.push(ids);
            batch.attention_mask.push(mask);
            batch.token_type_ids.push(type_ids);
        }
        Ok(batch)
    }

    // ---- Decoding ----

    /// Turn ids back into text.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] if `ids` is empty or holds an id outside the
    /// vocabulary while no unknown token exists.
    pub fn decode(&self, ids: &[u32], options: &DecodeOptions) -> Result<String> {
        if ids.is_empty() {
            return Err(Error::Decode("cannot decode an empty id sequence".to_string()));
        }
        let mut tokens = Vec::with_capacity(ids.len());
        for &id in ids {
            if options.skip_special_tokens && self.special_ids.contains(&id) {
                continue;
            }
            let token = self
                .vocab
                .resolve_token(id)
                .ok_or_else(|| Error::Decode(format!("id {id} is outside the vocabulary")))?;
            tokens.push(token.to_string());
        }
        let text = self.convert_tokens_to_string(tokens)?;
        let clean_up = options
            .clean_up_tokenization_spaces
            .unwrap_or(self.options.clean_up_tokenization_spaces);
        Ok(if clean_up {
            clean_up_tokenization(&text)
        } else {
            text
        })
    }

    /// # Errors
    /// Fails on the first sequence that cannot be decoded.
    pub fn batch_decode(&self, batch: &[Vec<u32>], options: &DecodeOptions) -> Result<Vec<String>> {
        batch.iter().map(|ids| self.decode(ids, options)).collect()
    }

    /// Join tokens through the decoder, or with single spaces when there is
    /// no decoder. No clean-up is applied.
    ///
    /// # Errors
    /// Returns an error if the decoder fails.
    pub fn convert_tokens_to_string(&self, tokens: Vec<String>) -> Result<String> {
        match &self.decoder {
            Some(decoder) => decoder.decode(tokens),
            None => Ok(tokens.join(" ")),
        }
    }

    /// # Errors
    /// Returns [`Error::Tokenizer`] if a token is unknown and there is no
    /// unknown token.
    pub fn convert_tokens_to_ids<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<u32>> {
        tokens.iter().map(|t| self.vocab.resolve(t.as_ref())).collect()
    }

    /// Ids without a token come back as `None`.
    #[must_use]
    pub fn convert_ids_to_tokens(&self, ids: &[u32]) -> Vec<Option<String>> {
        ids.iter()
            .map(|&id| self.vocab.id_to_token(id).map(str::to_string))
            .collect()
    }

    // ---- Accessors ----

    #[must_use]
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    #[must_use]
    pub fn options(&self) -> &TokenizerOptions {
        &self.options
    }

    #[must_use]
    pub fn is_special(&self, id: u32) -> bool {
        self.special_ids.contains(&id)
    }

    #[must_use]
    pub fn bos_token_id(&self) -> Option<u32> {
        self.bos_token_id
    }

    #[must_use]
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.token_to_id(token)
    }
}

impl Tokenizer for TokenizerPipeline {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        TokenizerPipeline::encode(self, text, None, add_special_tokens)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        TokenizerPipeline::decode(
            self,
            ids,
            &DecodeOptions {
                skip_special_tokens,
                clean_up_tokenization_spaces: None,
            },
        )
    }

    fn decode_token(&self, id: u32) -> Result<String> {
        let token = self
            .vocab
            .resolve_token(id)
            .ok_or_else(|| Error::Decode(format!("id {id} is outside the vocabulary")))?;
        self.convert_tokens_to_string(vec![token.to_string()])
    }

    fn vocab_size(&self) -> usize {
        self.vocab.id_space()
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }
}

/// Drop tokens one at a time from whichever sequence is longer until the
/// pair fits in `budget`.
fn truncate_longest_first(
    a: &mut Vec<String>,
    mut b: Option<&mut Vec<String>>,
    budget: usize,
    side: Side,
) {
    loop {
        let b_len = b.as_ref().map_or(0, |b| b.len());
        if a.len() + b_len <= budget {
            return;
        }
        let longer = match b.as_deref_mut() {
            Some(b) if b.len() > a.len() => b,
            _ => &mut *a,
        };
        match side {
            Side::Right => {
                longer.pop();
            }
            Side::Left => {
                longer.remove(0);
            }
        }
    }
}

fn pad(values: &mut Vec<u32>, value: u32, count: usize, side: Side) {
    if count == 0 {
        return;
    }
    match side {
        Side::Right => values.extend(std::iter::repeat(value).take(count)),
        Side::Left => {
            values.splice(0..0, std::iter::repeat(value).take(count));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORDPIECE_JSON: &str = r###"{
        "added_tokens": [
            {"id": 0, "content": "[CLS]", "special": true},
            {"id": 1, "content": "[SEP]", "special": true},
            {"id": 5, "content": "[PAD]", "special": true}
        ],
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "BertPreTokenizer"},
        "model": {
            "type": "WordPiece",
            "vocab": {"[CLS]": 0, "[SEP]": 1, "hello": 2, "world": 3, "[UNK]": 4, "[PAD]": 5,
                      "!": 6, "good": 7, "##bye": 8}
        },
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [{"SpecialToken": {"id": "[CLS]"}}, {"Sequence": {"id": "A"}},
                       {"SpecialToken": {"id": "[SEP]"}}],
            "pair": [{"SpecialToken": {"id": "[CLS]"}}, {"Sequence": {"id": "A"}},
                     {"SpecialToken": {"id": "[SEP]"}},
                     {"Sequence": {"id": "B", "type_id": 1}},
                     {"SpecialToken": {"id": "[SEP]", "type_id": 1}}],
            "special_tokens": {
                "[CLS]": {"id": "[CLS]", "ids": [0], "tokens": ["[CLS]"]},
                "[SEP]": {"id": "[SEP]", "ids": [1], "tokens": ["[SEP]"]}
            }
        },
        "decoder": {"type": "WordPiece"}
    }"###;

    fn pipeline(padding_side: Side) -> TokenizerPipeline {
        let options = TokenizerOptions {
            pad_token: Some(SpecialTokenValue::Text("[PAD]".into())),
            padding_side,
            ..TokenizerOptions::default()
        };
        TokenizerPipeline::from_config(TokenizerJson::from_json_str(WORDPIECE_JSON).unwrap(), options)
            .unwrap()
    }

    #[test]
    fn test_encode_single_and_pair() {
        let tok = pipeline(Side::Right);
        assert_eq!(tok.encode("Hello world", None, true).unwrap(), vec![0, 2, 3, 1]);
        assert_eq!(tok.encode("Hello world", None, false).unwrap(), vec![2, 3]);
        let enc = tok.encode_with_type_ids("hello", Some("goodbye"), true).unwrap();
        assert_eq!(enc.ids, vec![0, 2, 1, 7, 8, 1]);
        assert_eq!(enc.token_type_ids, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_added_tokens_in_text() {
        let tok = pipeline(Side::Right);
        assert_eq!(tok.encode("[CLS] hello", None, false).unwrap(), vec![0, 2]);
        assert_eq!(tok.tokenize("hello zzz", None).unwrap(), vec!["hello", "[UNK]"]);
    }

    #[test]
    fn test_decode_skips_specials_and_cleans_up() {
        let tok = pipeline(Side::Right);
        let skip = DecodeOptions {
            skip_special_tokens: true,
            clean_up_tokenization_spaces: None,
        };
        assert_eq!(tok.decode(&[0, 2, 3, 6, 1], &skip).unwrap(), "hello world!");
        assert_eq!(
            tok.decode(&[0, 2, 1], &DecodeOptions::default()).unwrap(),
            "[CLS] hello [SEP]"
        );
        assert!(matches!(tok.decode(&[], &skip), Err(Error::Decode(_))));
    }

    #[test]
    fn test_batch_padding_right_and_left() {
        let opts = EncodeOptions {
            padding: Padding::Longest,
            ..EncodeOptions::default()
        };
        let right = pipeline(Side::Right)
            .encode_batch(&["hello", "hello world"], None, &opts)
            .unwrap();
        assert_eq!(right.input_ids, vec![vec![0, 2, 1, 5], vec![0, 2, 3, 1]]);
        assert_eq!(right.attention_mask, vec![vec![1, 1, 1, 0], vec![1, 1, 1, 1]]);

        let left = pipeline(Side::Left)
            .encode_batch(&["hello", "hello world"], None, &opts)
            .unwrap();
        assert_eq!(left.input_ids[0], vec![5, 0, 2, 1]);
        assert_eq!(left.attention_mask[0], vec![0, 1, 1, 1]);
    }

    #[test]
    fn test_truncation_reserves_special_tokens() {
        let opts = EncodeOptions {
            truncation: true,
            max_length: Some(4),
            ..EncodeOptions::default()
        };
        let batch = pipeline(Side::Right)
            .encode_batch(&["hello world hello world"], None, &opts)
            .unwrap();
        assert_eq!(batch.input_ids, vec![vec![0, 2, 3, 1]]);
    }

    #[test]
    fn test_padding_without_pad_token_fails() {
        let tok = TokenizerPipeline::from_json_str(WORDPIECE_JSON).unwrap();
        let opts = EncodeOptions {
            padding: Padding::Longest,
            ..EncodeOptions::default()
        };
        assert!(matches!(tok.encode_batch(&["hello"], None, &opts), Err(Error::Config(_))));
    }

    #[test]
    fn test_longest_first_truncation() {
        let mut a: Vec<String> = ["a1", "a2", "a3"].iter().map(|s| (*s).to_string()).collect();
        let mut b: Vec<String> = ["b1", "b2", "b3", "b4", "b5"].iter().map(|s| (*s).to_string()).collect();
        truncate_longest_first(&mut a, Some(&mut b), 5, Side::Right);
        assert_eq!(a, vec!["a1", "a2"]);
        assert_eq!(b, vec!["b1", "b2", "b3"]);
        truncate_longest_first(&mut a, Some(&mut b), 2, Side::Left);
        assert_eq!(a, vec!["a2"]);
        assert_eq!(b, vec!["b3"]);
    }

    #[test]
    fn test_unknown_stage_is_construction_error() {
        let json = r#"{"model": {"type": "Mystery"}}"#;
        assert!(TokenizerPipeline::from_json_str(json).is_err());
    }
}
