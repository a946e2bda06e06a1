//! `tokenizer.json` and `tokenizer_config.json` schemas.

use std::path::Path;

use serde::Deserialize;

use super::added_tokens::AddedToken;
use super::decoder::DecoderConfig;
use super::model::TokenizerModelConfig;
use super::normalizer::NormalizerConfig;
use super::post_processor::PostProcessorConfig;
use super::pre_tokenizer::PreTokenizerConfig;
use crate::Result;

/// Root of a `tokenizer.json` file.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenizerJson {
    #[serde(default)]
    pub added_tokens: Vec<AddedToken>,
    #[serde(default)]
    pub normalizer: Option<NormalizerConfig>,
    #[serde(default)]
    pub pre_tokenizer: Option<PreTokenizerConfig>,
    pub model: TokenizerModelConfig,
    #[serde(default)]
    pub post_processor: Option<PostProcessorConfig>,
    #[serde(default)]
    pub decoder: Option<DecoderConfig>,
}

impl TokenizerJson {
    /// # Errors
    /// Returns [`crate::Error::Json`] on malformed JSON or an unknown stage type.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

/// Which end of a sequence padding or truncation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    #[default]
    Right,
}

/// A special token as written in `tokenizer_config.json`: a bare string or an
/// object carrying `content`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SpecialTokenValue {
    Text(String),
    Object { content: String },
}

impl SpecialTokenValue {
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Text(s) | Self::Object { content: s } => s,
        }
    }
}

/// The subset of `tokenizer_config.json` the pipeline uses.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenizerOptions {
    #[serde(default)]
    pub bos_token: Option<SpecialTokenValue>,
    #[serde(default)]
    pub eos_token: Option<SpecialTokenValue>,
    #[serde(default)]
    pub unk_token: Option<SpecialTokenValue>,
    #[serde(default)]
    pub pad_token: Option<SpecialTokenValue>,
    #[serde(default)]
    pub padding_side: Side,
    #[serde(default)]
    pub truncation_side: Side,
    /// Often an absurdly large float in the wild, so parsed as `f64`.
    #[serde(default)]
    pub model_max_length: Option<f64>,
    #[serde(default = "default_clean_up")]
    pub clean_up_tokenization_spaces: bool,
}

fn default_clean_up() -> bool {
    true
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            bos_token: None,
            eos_token: None,
            unk_token: None,
            pad_token: None,
            padding_side: Side::Right,
            truncation_side: Side::Right,
            model_max_length: None,
            clean_up_tokenization_spaces: true,
        }
    }
}

impl TokenizerOptions {
    /// # Errors
    /// Returns [`crate::Error::Json`] on malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// `model_max_length` as a usable bound, if it is one.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn max_length(&self) -> Option<usize> {
        self.model_max_length
            .filter(|&v| v.is_finite() && v >= 0.0 && v < 1e12)
            .map(|v| v as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_accept_both_token_spellings() {
        let opts = TokenizerOptions::from_json_str(
            r#"{"eos_token": "</s>",
                "pad_token": {"content": "<pad>", "lstrip": false},
                "padding_side": "left",
                "model_max_length": 1000000000000000019884624838656}"#,
        )
        .unwrap();
        assert_eq!(opts.eos_token.as_ref().map(SpecialTokenValue::content), Some("</s>"));
        assert_eq!(opts.pad_token.as_ref().map(SpecialTokenValue::content), Some("<pad>"));
        assert_eq!(opts.padding_side, Side::Left);
        assert_eq!(opts.truncation_side, Side::Right);
        assert_eq!(opts.max_length(), None);
        assert!(opts.clean_up_tokenization_spaces);
    }

    #[test]
    fn test_unknown_stage_type_fails_to_parse() {
        let json = r#"{"model":{"type":"WordPiece","vocab":{}},"normalizer":{"type":"Bogus"}}"#;
        assert!(TokenizerJson::from_json_str(json).is_err());
    }
}
