//! Tokenization
//!
//! A [`TokenizerPipeline`] chains five configurable stages: [`Normalizer`],
//! [`PreTokenizer`], [`TokenizerModel`], [`PostProcessor`] and [`Decoder`].
//! Each stage family is a trait with a serde-tagged config enum whose
//! `build` method picks the variant.

mod added_tokens;
pub mod byte_level;
mod config;
mod decoder;
pub mod model;
mod normalizer;
mod pipeline;
mod post_processor;
mod pre_tokenizer;

use crate::Result;

pub use added_tokens::{AddedToken, AddedTokenSplitter, Section};
pub use config::{Side, SpecialTokenValue, TokenizerJson, TokenizerOptions};
pub use decoder::{clean_up_tokenization, Decoder, DecoderConfig};
pub use model::{MergeRule, TokenizerModel, TokenizerModelConfig};
pub use normalizer::{Normalizer, NormalizerConfig, Pattern, Precompiled};
pub use pipeline::{
    BatchEncoding, DecodeOptions, EncodeOptions, Encoding, Padding, TokenizerPipeline,
};
pub use post_processor::{
    PostProcessor, PostProcessorConfig, ProcessedTokens, SequenceId, SpecialTokenSpec,
    TemplatePiece,
};
pub use pre_tokenizer::{PreTokenizer, PreTokenizerConfig, PrependScheme, SplitBehavior};

/// Text ↔ id conversion as seen by the generation runtime.
pub trait Tokenizer {
    /// Encode text to token IDs.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>>;

    /// Decode token IDs to text.
    ///
    /// # Errors
    /// Returns an error if decoding fails.
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;

    /// Decode a single token ID to text.
    ///
    /// # Errors
    /// Returns an error if decoding fails.
    fn decode_token(&self, id: u32) -> Result<String>;

    /// Width of a logits row for this vocabulary.
    fn vocab_size(&self) -> usize;

    fn eos_token_id(&self) -> Option<u32>;

    fn pad_token_id(&self) -> Option<u32>;
}
