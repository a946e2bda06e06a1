//! Text-level generation runtime
//!
//! The [`Runtime`] wraps a [`Generator`] and a [`Tokenizer`], providing
//! a text-in, text-out interface for generation.

use seqforge::{Error, InferenceSession, ModelConfig, Result, TokenIds, Tokenizer};
use serde_json::Value;

use crate::generator::{GenerateOptions, Generator};

/// Text-level generation runtime.
///
/// Combines a model (via [`Generator`]) with a tokenizer. Each Runtime
/// instance serves one model.
pub struct Runtime<M: InferenceSession, T: Tokenizer> {
    generator: Generator<M>,
    tokenizer: T,
}

impl<M: InferenceSession, T: Tokenizer> Runtime<M, T> {
    /// Create a runtime from a model session and tokenizer.
    ///
    /// Special-token ids the model config leaves unset are taken from the
    /// tokenizer.
    pub fn new(session: M, tokenizer: T) -> Self {
        Self::with_generator(Generator::new(session), tokenizer)
    }

    /// Create a runtime around an already configured generator.
    pub fn with_generator(mut generator: Generator<M>, tokenizer: T) -> Self {
        let config = generator.generation_config_mut();
        if config.eos_token_id.is_none() {
            config.eos_token_id = tokenizer.eos_token_id().map(TokenIds::One);
        }
        if config.pad_token_id.is_none() {
            config.pad_token_id = tokenizer.pad_token_id();
        }
        Self {
            generator,
            tokenizer,
        }
    }

    #[must_use]
    pub fn generator(&self) -> &Generator<M> {
        &self.generator
    }

    #[must_use]
    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    #[must_use]
    pub fn model_config(&self) -> &ModelConfig {
        self.generator.session().config()
    }

    /// Generate text for one prompt.
    ///
    /// # Arguments
    /// * `prompt` - Input text
    /// * `overrides` - Generation config keys to change for this call
    ///
    /// # Returns
    /// The best decoded sequence. For decoder-only models this includes the
    /// prompt.
    ///
    /// # Errors
    /// Returns an error if tokenization, generation or decoding fails.
    pub async fn generate(&self, prompt: &str, overrides: Option<Value>) -> Result<String> {
        self.generate_batch(&[prompt], overrides)
            .await?
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| Error::Generation("no sequence generated".into()))
    }

    /// Generate text for several prompts in one batched run.
    ///
    /// Returns one group of texts per prompt, prompts in order, each holding
    /// up to `num_return_sequences` texts best first.
    ///
    /// # Errors
    /// Returns an error if tokenization, generation or decoding fails.
    pub async fn generate_batch(
        &self,
        prompts: &[&str],
        overrides: Option<Value>,
    ) -> Result<Vec<Vec<String>>> {
        let inputs = prompts
            .iter()
            .map(|p| self.tokenizer.encode(p, true))
            .collect::<Result<Vec<_>>>()?;
        let options = GenerateOptions {
            overrides,
            ..GenerateOptions::default()
        };
        let output = self.generator.generate(&inputs, options).await?;
        output
            .sequences
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|s| self.tokenizer.decode(&s.token_ids, true))
                    .collect()
            })
            .collect()
    }
}
