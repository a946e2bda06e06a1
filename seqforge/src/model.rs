//! Inference collaborator interface
//!
//! The generator never runs a network itself. It hands batched token ids to
//! an [`InferenceSession`] and gets back next-token logits plus whatever
//! recurrent state the model wants threaded through later steps.

use async_trait::async_trait;

use crate::logits::Logits;
use crate::{Error, Result};

/// Static facts about a model that the generator needs.
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    /// Width of a logits row
    pub vocab_size: usize,
    /// Whether prompts go through [`InferenceSession::encode`] first.
    pub is_encoder_decoder: bool,
    pub eos_token_id: Option<u32>,
    pub pad_token_id: Option<u32>,
    pub bos_token_id: Option<u32>,
    /// First decoder token for encoder-decoder models
    pub decoder_start_token_id: Option<u32>,
    /// Maximum sequence length the model supports
    pub max_seq_len: Option<usize>,
}

/// One row of a batched forward call.
#[derive(Debug, Clone)]
pub struct ForwardInput<P, E> {
    /// Tokens to feed this step. The whole (left-padded) sequence when `past`
    /// is `None`, otherwise only the tokens appended since `past` was made.
    pub input_ids: Vec<u32>,
    /// Mask over the full sequence so far, including cached positions.
    pub attention_mask: Vec<u32>,
    /// State returned for this beam by the previous step.
    pub past: Option<P>,
    /// Encoder output for encoder-decoder models.
    pub encoder_state: Option<E>,
}

/// Result of a batched forward call.
#[derive(Debug, Clone)]
pub struct ForwardOutput<P> {
    /// `[batch, seq_len, vocab]`; the generator reads the last position.
    pub logits: Logits,
    /// New recurrent state, one per input row, or `None` for stateless models.
    pub past_key_values: Option<Vec<P>>,
}

impl<P> ForwardOutput<P> {
    /// Check that the output matches a batch of `batch_size` inputs.
    ///
    /// # Errors
    /// Returns [`Error::Model`] on a shape mismatch.
    pub fn check_batch(&self, batch_size: usize) -> Result<()> {
        if self.logits.batch_size() != batch_size {
            return Err(Error::Model(format!(
                "model returned logits for {} rows, expected {batch_size}",
                self.logits.batch_size()
            )));
        }
        if let Some(past) = &self.past_key_values {
            if past.len() != batch_size {
                return Err(Error::Model(format!(
                    "model returned {} past states, expected {batch_size}",
                    past.len()
                )));
            }
        }
        Ok(())
    }
}

/// A model the generator can drive one step at a time.
///
/// `PastState` and `EncoderState` are opaque to the generator: it clones
/// them between beams and hands them back, but never looks inside.
#[async_trait]
pub trait InferenceSession: Send + Sync {
    /// Per-beam recurrent state (the KV cache).
    type PastState: Clone + Send + Sync;
    /// Per-input encoder output.
    type EncoderState: Clone + Send + Sync;

    fn config(&self) -> &ModelConfig;

    /// Run the encoder over one prompt.
    ///
    /// # Errors
    /// The default implementation always fails: decoder-only models have no
    /// encoder.
    async fn encode(&self, input_ids: &[u32], attention_mask: &[u32]) -> Result<Self::EncoderState> {
        let _ = (input_ids, attention_mask);
        Err(Error::Model("this model has no encoder".into()))
    }

    /// Next-token logits for every row of `inputs`.
    ///
    /// # Errors
    /// Returns an error if the forward pass fails.
    async fn forward(
        &self,
        inputs: Vec<ForwardInput<Self::PastState, Self::EncoderState>>,
    ) -> Result<ForwardOutput<Self::PastState>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_batch() {
        let out: ForwardOutput<()> = ForwardOutput {
            logits: Logits::from_rows(vec![vec![0.0; 3], vec![0.0; 3]]).unwrap(),
            past_key_values: Some(vec![(), ()]),
        };
        assert!(out.check_batch(2).is_ok());
        assert!(matches!(out.check_batch(3), Err(Error::Model(_))));

        let short: ForwardOutput<()> = ForwardOutput {
            past_key_values: Some(vec![()]),
            ..out
        };
        assert!(short.check_batch(2).is_err());
    }
}
