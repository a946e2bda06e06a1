//! Shared helpers for the seqforge example programs.
//!
//! The examples need a model to drive, so this crate ships a tiny bigram
//! model that learns next-token counts from a tokenized corpus. It is
//! stateless: every step recomputes logits from the last token.

use std::collections::HashMap;

use async_trait::async_trait;
use seqforge::{ForwardInput, ForwardOutput, InferenceSession, Logits, ModelConfig, Result};

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `level`.
pub fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Next-token counts over a corpus, smoothed with a small floor.
pub struct BigramModel {
    config: ModelConfig,
    counts: HashMap<u32, HashMap<u32, u32>>,
}

impl BigramModel {
    /// Count every adjacent pair in `corpus`.
    #[must_use]
    pub fn train<'a>(config: ModelConfig, corpus: impl IntoIterator<Item = &'a [u32]>) -> Self {
        let mut counts: HashMap<u32, HashMap<u32, u32>> = HashMap::new();
        for seq in corpus {
            for pair in seq.windows(2) {
                *counts
                    .entry(pair[0])
                    .or_default()
                    .entry(pair[1])
                    .or_default() += 1;
            }
        }
        tracing::debug!(contexts = counts.len(), "Trained bigram model");
        Self { config, counts }
    }

    /// Log-count logits for the token after `last`.
    #[allow(clippy::cast_precision_loss)]
    fn logits_after(&self, last: Option<u32>) -> Vec<f32> {
        let mut row = vec![-10.0; self.config.vocab_size];
        if let Some(next) = last.and_then(|id| self.counts.get(&id)) {
            for (&id, &count) in next {
                if let Some(slot) = row.get_mut(id as usize) {
                    *slot = (count as f32).ln();
                }
            }
        }
        row
    }
}

#[async_trait]
impl InferenceSession for BigramModel {
    type PastState = ();
    type EncoderState = ();

    fn config(&self) -> &ModelConfig {
        &self.config
    }

    async fn forward(&self, inputs: Vec<ForwardInput<(), ()>>) -> Result<ForwardOutput<()>> {
        let rows = inputs
            .iter()
            .map(|input| self.logits_after(input.input_ids.last().copied()))
            .collect();
        Ok(ForwardOutput {
            logits: Logits::from_rows(rows)?,
            past_key_values: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bigram_prefers_seen_successor() {
        let config = ModelConfig {
            vocab_size: 4,
            ..ModelConfig::default()
        };
        let corpus: Vec<Vec<u32>> = vec![vec![0, 1, 2], vec![0, 1, 3], vec![0, 1, 2]];
        let model = BigramModel::train(config, corpus.iter().map(Vec::as_slice));
        let row = model.logits_after(Some(1));
        assert!(row[2] > row[3]);
        assert!(row[3] > row[0]);
        assert!(model.logits_after(None).iter().all(|&l| (l + 10.0).abs() < f32::EPSILON));
    }
}
