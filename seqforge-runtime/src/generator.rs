//! Beam-search generation driver
//!
//! [`Generator`] owns an [`InferenceSession`] and runs the step loop: one
//! batched forward call per step over every live beam, logits processing,
//! sampling, then per-input pruning back to `num_beams`.

use seqforge::{
    Error, ForwardInput, GenerationConfig, InferenceSession, Result, TokenIds,
};
use serde_json::Value;
use tracing::{debug, trace};

use crate::beam::{self, Beam, FinishReason};
use crate::processors::{LogitsProcessorList, ProcessorContext};
use crate::sampler;
use crate::stopping::{MaxTimeCriteria, StoppingCriteriaList};

/// Per-call knobs beyond the generation config.
#[derive(Debug, Default)]
pub struct GenerateOptions {
    /// JSON object layered over the generator's config for this call only.
    pub overrides: Option<Value>,
    /// Run after the processors the config implies.
    pub logits_processors: LogitsProcessorList,
    pub stopping_criteria: StoppingCriteriaList,
}

impl GenerateOptions {
    #[must_use]
    pub fn with_overrides(overrides: Value) -> Self {
        Self {
            overrides: Some(overrides),
            ..Self::default()
        }
    }
}

/// One returned sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSequence<P> {
    pub token_ids: Vec<u32>,
    /// Cumulative log score.
    pub score: f32,
    pub finish_reason: FinishReason,
    /// Final recurrent state, only with `return_dict_in_generate`.
    pub past_key_values: Option<P>,
}

/// Result of a [`Generator::generate`] call.
///
/// One group per input, in input order, best first within each group. A
/// group holds at most `num_return_sequences` entries, fewer when its input
/// never had that many beams (a prompt already at the length limit).
#[derive(Debug, Clone)]
pub struct GenerateOutput<P> {
    pub sequences: Vec<Vec<GeneratedSequence<P>>>,
}

impl<P> GenerateOutput<P> {
    fn empty() -> Self {
        Self {
            sequences: Vec::new(),
        }
    }

    /// Token ids of every sequence, grouped by input.
    #[must_use]
    pub fn token_ids(&self) -> Vec<Vec<Vec<u32>>> {
        self.sequences
            .iter()
            .map(|group| group.iter().map(|s| s.token_ids.clone()).collect())
            .collect()
    }

    #[must_use]
    pub fn finish_reasons(&self) -> Vec<Vec<FinishReason>> {
        self.sequences
            .iter()
            .map(|group| group.iter().map(|s| s.finish_reason).collect())
            .collect()
    }
}

/// Token-level generation over an [`InferenceSession`].
pub struct Generator<M: InferenceSession> {
    session: M,
    generation_config: GenerationConfig,
}

impl<M: InferenceSession> Generator<M> {
    /// Create a generator whose special-token defaults come from the
    /// model config.
    pub fn new(session: M) -> Self {
        let model = session.config();
        let generation_config = GenerationConfig {
            eos_token_id: model.eos_token_id.map(TokenIds::One),
            pad_token_id: model.pad_token_id,
            bos_token_id: model.bos_token_id,
            decoder_start_token_id: model.decoder_start_token_id,
            ..GenerationConfig::default()
        };
        Self {
            session,
            generation_config,
        }
    }

    /// Replace the default generation config (typically one read from the
    /// model's `generation_config.json`).
    #[must_use]
    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation_config = config;
        self
    }

    #[must_use]
    pub fn session(&self) -> &M {
        &self.session
    }

    #[must_use]
    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation_config
    }

    /// Mutable access for filling in ids after construction.
    pub fn generation_config_mut(&mut self) -> &mut GenerationConfig {
        &mut self.generation_config
    }

    /// Generate continuations for every prompt in `inputs`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an invalid merged config, and propagates
    /// any model failure. A fired stopping criterion is not an error.
    pub async fn generate(
        &self,
        inputs: &[Vec<u32>],
        options: GenerateOptions,
    ) -> Result<GenerateOutput<M::PastState>> {
        let config = match &options.overrides {
            Some(overrides) => self.generation_config.merge(overrides)?,
            None => self.generation_config.clone(),
        };
        self.generate_with_config(
            inputs,
            &config,
            options.logits_processors,
            options.stopping_criteria,
        )
        .await
    }

    /// Generate with a fully merged config.
    ///
    /// # Errors
    /// See [`Generator::generate`].
    pub async fn generate_with_config(
        &self,
        inputs: &[Vec<u32>],
        config: &GenerationConfig,
        extra_processors: LogitsProcessorList,
        mut stopping_criteria: StoppingCriteriaList,
    ) -> Result<GenerateOutput<M::PastState>> {
        config.validate()?;
        if inputs.is_empty() {
            return Ok(GenerateOutput::empty());
        }

        let mut processors = LogitsProcessorList::from_config(config)?;
        processors.extend(extra_processors);
        if let Some(secs) = config.max_time {
            stopping_criteria.push(MaxTimeCriteria::from_secs_f64(secs));
        }
        let mut sampler = sampler::from_config(config);
        let eos = config.eos_token_ids();
        let pad_id = self.pad_id(config, &eos);
        let width = config.beam_width();

        debug!(
            inputs = inputs.len(),
            num_beams = config.num_beams,
            sampler = sampler.name(),
            processors = ?processors.names(),
            "Starting generation"
        );

        let (mut beams, encoder_states) = self.seed(inputs, config).await?;

        let mut step = 0usize;
        loop {
            let live: Vec<usize> = (0..beams.len()).filter(|&i| !beams[i].done).collect();
            if live.is_empty() {
                break;
            }

            let stop = {
                let sequences: Vec<&[u32]> = live
                    .iter()
                    .map(|&i| beams[i].output_token_ids.as_slice())
                    .collect();
                stopping_criteria.should_stop(&sequences)
            };
            if stop {
                debug!(step, live = live.len(), "Stopping criteria fired, cancelling live beams");
                for &i in &live {
                    beams[i].finish(FinishReason::Cancelled);
                }
                break;
            }
            trace!(step, live = live.len(), "Generation step");

            let (rows, pad_lens) =
                forward_inputs(&mut beams, &live, &encoder_states, config.use_cache, pad_id);
            let output = self.session.forward(rows).await?;
            output.check_batch(live.len())?;
            let mut pasts: Vec<Option<M::PastState>> = match output.past_key_values {
                Some(p) if config.use_cache => p.into_iter().map(Some).collect(),
                _ => vec![None; live.len()],
            };

            let mut next = Vec::with_capacity(beams.len() * width);
            let mut row = 0usize;
            for parent in beams {
                if parent.done {
                    next.push(parent);
                    continue;
                }
                let mut logits = output
                    .logits
                    .last_row(row)
                    .ok_or_else(|| Error::Model(format!("no logits for row {row}")))?
                    .to_vec();
                processors.process(
                    &ProcessorContext::new(&parent.output_token_ids, parent.prompt_len),
                    &mut logits,
                );
                let candidates = sampler.sample(&logits);
                if candidates.is_empty() {
                    return Err(Error::Generation(format!(
                        "sampler produced no candidates for row {row}"
                    )));
                }
                let past = pasts[row].take();
                for (token, log_score) in candidates {
                    next.push(parent.extend(token, log_score, past.clone(), pad_lens[row], &eos));
                }
                row += 1;
            }
            beams = beam::prune(next, inputs.len(), width);
            step += 1;
        }

        let return_past = config.return_dict_in_generate;
        let output = GenerateOutput {
            sequences: beam::rank(beams, inputs.len(), config.num_return_sequences)
                .into_iter()
                .map(|group| {
                    group
                        .into_iter()
                        .map(|b| GeneratedSequence {
                            finish_reason: b.finish_reason.unwrap_or(FinishReason::Length),
                            score: b.score,
                            past_key_values: if return_past { b.past } else { None },
                            token_ids: b.output_token_ids,
                        })
                        .collect()
                })
                .collect(),
        };
        debug!(
            steps = step,
            sequences = output.sequences.iter().map(Vec::len).sum::<usize>(),
            "Finished generation"
        );
        Ok(output)
    }

    /// Pad id for left-padding full-sequence rows.
    fn pad_id(&self, config: &GenerationConfig, eos: &[u32]) -> u32 {
        config
            .pad_token_id
            .or(self.session.config().pad_token_id)
            .or_else(|| eos.first().copied())
            .unwrap_or(0)
    }

    /// Seed beams for every input, plus encoder state for encoder-decoder
    /// models.
    ///
    /// Beam search fans one seed out on its first step. Sampling without
    /// beams seeds `num_return_sequences` independent copies instead.
    async fn seed(
        &self,
        inputs: &[Vec<u32>],
        config: &GenerationConfig,
    ) -> Result<(Vec<Beam<M::PastState>>, Vec<Option<M::EncoderState>>)> {
        let model = self.session.config();
        let copies = if config.num_beams > 1 { 1 } else { config.beam_width() };
        let mut beams = Vec::with_capacity(inputs.len() * copies);
        let mut encoder_states = Vec::with_capacity(inputs.len());

        for (batch_index, prompt) in inputs.iter().enumerate() {
            let (ids, state) = if model.is_encoder_decoder {
                let mask = vec![1u32; prompt.len()];
                let state = self.session.encode(prompt, &mask).await?;
                let start = config
                    .decoder_start_token_id
                    .or(model.decoder_start_token_id)
                    .or(config.bos_token_id)
                    .ok_or_else(|| {
                        Error::Config("encoder-decoder generation needs decoder_start_token_id".into())
                    })?;
                (vec![start], Some(state))
            } else if prompt.is_empty() {
                let bos = config.bos_token_id.or(model.bos_token_id).ok_or_else(|| {
                    Error::Generation(format!("input {batch_index} is empty and no bos_token_id is set"))
                })?;
                (vec![bos], None)
            } else {
                (prompt.clone(), None)
            };
            let max_len = config.max_total_length(ids.len());
            for _ in 1..copies {
                beams.push(Beam::seed(ids.clone(), batch_index, max_len));
            }
            beams.push(Beam::seed(ids, batch_index, max_len));
            encoder_states.push(state);
        }
        Ok((beams, encoder_states))
    }
}

/// Build one forward row per live beam.
///
/// A beam holding past state feeds only its newest token. Every other beam
/// feeds its whole sequence, left-padded to the longest such row. Returns
/// the rows and the left padding each row's new past state will carry.
fn forward_inputs<P, E: Clone>(
    beams: &mut [Beam<P>],
    live: &[usize],
    encoder_states: &[Option<E>],
    use_cache: bool,
    pad_id: u32,
) -> (Vec<ForwardInput<P, E>>, Vec<usize>) {
    let cached = |b: &Beam<P>| use_cache && b.past.is_some();
    let full_len = live
        .iter()
        .map(|&i| &beams[i])
        .filter(|b| !cached(b))
        .map(Beam::len)
        .max()
        .unwrap_or(0);

    let mut rows = Vec::with_capacity(live.len());
    let mut pad_lens = Vec::with_capacity(live.len());
    for &i in live {
        let encoder_state = encoder_states
            .get(beams[i].batch_index)
            .and_then(Clone::clone);
        let is_cached = cached(&beams[i]);
        let beam = &mut beams[i];
        let len = beam.len();
        if is_cached {
            let mut attention_mask = vec![0; beam.pad_len];
            attention_mask.resize(beam.pad_len + len, 1);
            rows.push(ForwardInput {
                input_ids: beam.output_token_ids[len - 1..].to_vec(),
                attention_mask,
                past: beam.past.take(),
                encoder_state,
            });
            pad_lens.push(beam.pad_len);
        } else {
            let pad = full_len - len;
            let mut input_ids = vec![pad_id; pad];
            input_ids.extend_from_slice(&beam.output_token_ids);
            let mut attention_mask = vec![0; pad];
            attention_mask.resize(full_len, 1);
            rows.push(ForwardInput {
                input_ids,
                attention_mask,
                past: None,
                encoder_state,
            });
            pad_lens.push(pad);
        }
    }
    (rows, pad_lens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_inputs_left_pads_uncached_rows() {
        let mut beams: Vec<Beam<u8>> = vec![
            Beam::seed(vec![5, 6, 7], 0, 10),
            Beam::seed(vec![8], 1, 10),
        ];
        let (rows, pads) = forward_inputs::<u8, ()>(&mut beams, &[0, 1], &[None, None], true, 0);
        assert_eq!(rows[0].input_ids, vec![5, 6, 7]);
        assert_eq!(rows[1].input_ids, vec![0, 0, 8]);
        assert_eq!(rows[1].attention_mask, vec![0, 0, 1]);
        assert_eq!(pads, vec![0, 2]);
    }

    #[test]
    fn test_forward_inputs_cached_rows_feed_last_token() {
        let mut beams: Vec<Beam<u8>> = vec![Beam::seed(vec![0, 0, 8], 0, 10)];
        beams[0].past = Some(3);
        beams[0].pad_len = 2;
        beams[0].output_token_ids = vec![8, 9];
        let (rows, pads) = forward_inputs::<u8, ()>(&mut beams, &[0], &[None], true, 0);
        assert_eq!(rows[0].input_ids, vec![9]);
        assert_eq!(rows[0].attention_mask, vec![0, 0, 1, 1]);
        assert_eq!(rows[0].past, Some(3));
        assert_eq!(pads, vec![2]);
        assert!(beams[0].past.is_none());
    }

    #[test]
    fn test_forward_inputs_without_cache_ignores_past() {
        let mut beams: Vec<Beam<u8>> = vec![Beam::seed(vec![4, 5], 0, 10)];
        beams[0].past = Some(1);
        let (rows, _) = forward_inputs::<u8, ()>(&mut beams, &[0], &[None], false, 0);
        assert_eq!(rows[0].input_ids, vec![4, 5]);
        assert!(rows[0].past.is_none());
    }
}
