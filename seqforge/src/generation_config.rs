//! Generation options and their layered merge.
//!
//! A [`GenerationConfig`] is built from up to three layers: the library
//! defaults below, the model's `generation_config.json`, and caller
//! overrides. Each layer is a JSON object and replaces only the keys it
//! carries.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// A single token id or a list of them (`eos_token_id` accepts both).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenIds {
    One(u32),
    Many(Vec<u32>),
}

impl TokenIds {
    #[must_use]
    pub fn to_vec(&self) -> Vec<u32> {
        match self {
            Self::One(id) => vec![*id],
            Self::Many(ids) => ids.clone(),
        }
    }

    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        match self {
            Self::One(one) => *one == id,
            Self::Many(ids) => ids.contains(&id),
        }
    }
}

/// Every option that controls a `generate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    // ---- Length ----
    pub max_length: usize,
    pub max_new_tokens: Option<usize>,
    pub min_length: usize,
    pub min_new_tokens: Option<usize>,
    pub early_stopping: bool,
    /// Wall-clock budget in seconds.
    pub max_time: Option<f64>,

    // ---- Strategy ----
    pub do_sample: bool,
    pub num_beams: usize,
    pub num_beam_groups: usize,
    pub penalty_alpha: Option<f32>,
    pub use_cache: bool,

    // ---- Logit manipulation ----
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub typical_p: f32,
    pub epsilon_cutoff: f32,
    pub eta_cutoff: f32,
    pub diversity_penalty: f32,
    pub repetition_penalty: f32,
    pub encoder_repetition_penalty: f32,
    pub length_penalty: f32,
    pub no_repeat_ngram_size: usize,
    pub bad_words_ids: Option<Vec<Vec<u32>>>,
    pub force_words_ids: Option<Vec<Vec<u32>>>,
    pub renormalize_logits: bool,
    pub forced_bos_token_id: Option<u32>,
    pub forced_eos_token_id: Option<TokenIds>,
    pub remove_invalid_values: bool,
    /// `(start_index, decay_factor)`
    pub exponential_decay_length_penalty: Option<(usize, f32)>,
    pub suppress_tokens: Option<Vec<u32>>,
    pub begin_suppress_tokens: Option<Vec<u32>>,
    /// `(position, token)` pairs: `token` is forced when the sequence has length `position`.
    pub forced_decoder_ids: Option<Vec<(usize, u32)>>,

    // ---- Output ----
    pub num_return_sequences: usize,
    pub output_attentions: bool,
    pub output_hidden_states: bool,
    pub output_scores: bool,
    pub return_dict_in_generate: bool,

    // ---- Special tokens ----
    pub pad_token_id: Option<u32>,
    pub bos_token_id: Option<u32>,
    pub eos_token_id: Option<TokenIds>,
    pub encoder_no_repeat_ngram_size: usize,
    pub decoder_start_token_id: Option<u32>,

    // ---- Timestamps ----
    pub return_timestamps: bool,
    pub no_timestamps_token_id: Option<u32>,
    pub max_initial_timestamp_index: Option<usize>,

    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: 20,
            max_new_tokens: None,
            min_length: 0,
            min_new_tokens: None,
            early_stopping: false,
            max_time: None,
            do_sample: false,
            num_beams: 1,
            num_beam_groups: 1,
            penalty_alpha: None,
            use_cache: true,
            temperature: 1.0,
            top_k: 50,
            top_p: 1.0,
            typical_p: 1.0,
            epsilon_cutoff: 0.0,
            eta_cutoff: 0.0,
            diversity_penalty: 0.0,
            repetition_penalty: 1.0,
            encoder_repetition_penalty: 1.0,
            length_penalty: 1.0,
            no_repeat_ngram_size: 0,
            bad_words_ids: None,
            force_words_ids: None,
            renormalize_logits: false,
            forced_bos_token_id: None,
            forced_eos_token_id: None,
            remove_invalid_values: false,
            exponential_decay_length_penalty: None,
            suppress_tokens: None,
            begin_suppress_tokens: None,
            forced_decoder_ids: None,
            num_return_sequences: 1,
            output_attentions: false,
            output_hidden_states: false,
            output_scores: false,
            return_dict_in_generate: false,
            pad_token_id: None,
            bos_token_id: None,
            eos_token_id: None,
            encoder_no_repeat_ngram_size: 0,
            decoder_start_token_id: None,
            return_timestamps: false,
            no_timestamps_token_id: None,
            max_initial_timestamp_index: None,
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Parse one layer over the library defaults.
    ///
    /// # Errors
    /// Returns [`Error::Json`] on malformed JSON and [`Error::Config`] if the
    /// document is not an object.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::default().merge(&serde_json::from_str(json)?)
    }

    /// Read a `generation_config.json`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Overlay `layer` on `self`: keys present in `layer` win, an explicit
    /// `null` resets the field to its library default, unknown keys are
    /// ignored.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `layer` is not an object or a value has
    /// the wrong type.
    pub fn merge(&self, layer: &Value) -> Result<Self> {
        let Value::Object(layer) = layer else {
            return Err(Error::config("generation config layer must be a JSON object"));
        };
        let Value::Object(mut base) = serde_json::to_value(self)? else {
            return Err(Error::config("generation config did not serialize to an object"));
        };
        overlay(&mut base, layer);
        serde_json::from_value(Value::Object(base))
            .map_err(|e| Error::config(format!("invalid generation config: {e}")))
    }

    /// Library defaults, then `model_defaults`, then `overrides`.
    ///
    /// # Errors
    /// Fails if either layer is invalid.
    pub fn layered(model_defaults: Option<&Value>, overrides: Option<&Value>) -> Result<Self> {
        [model_defaults, overrides]
            .into_iter()
            .flatten()
            .try_fold(Self::default(), |config, layer| config.merge(layer))
    }

    /// Reject option combinations the generator cannot honor.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.num_beams == 0 {
            return Err(Error::config("num_beams must be at least 1"));
        }
        if self.num_return_sequences == 0 {
            return Err(Error::config("num_return_sequences must be at least 1"));
        }
        if self.is_greedy() && self.num_return_sequences > 1 {
            return Err(Error::config(format!(
                "greedy search returns one sequence, got num_return_sequences={}",
                self.num_return_sequences
            )));
        }
        if self.num_beams > 1 && self.num_return_sequences > self.num_beams {
            return Err(Error::config(format!(
                "num_return_sequences ({}) exceeds num_beams ({})",
                self.num_return_sequences, self.num_beams
            )));
        }
        if self.temperature < 0.0 || !self.temperature.is_finite() {
            return Err(Error::config(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(Error::config(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if self.repetition_penalty <= 0.0 {
            return Err(Error::config(format!(
                "repetition_penalty must be positive, got {}",
                self.repetition_penalty
            )));
        }
        Ok(())
    }

    /// Beams kept per input between steps: `num_beams`, or one independent
    /// sample per returned sequence when sampling without beams.
    #[must_use]
    pub fn beam_width(&self) -> usize {
        if self.num_beams == 1 && self.do_sample {
            self.num_return_sequences
        } else {
            self.num_beams
        }
    }

    /// Single-path argmax decoding.
    #[must_use]
    pub fn is_greedy(&self) -> bool {
        self.num_beams == 1 && !self.do_sample
    }

    #[must_use]
    pub fn eos_token_ids(&self) -> Vec<u32> {
        self.eos_token_id.as_ref().map(TokenIds::to_vec).unwrap_or_default()
    }

    /// Longest allowed total sequence for a prompt of `prompt_len` tokens.
    #[must_use]
    pub fn max_total_length(&self, prompt_len: usize) -> usize {
        match self.max_new_tokens {
            Some(n) => prompt_len + n,
            None => self.max_length,
        }
    }
}

fn overlay(base: &mut Map<String, Value>, layer: &Map<String, Value>) {
    for (key, value) in layer {
        if value.is_null() {
            base.remove(key);
        } else {
            base.insert(key.clone(), value.clone());
        }
    }
}
