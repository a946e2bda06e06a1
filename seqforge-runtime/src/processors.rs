//! Logits processors
//!
//! Each processor rewrites the next-token scores of one beam in place.
//! A [`LogitsProcessorList`] runs them in registration order, so every
//! processor sees the scores as left by the ones before it.

use std::collections::{HashMap, HashSet};

use seqforge::logits::log_softmax;
use seqforge::{Error, GenerationConfig, Result};

/// What a processor may look at besides the scores.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorContext<'a> {
    /// The whole sequence so far: prompt (or decoder prefix) plus generated tokens.
    pub input_ids: &'a [u32],
    /// Length of the prompt part of `input_ids`.
    pub prompt_len: usize,
}

impl<'a> ProcessorContext<'a> {
    #[must_use]
    pub fn new(input_ids: &'a [u32], prompt_len: usize) -> Self {
        Self {
            input_ids,
            prompt_len,
        }
    }

    /// Tokens produced after the prompt.
    #[must_use]
    pub fn generated(&self) -> &'a [u32] {
        &self.input_ids[self.prompt_len.min(self.input_ids.len())..]
    }
}

/// Rewrites next-token scores for one beam.
pub trait LogitsProcessor: Send + Sync + std::fmt::Debug {
    /// Mutate `logits` (one score per vocabulary id) in place.
    fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]);

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

fn ban(logits: &mut [f32], id: u32) {
    if let Some(l) = logits.get_mut(id as usize) {
        *l = f32::NEG_INFINITY;
    }
}

/// Leave only `id` selectable.
fn force(logits: &mut [f32], id: u32) {
    logits.fill(f32::NEG_INFINITY);
    if let Some(l) = logits.get_mut(id as usize) {
        *l = 0.0;
    }
}

// ---------------------------------------------------------------------------
// Processors
// ---------------------------------------------------------------------------

/// Force `forced_decoder_ids[len]` when the sequence has length `len`.
#[derive(Debug, Clone)]
pub struct ForceTokens {
    forced: HashMap<usize, u32>,
}

impl ForceTokens {
    #[must_use]
    pub fn new(forced_decoder_ids: &[(usize, u32)]) -> Self {
        Self {
            forced: forced_decoder_ids.iter().copied().collect(),
        }
    }
}

impl LogitsProcessor for ForceTokens {
    fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        if let Some(&id) = self.forced.get(&ctx.input_ids.len()) {
            force(logits, id);
        }
    }

    fn name(&self) -> &'static str {
        "ForceTokens"
    }
}

/// Force a token at sequence length 1.
#[derive(Debug, Clone)]
pub struct ForcedBos {
    bos_token_id: u32,
}

impl ForcedBos {
    #[must_use]
    pub fn new(bos_token_id: u32) -> Self {
        Self { bos_token_id }
    }
}

impl LogitsProcessor for ForcedBos {
    fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        if ctx.input_ids.len() == 1 {
            force(logits, self.bos_token_id);
        }
    }

    fn name(&self) -> &'static str {
        "ForcedBOS"
    }
}

/// Registered for `forced_eos_token_id` but leaves the scores untouched.
#[derive(Debug, Clone)]
pub struct ForcedEos {
    eos_token_ids: Vec<u32>,
}

impl ForcedEos {
    #[must_use]
    pub fn new(eos_token_ids: Vec<u32>) -> Self {
        Self { eos_token_ids }
    }

    #[must_use]
    pub fn eos_token_ids(&self) -> &[u32] {
        &self.eos_token_ids
    }
}

impl LogitsProcessor for ForcedEos {
    fn process(&self, _ctx: &ProcessorContext<'_>, _logits: &mut [f32]) {}

    fn name(&self) -> &'static str {
        "ForcedEOS"
    }
}

/// Ban any token that would complete an n-gram already present.
#[derive(Debug, Clone)]
pub struct NoRepeatNGram {
    n: usize,
}

impl NoRepeatNGram {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n }
    }

    /// Continuations seen after each `(n - 1)`-token prefix.
    fn ngrams<'a>(&self, ids: &'a [u32]) -> HashMap<&'a [u32], Vec<u32>> {
        let mut seen: HashMap<&[u32], Vec<u32>> = HashMap::new();
        for window in ids.windows(self.n) {
            let (prefix, last) = window.split_at(self.n - 1);
            seen.entry(prefix).or_default().push(last[0]);
        }
        seen
    }

    /// Tokens that may not follow `ids`.
    #[must_use]
    pub fn banned_tokens(&self, ids: &[u32]) -> Vec<u32> {
        if self.n == 0 || ids.len() + 1 < self.n {
            return Vec::new();
        }
        let prefix = &ids[ids.len() + 1 - self.n..];
        self.ngrams(ids).remove(prefix).unwrap_or_default()
    }
}

impl LogitsProcessor for NoRepeatNGram {
    fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        for id in self.banned_tokens(ctx.input_ids) {
            ban(logits, id);
        }
    }

    fn name(&self) -> &'static str {
        "NoRepeatNGram"
    }
}

/// Make tokens already in the sequence less likely.
#[derive(Debug, Clone)]
pub struct RepetitionPenalty {
    penalty: f32,
}

impl RepetitionPenalty {
    #[must_use]
    pub fn new(penalty: f32) -> Self {
        Self { penalty }
    }
}

impl LogitsProcessor for RepetitionPenalty {
    fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        let seen: HashSet<u32> = ctx.input_ids.iter().copied().collect();
        for id in seen {
            if let Some(l) = logits.get_mut(id as usize) {
                if *l > 0.0 {
                    *l /= self.penalty;
                } else {
                    *l *= self.penalty;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "RepetitionPenalty"
    }
}

/// Ban end-of-sequence until the sequence reaches `min_length`.
#[derive(Debug, Clone)]
pub struct MinLength {
    min_length: usize,
    eos_token_ids: Vec<u32>,
}

impl MinLength {
    #[must_use]
    pub fn new(min_length: usize, eos_token_ids: Vec<u32>) -> Self {
        Self {
            min_length,
            eos_token_ids,
        }
    }
}

impl LogitsProcessor for MinLength {
    fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        if ctx.input_ids.len() < self.min_length {
            for &id in &self.eos_token_ids {
                ban(logits, id);
            }
        }
    }

    fn name(&self) -> &'static str {
        "MinLength"
    }
}

/// Ban end-of-sequence until `min_new_tokens` tokens have been generated.
#[derive(Debug, Clone)]
pub struct MinNewTokensLength {
    min_new_tokens: usize,
    eos_token_ids: Vec<u32>,
}

impl MinNewTokensLength {
    #[must_use]
    pub fn new(min_new_tokens: usize, eos_token_ids: Vec<u32>) -> Self {
        Self {
            min_new_tokens,
            eos_token_ids,
        }
    }
}

impl LogitsProcessor for MinNewTokensLength {
    fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        if ctx.generated().len() < self.min_new_tokens {
            for &id in &self.eos_token_ids {
                ban(logits, id);
            }
        }
    }

    fn name(&self) -> &'static str {
        "MinNewTokensLength"
    }
}

/// Ban the last token of a bad sequence whenever the rest of it ends the input.
#[derive(Debug, Clone)]
pub struct NoBadWords {
    bad_words_ids: Vec<Vec<u32>>,
}

impl NoBadWords {
    #[must_use]
    pub fn new(bad_words_ids: Vec<Vec<u32>>) -> Self {
        Self { bad_words_ids }
    }
}

impl LogitsProcessor for NoBadWords {
    fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        for bad in &self.bad_words_ids {
            let Some((&last, prefix)) = bad.split_last() else {
                continue;
            };
            if ctx.input_ids.ends_with(prefix) {
                ban(logits, last);
            }
        }
    }

    fn name(&self) -> &'static str {
        "NoBadWords"
    }
}

/// Ban a fixed set of tokens at every step.
#[derive(Debug, Clone)]
pub struct SuppressTokens {
    suppress: Vec<u32>,
}

impl SuppressTokens {
    #[must_use]
    pub fn new(suppress: Vec<u32>) -> Self {
        Self { suppress }
    }
}

impl LogitsProcessor for SuppressTokens {
    fn process(&self, _ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        for &id in &self.suppress {
            ban(logits, id);
        }
    }

    fn name(&self) -> &'static str {
        "SuppressTokens"
    }
}

/// Ban a fixed set of tokens at the first generated position only.
#[derive(Debug, Clone)]
pub struct SuppressTokensAtBegin {
    suppress: Vec<u32>,
    /// Sequence length at which to suppress; the prompt length when `None`.
    begin_index: Option<usize>,
}

impl SuppressTokensAtBegin {
    #[must_use]
    pub fn new(suppress: Vec<u32>, begin_index: Option<usize>) -> Self {
        Self {
            suppress,
            begin_index,
        }
    }
}

impl LogitsProcessor for SuppressTokensAtBegin {
    fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        let begin = self.begin_index.unwrap_or(ctx.prompt_len);
        if ctx.input_ids.len() == begin {
            for &id in &self.suppress {
                ban(logits, id);
            }
        }
    }

    fn name(&self) -> &'static str {
        "SuppressTokensAtBegin"
    }
}

/// Keeps timestamp tokens (ids from `no_timestamps_token_id + 1` up) paired.
#[derive(Debug, Clone)]
pub struct WhisperTimestamp {
    eos_token_id: u32,
    no_timestamps_token_id: u32,
    timestamp_begin: u32,
    /// Sequence length just after the first forced timestamp.
    begin_index: usize,
    max_initial_timestamp_index: Option<usize>,
}

impl WhisperTimestamp {
    /// `forced_decoder_ids` shifts the first generatable position.
    #[must_use]
    pub fn new(
        eos_token_id: u32,
        no_timestamps_token_id: u32,
        forced_decoder_ids: &[(usize, u32)],
        max_initial_timestamp_index: Option<usize>,
    ) -> Self {
        let mut begin_index = forced_decoder_ids.len() + 2;
        if forced_decoder_ids
            .last()
            .is_some_and(|&(_, id)| id == no_timestamps_token_id)
        {
            begin_index -= 1;
        }
        Self {
            eos_token_id,
            no_timestamps_token_id,
            timestamp_begin: no_timestamps_token_id + 1,
            begin_index,
            max_initial_timestamp_index,
        }
    }

    fn is_timestamp(&self, id: u32) -> bool {
        id >= self.timestamp_begin
    }
}

impl LogitsProcessor for WhisperTimestamp {
    fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        let ts_begin = (self.timestamp_begin as usize).min(logits.len());
        ban(logits, self.no_timestamps_token_id);

        if ctx.input_ids.len() + 1 == self.begin_index {
            force(logits, self.timestamp_begin);
            return;
        }

        let seq = &ctx.input_ids[self.begin_index.min(ctx.input_ids.len())..];
        let last_was_timestamp = seq.last().is_some_and(|&id| self.is_timestamp(id));
        let penultimate_was_timestamp =
            seq.len() < 2 || self.is_timestamp(seq[seq.len() - 2]);
        if last_was_timestamp {
            if penultimate_was_timestamp {
                // a pair just closed: text must follow
                logits[ts_begin..].fill(f32::NEG_INFINITY);
            } else {
                // an open pair: only another timestamp or end of sequence
                let eos = (self.eos_token_id as usize).min(logits.len());
                logits[..eos].fill(f32::NEG_INFINITY);
            }
        }

        if ctx.input_ids.len() == self.begin_index {
            if let Some(max_index) = self.max_initial_timestamp_index {
                let last_allowed = ts_begin + max_index;
                if last_allowed + 1 < logits.len() {
                    logits[last_allowed + 1..].fill(f32::NEG_INFINITY);
                }
            }
        }

        let logprobs = log_softmax(logits);
        let timestamp_mass: f32 = logprobs[ts_begin..].iter().map(|l| l.exp()).sum();
        let max_text = logprobs[..ts_begin]
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        if timestamp_mass.ln() > max_text {
            logits[..ts_begin].fill(f32::NEG_INFINITY);
        }
    }

    fn name(&self) -> &'static str {
        "WhisperTimestamp"
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// Ordered chain of processors applied once per step.
#[derive(Debug, Default)]
pub struct LogitsProcessorList {
    processors: Vec<Box<dyn LogitsProcessor>>,
}

impl LogitsProcessorList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Processors implied by `config`, in their fixed order.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if timestamps are requested without a
    /// `no_timestamps_token_id` or an eos token.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let mut list = Self::new();
        let eos = config.eos_token_ids();

        if (config.repetition_penalty - 1.0).abs() > f32::EPSILON {
            list.push(RepetitionPenalty::new(config.repetition_penalty));
        }
        if config.no_repeat_ngram_size > 0 {
            list.push(NoRepeatNGram::new(config.no_repeat_ngram_size));
        }
        if let Some(bad) = &config.bad_words_ids {
            list.push(NoBadWords::new(bad.clone()));
        }
        if config.min_length > 0 && !eos.is_empty() {
            list.push(MinLength::new(config.min_length, eos.clone()));
        }
        if let Some(min_new) = config.min_new_tokens.filter(|&n| n > 0) {
            if !eos.is_empty() {
                list.push(MinNewTokensLength::new(min_new, eos.clone()));
            }
        }
        if let Some(bos) = config.forced_bos_token_id {
            list.push(ForcedBos::new(bos));
        }
        if let Some(forced_eos) = &config.forced_eos_token_id {
            list.push(ForcedEos::new(forced_eos.to_vec()));
        }
        if let Some(suppress) = &config.suppress_tokens {
            list.push(SuppressTokens::new(suppress.clone()));
        }
        let forced = config.forced_decoder_ids.as_deref().unwrap_or_default();
        if let Some(suppress) = &config.begin_suppress_tokens {
            let begin_index = forced.iter().map(|&(pos, _)| pos + 1).max();
            list.push(SuppressTokensAtBegin::new(suppress.clone(), begin_index));
        }
        if !forced.is_empty() {
            list.push(ForceTokens::new(forced));
        }
        if config.return_timestamps {
            let no_timestamps = config.no_timestamps_token_id.ok_or_else(|| {
                Error::Config("return_timestamps needs no_timestamps_token_id".into())
            })?;
            let eos_id = *eos
                .first()
                .ok_or_else(|| Error::Config("return_timestamps needs eos_token_id".into()))?;
            list.push(WhisperTimestamp::new(
                eos_id,
                no_timestamps,
                forced,
                config.max_initial_timestamp_index,
            ));
        }
        Ok(list)
    }

    pub fn push(&mut self, processor: impl LogitsProcessor + 'static) {
        self.processors.push(Box::new(processor));
    }

    pub fn push_boxed(&mut self, processor: Box<dyn LogitsProcessor>) {
        self.processors.push(processor);
    }

    /// Append `other` after the processors already registered.
    pub fn extend(&mut self, other: LogitsProcessorList) {
        self.processors.extend(other.processors);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Run every processor in order.
    pub fn process(&self, ctx: &ProcessorContext<'_>, logits: &mut [f32]) {
        for processor in &self.processors {
            processor.process(ctx, logits);
        }
    }
}
