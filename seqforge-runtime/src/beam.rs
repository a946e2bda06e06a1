//! Beams and per-input pruning.

/// Why a beam stopped growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Emitted an end-of-sequence token.
    Stop,
    /// Reached the length limit.
    Length,
    /// A stopping criterion fired before the beam finished.
    Cancelled,
}

/// One candidate output sequence.
#[derive(Debug, Clone)]
pub struct Beam<P> {
    /// Prompt (or decoder prefix) followed by generated tokens.
    pub output_token_ids: Vec<u32>,
    pub prompt_len: usize,
    /// Sum of the log scores of every generated token.
    pub score: f32,
    /// Which input sequence this beam descends from.
    pub batch_index: usize,
    pub done: bool,
    pub finish_reason: Option<FinishReason>,
    /// Model state covering every token but the newest.
    pub past: Option<P>,
    /// Left padding baked into `past`.
    pub(crate) pad_len: usize,
    max_len: usize,
}

impl<P> Beam<P> {
    /// A fresh beam for input `batch_index`. A beam that already meets
    /// `max_len` starts out done.
    #[must_use]
    pub fn seed(output_token_ids: Vec<u32>, batch_index: usize, max_len: usize) -> Self {
        let prompt_len = output_token_ids.len();
        let mut beam = Self {
            output_token_ids,
            prompt_len,
            score: 0.0,
            batch_index,
            done: false,
            finish_reason: None,
            past: None,
            pad_len: 0,
            max_len,
        };
        if prompt_len >= max_len {
            beam.finish(FinishReason::Length);
        }
        beam
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.output_token_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.output_token_ids.is_empty()
    }

    #[must_use]
    pub fn generated(&self) -> &[u32] {
        &self.output_token_ids[self.prompt_len..]
    }

    /// Mark done. The first reason given sticks.
    pub fn finish(&mut self, reason: FinishReason) {
        self.done = true;
        self.finish_reason.get_or_insert(reason);
    }

    /// A child beam with `token` appended.
    #[must_use]
    pub fn extend(
        &self,
        token: u32,
        log_score: f32,
        past: Option<P>,
        pad_len: usize,
        eos_token_ids: &[u32],
    ) -> Self {
        let mut output_token_ids = Vec::with_capacity(self.output_token_ids.len() + 1);
        output_token_ids.extend_from_slice(&self.output_token_ids);
        output_token_ids.push(token);
        let mut child = Self {
            output_token_ids,
            prompt_len: self.prompt_len,
            score: self.score + log_score,
            batch_index: self.batch_index,
            done: false,
            finish_reason: None,
            past,
            pad_len,
            max_len: self.max_len,
        };
        if eos_token_ids.contains(&token) {
            child.finish(FinishReason::Stop);
        } else if child.len() >= child.max_len {
            child.finish(FinishReason::Length);
        }
        child
    }
}

/// Split beams by `batch_index` into `num_inputs` groups, keeping order.
fn group<P>(beams: Vec<Beam<P>>, num_inputs: usize) -> Vec<Vec<Beam<P>>> {
    let mut groups: Vec<Vec<Beam<P>>> = (0..num_inputs).map(|_| Vec::new()).collect();
    for beam in beams {
        if let Some(g) = groups.get_mut(beam.batch_index) {
            g.push(beam);
        }
    }
    groups
}

/// Best first. The sort is stable, so earlier beams win ties.
fn sort_by_score<P>(group: &mut [Beam<P>]) {
    group.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Keep the `num_beams` best beams of every input, done beams included.
#[must_use]
pub fn prune<P>(beams: Vec<Beam<P>>, num_inputs: usize, num_beams: usize) -> Vec<Beam<P>> {
    group(beams, num_inputs)
        .into_iter()
        .flat_map(|mut g| {
            sort_by_score(&mut g);
            g.truncate(num_beams);
            g
        })
        .collect()
}

/// The `n` best beams of every input, inputs in order.
#[must_use]
pub fn rank<P>(beams: Vec<Beam<P>>, num_inputs: usize, n: usize) -> Vec<Vec<Beam<P>>> {
    group(beams, num_inputs)
        .into_iter()
        .map(|mut g| {
            sort_by_score(&mut g);
            g.truncate(n);
            g
        })
        .collect()
}
