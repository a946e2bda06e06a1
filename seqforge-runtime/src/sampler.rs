//! Next-token samplers
//!
//! A [`Sampler`] turns one processed logits row into candidate
//! `(token, log_score)` expansions for a beam.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seqforge::logits::{argmax, log_softmax, softmax, top_k};
use seqforge::GenerationConfig;

/// Converts a logits row into next-token candidates.
pub trait Sampler: Send + std::fmt::Debug {
    /// Candidates for one beam, each with the log-probability it adds to
    /// the beam's cumulative score.
    fn sample(&mut self, logits: &[f32]) -> Vec<(u32, f32)>;

    fn name(&self) -> &'static str;
}

/// Pick the sampler `config` asks for.
///
/// More than one beam selects beam search, otherwise `do_sample` selects
/// multinomial sampling and anything else is greedy.
#[must_use]
pub fn from_config(config: &GenerationConfig) -> Box<dyn Sampler> {
    if config.num_beams > 1 {
        Box::new(BeamSearch::new(config))
    } else if config.do_sample {
        Box::new(Multinomial::new(config))
    } else {
        Box::new(Greedy)
    }
}

fn rng_from_seed(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

/// Divide by `temperature` unless it is 0 or 1.
fn apply_temperature(logits: &[f32], temperature: f32) -> Vec<f32> {
    if temperature > 0.0 && (temperature - 1.0).abs() > f32::EPSILON {
        logits.iter().map(|l| l / temperature).collect()
    } else {
        logits.to_vec()
    }
}

/// Roulette-wheel selection over (possibly unnormalized) weights.
fn random_select(rng: &mut StdRng, weights: &[f32]) -> usize {
    let total: f32 = weights.iter().sum();
    let mut r = rng.gen::<f32>() * total;
    for (i, &w) in weights.iter().enumerate() {
        r -= w;
        if r <= 0.0 {
            return i;
        }
    }
    0
}

#[allow(clippy::cast_possible_truncation)]
fn token(index: usize) -> u32 {
    index as u32
}

// ---------------------------------------------------------------------------

/// Argmax. The score is always 0 since no distribution is sampled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Greedy;

impl Sampler for Greedy {
    fn sample(&mut self, logits: &[f32]) -> Vec<(u32, f32)> {
        argmax(logits).map(|i| vec![(token(i), 0.0)]).unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        "greedy"
    }
}

/// Top-k (then optional nucleus) restriction and one weighted draw.
#[derive(Debug)]
pub struct Multinomial {
    top_k: usize,
    top_p: f32,
    temperature: f32,
    rng: StdRng,
}

impl Multinomial {
    #[must_use]
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            top_k: config.top_k,
            top_p: config.top_p,
            temperature: config.temperature,
            rng: rng_from_seed(config.seed),
        }
    }

    /// Keep the smallest highest-first prefix whose mass reaches `top_p`.
    fn nucleus(&self, probs: &mut Vec<f32>) {
        if self.top_p >= 1.0 {
            return;
        }
        let mut cumulative = 0.0;
        let mut keep = probs.len();
        for (i, p) in probs.iter().enumerate() {
            cumulative += p;
            if cumulative >= self.top_p {
                keep = i + 1;
                break;
            }
        }
        probs.truncate(keep.max(1));
        let total: f32 = probs.iter().sum();
        if total > 0.0 {
            for p in probs.iter_mut() {
                *p /= total;
            }
        }
    }
}

impl Sampler for Multinomial {
    fn sample(&mut self, logits: &[f32]) -> Vec<(u32, f32)> {
        if logits.is_empty() {
            return Vec::new();
        }
        let scaled = apply_temperature(logits, self.temperature);
        let top = top_k(&scaled, self.top_k);
        let mut probs = softmax(&top.iter().map(|&(_, v)| v).collect::<Vec<_>>());
        self.nucleus(&mut probs);
        let i = random_select(&mut self.rng, &probs);
        vec![(token(top[i].0), probs[i].ln())]
    }

    fn name(&self) -> &'static str {
        "multinomial"
    }
}

/// `num_beams` expansions per beam.
///
/// With `do_sample` or a positive `top_k` each expansion is an independent
/// weighted draw from the top-k distribution, so duplicates are possible.
/// Otherwise the expansions are the exact `num_beams` best entries of the
/// full log-softmax.
#[derive(Debug)]
pub struct BeamSearch {
    num_beams: usize,
    sample: bool,
    top_k: usize,
    temperature: f32,
    rng: StdRng,
}

impl BeamSearch {
    #[must_use]
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            num_beams: config.num_beams,
            sample: config.do_sample || config.top_k > 0,
            top_k: config.top_k,
            temperature: config.temperature,
            rng: rng_from_seed(config.seed),
        }
    }
}

impl Sampler for BeamSearch {
    fn sample(&mut self, logits: &[f32]) -> Vec<(u32, f32)> {
        if logits.is_empty() {
            return Vec::new();
        }
        let scaled = apply_temperature(logits, self.temperature);
        if !self.sample {
            return top_k(&log_softmax(&scaled), self.num_beams)
                .into_iter()
                .map(|(i, lp)| (token(i), lp))
                .collect();
        }
        let top = top_k(&scaled, self.top_k);
        let probs = softmax(&top.iter().map(|&(_, v)| v).collect::<Vec<_>>());
        (0..self.num_beams)
            .map(|_| {
                let i = random_select(&mut self.rng, &probs);
                (token(top[i].0), probs[i].ln())
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "beam_search"
    }
}
