//! Host-side logits and the numeric helpers samplers share.
//!
//! The inference collaborator returns a dense `[batch, seq_len, vocab]` block
//! of f32 scores. Samplers only ever look at one row (the scores for the
//! next position of one beam), so everything here works on `&[f32]` rows.

use std::cmp::Ordering;

use crate::heap::PriorityQueue;
use crate::{Error, Result};

/// Dense logits returned by a forward pass, laid out `[batch, seq_len, vocab]`.
#[derive(Debug, Clone)]
pub struct Logits {
    data: Vec<f32>,
    batch_size: usize,
    seq_len: usize,
    vocab_size: usize,
}

impl Logits {
    /// Wrap a flat buffer.
    ///
    /// # Errors
    /// Returns [`Error::Model`] if `data.len()` does not match the shape.
    pub fn new(data: Vec<f32>, batch_size: usize, seq_len: usize, vocab_size: usize) -> Result<Self> {
        if data.len() != batch_size * seq_len * vocab_size {
            return Err(Error::Model(format!(
                "logits buffer has {} values, expected {batch_size}x{seq_len}x{vocab_size}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            batch_size,
            seq_len,
            vocab_size,
        })
    }

    /// One row per batch element, each already the next-token scores.
    ///
    /// # Errors
    /// Returns [`Error::Model`] if rows have differing widths.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let vocab_size = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != vocab_size) {
            return Err(Error::Model("logits rows have differing widths".into()));
        }
        let batch_size = rows.len();
        Self::new(rows.concat(), batch_size, 1, vocab_size)
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Scores at `position` for batch element `batch_index`.
    #[must_use]
    pub fn row(&self, batch_index: usize, position: usize) -> Option<&[f32]> {
        if batch_index >= self.batch_size || position >= self.seq_len {
            return None;
        }
        let start = (batch_index * self.seq_len + position) * self.vocab_size;
        Some(&self.data[start..start + self.vocab_size])
    }

    /// Scores for the position after the last input token.
    #[must_use]
    pub fn last_row(&self, batch_index: usize) -> Option<&[f32]> {
        self.seq_len
            .checked_sub(1)
            .and_then(|pos| self.row(batch_index, pos))
    }
}

/// Numerically stable softmax (max-subtracted).
#[must_use]
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![0.0; logits.len()];
    }
    let mut probs: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = probs.iter().sum();
    for p in &mut probs {
        *p /= sum;
    }
    probs
}

/// `log(softmax(x))` computed as `x - max - ln(sum(exp(x - max)))`.
#[must_use]
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![f32::NEG_INFINITY; logits.len()];
    }
    let sum: f32 = logits.iter().map(|&l| (l - max).exp()).sum();
    let log_sum = sum.ln();
    logits.iter().map(|&l| l - max - log_sum).collect()
}

/// Index of the largest value; the first one wins ties.
#[must_use]
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ if v.is_nan() => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// The `k` largest `(index, value)` pairs, largest first.
///
/// `k == 0` or `k >= len` keeps everything. Equal values keep the lower index
/// first.
#[must_use]
pub fn top_k(values: &[f32], k: usize) -> Vec<(usize, f32)> {
    let k = if k == 0 { values.len() } else { k.min(values.len()) };
    let mut queue = PriorityQueue::with_max_size(
        |a: &(usize, f32), b: &(usize, f32)| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.0.cmp(&a.0))
        },
        k,
    );
    queue.extend(values.iter().copied().enumerate());
    queue.into_sorted_vec()
}
