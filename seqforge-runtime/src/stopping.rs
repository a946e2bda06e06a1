//! Stopping criteria consulted before each generation step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decides whether generation should stop before the next step.
///
/// Stopping is not an error: the generator marks every live beam done and
/// returns what it has.
pub trait StoppingCriteria: Send + Sync + std::fmt::Debug {
    /// `sequences` holds the token ids of every live beam.
    fn should_stop(&self, sequences: &[&[u32]]) -> bool;
}

/// A flag another task can raise to cancel generation.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl StoppingCriteria for CancellationFlag {
    fn should_stop(&self, _sequences: &[&[u32]]) -> bool {
        self.is_cancelled()
    }
}

/// Stops once a wall-clock budget has elapsed since construction.
#[derive(Debug, Clone)]
pub struct MaxTimeCriteria {
    max_time: Duration,
    start: Instant,
}

impl MaxTimeCriteria {
    #[must_use]
    pub fn new(max_time: Duration) -> Self {
        Self {
            max_time,
            start: Instant::now(),
        }
    }

    /// Budget in seconds, as `max_time` is written in generation configs.
    /// Negative or non-finite values are treated as zero.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        Self::new(Duration::from_secs_f64(secs))
    }
}

impl StoppingCriteria for MaxTimeCriteria {
    fn should_stop(&self, _sequences: &[&[u32]]) -> bool {
        self.start.elapsed() >= self.max_time
    }
}

/// Any-of combination of criteria.
#[derive(Debug, Default)]
pub struct StoppingCriteriaList {
    criteria: Vec<Box<dyn StoppingCriteria>>,
}

impl StoppingCriteriaList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, criteria: impl StoppingCriteria + 'static) {
        self.criteria.push(Box::new(criteria));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    #[must_use]
    pub fn should_stop(&self, sequences: &[&[u32]]) -> bool {
        self.criteria.iter().any(|c| c.should_stop(sequences))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let mut list = StoppingCriteriaList::new();
        list.push(flag.clone());
        assert!(!list.should_stop(&[]));
        flag.cancel();
        assert!(list.should_stop(&[]));
        flag.reset();
        assert!(!list.should_stop(&[]));
    }

    #[test]
    fn test_max_time() {
        assert!(MaxTimeCriteria::from_secs_f64(0.0).should_stop(&[]));
        assert!(MaxTimeCriteria::from_secs_f64(-1.0).should_stop(&[]));
        assert!(!MaxTimeCriteria::from_secs_f64(3600.0).should_stop(&[]));
    }

    #[test]
    fn test_empty_list_never_stops() {
        let list = StoppingCriteriaList::new();
        assert!(list.is_empty());
        assert!(!list.should_stop(&[&[1, 2, 3]]));
    }
}
