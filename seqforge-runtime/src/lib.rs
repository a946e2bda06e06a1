//! seqforge runtime: token-level and text-level generation
//!
//! This crate provides the [`Generator`] (tokens in, tokens out) and
//! [`Runtime`] (text in, text out) on top of the `seqforge` core.
//!
//! # Architecture
//!
//! ```text
//! Runtime<M, T>       ← text in, text out (owns Generator + Tokenizer)
//!   └── Generator<M>  ← tokens in, tokens out (beam loop, processors, sampler)
//!         └── M: InferenceSession  ← batched forward pass only
//! ```

mod beam;
mod generator;
pub mod processors;
mod runtime;
pub mod sampler;
mod stopping;

pub use beam::{Beam, FinishReason};
pub use generator::{GenerateOptions, GenerateOutput, GeneratedSequence, Generator};
pub use processors::{LogitsProcessor, LogitsProcessorList, ProcessorContext};
pub use runtime::Runtime;
pub use sampler::Sampler;
pub use stopping::{CancellationFlag, MaxTimeCriteria, StoppingCriteria, StoppingCriteriaList};
