//! Seqforge: text segmentation and generation primitives for sequence models
//!
//! This crate holds the tokenizer pipeline, the shared data structures it is
//! built on, generation options, and the interface a model must implement to
//! be driven by `seqforge-runtime`.

pub mod error;
pub mod generation_config;
pub mod heap;
pub mod logits;
pub mod model;
pub mod tokenizer;
pub mod trie;
pub mod vocab;

pub use error::{Error, Result};
pub use generation_config::{GenerationConfig, TokenIds};
pub use heap::PriorityQueue;
pub use logits::Logits;
pub use model::{ForwardInput, ForwardOutput, InferenceSession, ModelConfig};
pub use tokenizer::{Tokenizer, TokenizerPipeline};
pub use trie::Trie;
pub use vocab::Vocabulary;
