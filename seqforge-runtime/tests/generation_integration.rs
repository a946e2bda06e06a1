//! End-to-end generation tests against a scripted in-memory model.
//!
//! The mock's recurrent state is the unpadded token history it has seen, so
//! every test also checks that past state is threaded back correctly.

use std::sync::Mutex;

use async_trait::async_trait;
use seqforge::tokenizer::{TokenizerJson, TokenizerOptions};
use seqforge::{
    Error, ForwardInput, ForwardOutput, InferenceSession, Logits, ModelConfig, Result,
    TokenizerPipeline,
};
use seqforge_runtime::{
    CancellationFlag, FinishReason, GenerateOptions, Generator, Runtime, StoppingCriteria,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Mock model
// ---------------------------------------------------------------------------

/// One recorded forward row: `(input_ids, attention_mask, had_past)`.
type Row = (Vec<u32>, Vec<u32>, bool);

#[derive(Default)]
struct Calls {
    forward: Vec<Vec<Row>>,
    encode: usize,
}

struct MockSession {
    config: ModelConfig,
    calls: Mutex<Calls>,
    fail_at: Option<usize>,
    next: fn(&[u32], usize) -> Vec<f32>,
}

impl MockSession {
    fn new(config: ModelConfig, next: fn(&[u32], usize) -> Vec<f32>) -> Self {
        Self {
            config,
            calls: Mutex::new(Calls::default()),
            fail_at: None,
            next,
        }
    }

    fn forward_calls(&self) -> Vec<Vec<Row>> {
        self.calls.lock().unwrap().forward.clone()
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.forward_calls().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl InferenceSession for MockSession {
    type PastState = Vec<u32>;
    type EncoderState = usize;

    fn config(&self) -> &ModelConfig {
        &self.config
    }

    async fn encode(&self, input_ids: &[u32], attention_mask: &[u32]) -> Result<usize> {
        assert_eq!(input_ids.len(), attention_mask.len());
        self.calls.lock().unwrap().encode += 1;
        Ok(input_ids.len())
    }

    async fn forward(
        &self,
        inputs: Vec<ForwardInput<Vec<u32>, usize>>,
    ) -> Result<ForwardOutput<Vec<u32>>> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.forward.push(
                inputs
                    .iter()
                    .map(|i| (i.input_ids.clone(), i.attention_mask.clone(), i.past.is_some()))
                    .collect(),
            );
            calls.forward.len() - 1
        };
        if self.fail_at == Some(call_index) {
            return Err(Error::Model("device lost".into()));
        }

        let mut rows = Vec::with_capacity(inputs.len());
        let mut pasts = Vec::with_capacity(inputs.len());
        for input in inputs {
            if self.config.is_encoder_decoder {
                assert!(input.encoder_state.is_some());
            }
            let seq: Vec<u32> = match input.past {
                Some(mut past) => {
                    past.extend_from_slice(&input.input_ids);
                    let visible = input.attention_mask.iter().filter(|&&m| m == 1).count();
                    assert_eq!(visible, past.len(), "mask must cover the cached history");
                    past
                }
                None => input
                    .input_ids
                    .iter()
                    .zip(&input.attention_mask)
                    .filter(|&(_, &m)| m == 1)
                    .map(|(&id, _)| id)
                    .collect(),
            };
            rows.push((self.next)(&seq, self.config.vocab_size));
            pasts.push(seq);
        }
        Ok(ForwardOutput {
            logits: Logits::from_rows(rows)?,
            past_key_values: Some(pasts),
        })
    }
}

/// Strongly prefers `last + 1`.
fn successor(seq: &[u32], vocab_size: usize) -> Vec<f32> {
    let mut logits = vec![0.0; vocab_size];
    let last = seq.last().copied().unwrap_or(0) as usize;
    logits[(last + 1) % vocab_size] = 10.0;
    logits
}

/// Prefers `last + 1`, then `last + 2`.
fn two_way(seq: &[u32], vocab_size: usize) -> Vec<f32> {
    let mut logits = vec![0.0; vocab_size];
    let last = seq.last().copied().unwrap_or(0) as usize;
    logits[(last + 1) % vocab_size] = 2.0;
    logits[(last + 2) % vocab_size] = 1.5;
    logits
}

fn decoder_only(eos: Option<u32>) -> ModelConfig {
    ModelConfig {
        vocab_size: 6,
        eos_token_id: eos,
        pad_token_id: Some(5),
        ..ModelConfig::default()
    }
}

fn overrides(value: serde_json::Value) -> GenerateOptions {
    GenerateOptions::with_overrides(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_greedy_stops_at_eos() {
    let generator = Generator::new(MockSession::new(decoder_only(Some(4)), successor));
    let out = generator
        .generate(&[vec![1]], GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(out.token_ids(), vec![vec![vec![1, 2, 3, 4]]]);
    assert_eq!(out.finish_reasons(), vec![vec![FinishReason::Stop]]);
    assert!(out.sequences[0][0].past_key_values.is_none());

    let calls = generator.session().forward_calls();
    assert_eq!(calls.len(), 3);
    assert!(!calls[0][0].2);
    assert_eq!(calls[1][0].0, vec![2]);
    assert!(calls[1][0].2);
}

#[tokio::test]
async fn test_max_new_tokens_bounds_length() {
    let generator = Generator::new(MockSession::new(decoder_only(Some(4)), successor));
    let out = generator
        .generate(&[vec![0]], overrides(json!({"max_new_tokens": 2})))
        .await
        .unwrap();
    assert_eq!(out.token_ids(), vec![vec![vec![0, 1, 2]]]);
    assert_eq!(out.finish_reasons(), vec![vec![FinishReason::Length]]);
}

#[tokio::test]
async fn test_batch_left_pads_and_drops_finished_inputs() {
    let generator = Generator::new(MockSession::new(decoder_only(Some(4)), successor));
    let out = generator
        .generate(&[vec![3], vec![0, 1]], GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(out.token_ids(), vec![vec![vec![3, 4]], vec![vec![0, 1, 2, 3, 4]]]);
    assert_eq!(generator.session().batch_sizes(), vec![2, 1, 1]);

    let calls = generator.session().forward_calls();
    assert_eq!(calls[0][0].0, vec![5, 3]);
    assert_eq!(calls[0][0].1, vec![0, 1]);
    assert_eq!(calls[0][1].0, vec![0, 1]);
}

#[tokio::test]
async fn test_beam_search_cardinality() {
    let generator = Generator::new(MockSession::new(decoder_only(Some(5)), two_way));
    let out = generator
        .generate(
            &[vec![0]],
            overrides(json!({"num_beams": 3, "num_return_sequences": 2, "max_new_tokens": 4, "top_k": 0})),
        )
        .await
        .unwrap();

    assert_eq!(out.sequences.len(), 1);
    let group = &out.sequences[0];
    assert_eq!(group.len(), 2);
    assert!(group[0].score >= group[1].score);
    assert!(group.iter().all(|s| s.token_ids.len() <= 5 && s.token_ids[0] == 0));

    let sizes = generator.session().batch_sizes();
    assert_eq!(sizes[0], 1);
    assert!(sizes.iter().all(|&n| n <= 3));
}

#[tokio::test]
async fn test_beam_search_prefers_best_path() {
    let generator = Generator::new(MockSession::new(decoder_only(None), two_way));
    let out = generator
        .generate(
            &[vec![0]],
            overrides(json!({"num_beams": 2, "max_new_tokens": 2, "top_k": 0})),
        )
        .await
        .unwrap();
    assert_eq!(out.token_ids(), vec![vec![vec![0, 1, 2]]]);
    assert_eq!(out.finish_reasons(), vec![vec![FinishReason::Length]]);
}

#[tokio::test]
async fn test_prompt_at_length_limit_keeps_its_own_group() {
    let generator = Generator::new(MockSession::new(decoder_only(None), two_way));
    let out = generator
        .generate(
            &[vec![0, 1, 2], vec![0]],
            overrides(json!({"num_beams": 2, "num_return_sequences": 2, "max_length": 3, "top_k": 0})),
        )
        .await
        .unwrap();

    assert_eq!(
        out.token_ids(),
        vec![vec![vec![0, 1, 2]], vec![vec![0, 1, 2], vec![0, 1, 3]]]
    );
    assert_eq!(
        out.finish_reasons(),
        vec![vec![FinishReason::Length], vec![FinishReason::Length; 2]]
    );
    assert!(generator.session().batch_sizes().iter().all(|&n| n <= 2));
}

#[tokio::test]
async fn test_sampling_returns_independent_sequences() {
    let generator = Generator::new(MockSession::new(decoder_only(None), two_way));
    let out = generator
        .generate(
            &[vec![0], vec![3]],
            overrides(json!({"do_sample": true, "num_return_sequences": 3, "max_new_tokens": 2, "seed": 1})),
        )
        .await
        .unwrap();

    let ids = out.token_ids();
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|group| group.len() == 3));
    assert!(ids[0].iter().all(|s| s.len() == 3 && s[0] == 0));
    assert!(ids[1].iter().all(|s| s.len() == 3 && s[0] == 3));
    assert_eq!(generator.session().batch_sizes(), vec![6, 6]);
}

#[tokio::test]
async fn test_cancelled_before_first_step_returns_prompt() {
    let generator = Generator::new(MockSession::new(decoder_only(Some(4)), successor));
    let flag = CancellationFlag::new();
    flag.cancel();
    let mut options = GenerateOptions::default();
    options.stopping_criteria.push(flag);

    let out = generator.generate(&[vec![1, 2]], options).await.unwrap();
    assert_eq!(out.token_ids(), vec![vec![vec![1, 2]]]);
    assert_eq!(out.finish_reasons(), vec![vec![FinishReason::Cancelled]]);
    assert!(generator.session().forward_calls().is_empty());
}

#[derive(Debug)]
struct StopAtLength(usize);

impl StoppingCriteria for StopAtLength {
    fn should_stop(&self, sequences: &[&[u32]]) -> bool {
        sequences.iter().any(|s| s.len() >= self.0)
    }
}

#[tokio::test]
async fn test_stopping_criteria_returns_partial_result() {
    let generator = Generator::new(MockSession::new(decoder_only(None), successor));
    let mut options = GenerateOptions::default();
    options.stopping_criteria.push(StopAtLength(3));

    let out = generator.generate(&[vec![0]], options).await.unwrap();
    assert_eq!(out.token_ids(), vec![vec![vec![0, 1, 2]]]);
    assert_eq!(out.finish_reasons(), vec![vec![FinishReason::Cancelled]]);
    assert_eq!(generator.session().forward_calls().len(), 2);
}

#[tokio::test]
async fn test_encoder_decoder_seeds_with_decoder_start() {
    let config = ModelConfig {
        vocab_size: 6,
        is_encoder_decoder: true,
        eos_token_id: Some(3),
        decoder_start_token_id: Some(0),
        ..ModelConfig::default()
    };
    let generator = Generator::new(MockSession::new(config, successor));
    let out = generator
        .generate(&[vec![4, 4], vec![5]], GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(out.token_ids(), vec![vec![vec![0, 1, 2, 3]], vec![vec![0, 1, 2, 3]]]);
    assert_eq!(generator.session().calls.lock().unwrap().encode, 2);
    assert_eq!(generator.session().forward_calls()[0][0].0, vec![0]);
}

#[tokio::test]
async fn test_model_failure_aborts_generation() {
    let mut session = MockSession::new(decoder_only(Some(4)), successor);
    session.fail_at = Some(1);
    let generator = Generator::new(session);
    let err = generator
        .generate(&[vec![0]], GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Model(_)));
}

#[tokio::test]
async fn test_invalid_config_fails_before_model_calls() {
    let generator = Generator::new(MockSession::new(decoder_only(Some(4)), successor));
    let err = generator
        .generate(&[vec![0]], overrides(json!({"num_return_sequences": 2})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(generator.session().forward_calls().is_empty());
}

#[tokio::test]
async fn test_without_cache_feeds_full_sequences() {
    let generator = Generator::new(MockSession::new(decoder_only(Some(4)), successor));
    generator
        .generate(&[vec![1]], overrides(json!({"use_cache": false})))
        .await
        .unwrap();
    let lens: Vec<usize> = generator
        .session()
        .forward_calls()
        .iter()
        .map(|call| {
            assert!(!call[0].2);
            call[0].0.len()
        })
        .collect();
    assert_eq!(lens, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_return_dict_includes_past_state() {
    let generator = Generator::new(MockSession::new(decoder_only(Some(4)), successor));
    let out = generator
        .generate(&[vec![1]], overrides(json!({"return_dict_in_generate": true})))
        .await
        .unwrap();
    assert_eq!(out.sequences[0][0].past_key_values, Some(vec![1, 2, 3]));
}

#[tokio::test]
async fn test_seeded_sampling_repeats() {
    let generator = Generator::new(MockSession::new(decoder_only(None), two_way));
    let options = || {
        overrides(json!({"do_sample": true, "seed": 11, "top_k": 0, "max_new_tokens": 6}))
    };
    let a = generator.generate(&[vec![0]], options()).await.unwrap();
    let b = generator.generate(&[vec![0]], options()).await.unwrap();
    assert_eq!(a.token_ids(), b.token_ids());
    assert_eq!(a.token_ids()[0][0].len(), 7);
}

#[tokio::test]
async fn test_runtime_text_round_trip() {
    let tokenizer_json = r#"{
        "added_tokens": [{"id": 4, "content": "</s>", "special": true}],
        "pre_tokenizer": {"type": "WhitespaceSplit"},
        "model": {
            "type": "WordPiece",
            "vocab": {"[UNK]": 0, "a": 1, "b": 2, "c": 3, "</s>": 4}
        }
    }"#;
    let options: TokenizerOptions =
        serde_json::from_value(json!({"eos_token": "</s>", "unk_token": "[UNK]"})).unwrap();
    let tokenizer = TokenizerPipeline::from_config(
        TokenizerJson::from_json_str(tokenizer_json).unwrap(),
        options,
    )
    .unwrap();

    let model = ModelConfig {
        vocab_size: 5,
        ..ModelConfig::default()
    };
    let runtime = Runtime::new(MockSession::new(model, successor), tokenizer);
    assert_eq!(runtime.generator().generation_config().eos_token_ids(), vec![4]);

    let text = runtime.generate("a b", None).await.unwrap();
    assert_eq!(text, "a b c");
}
