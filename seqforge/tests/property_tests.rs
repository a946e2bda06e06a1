//! Property-based tests for the tokenizer pipeline.
//!
//! Key invariants:
//! - Plain ASCII text survives encode → decode for each model family
//! - Encoding is deterministic (the BPE cache never changes results)
//! - WordPiece maps an unsegmentable word to exactly one unknown id
//! - `top_k` returns the largest values, largest first

use std::collections::HashMap;

use proptest::prelude::*;
use seqforge::logits::top_k;
use seqforge::tokenizer::byte_level::bytes_to_unicode;
use seqforge::tokenizer::DecodeOptions;
use seqforge::TokenizerPipeline;
use serde_json::json;

fn no_clean_up() -> DecodeOptions {
    DecodeOptions {
        skip_special_tokens: true,
        clean_up_tokenization_spaces: Some(false),
    }
}

fn byte_level_bpe() -> TokenizerPipeline {
    let vocab: HashMap<String, u32> = bytes_to_unicode()
        .iter()
        .zip(0u32..)
        .map(|(c, id)| (c.to_string(), id))
        .chain([("th".to_string(), 256), ("the".to_string(), 257), ("Ġt".to_string(), 258)])
        .collect();
    let config = json!({
        "pre_tokenizer": {"type": "ByteLevel", "add_prefix_space": false},
        "model": {"type": "BPE", "vocab": vocab, "merges": ["t h", "th e", "Ġ t"]},
        "decoder": {"type": "ByteLevel"}
    });
    TokenizerPipeline::from_config(
        serde_json::from_value(config).unwrap(),
        seqforge::tokenizer::TokenizerOptions::default(),
    )
    .unwrap()
}

/// Every lowercase letter is a word, so any space-separated lowercase text
/// segments without unknowns.
fn letters_wordpiece() -> TokenizerPipeline {
    let mut vocab: HashMap<String, u32> = HashMap::new();
    vocab.insert("[UNK]".into(), 0);
    for (i, c) in ('a'..='z').enumerate() {
        let id = u32::try_from(i).unwrap();
        vocab.insert(c.to_string(), 1 + id);
        vocab.insert(format!("##{c}"), 27 + id);
    }
    let config = json!({
        "pre_tokenizer": {"type": "WhitespaceSplit"},
        "model": {"type": "WordPiece", "vocab": vocab},
        "decoder": {"type": "WordPiece", "cleanup": false}
    });
    TokenizerPipeline::from_config(
        serde_json::from_value(config).unwrap(),
        seqforge::tokenizer::TokenizerOptions::default(),
    )
    .unwrap()
}

fn letters_unigram() -> TokenizerPipeline {
    let mut vocab = vec![json!(["<unk>", 0.0]), json!(["▁", -2.0])];
    for c in 'a'..='z' {
        vocab.push(json!([c.to_string(), -3.0]));
        vocab.push(json!([format!("▁{c}"), -2.5]));
    }
    let config = json!({
        "pre_tokenizer": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "always"},
        "model": {"type": "Unigram", "unk_id": 0, "vocab": vocab},
        "decoder": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "always"}
    });
    TokenizerPipeline::from_config(
        serde_json::from_value(config).unwrap(),
        seqforge::tokenizer::TokenizerOptions::default(),
    )
    .unwrap()
}

/// Lowercase words joined by single spaces.
fn words() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,8}", 1..6).prop_map(|w| w.join(" "))
}

proptest! {
    /// Byte-level BPE is lossless on any printable ASCII text.
    #[test]
    fn bpe_round_trip(text in "[ -~]{1,40}") {
        let tok = byte_level_bpe();
        let ids = tok.encode(&text, None, true).unwrap();
        prop_assert_eq!(tok.decode(&ids, &no_clean_up()).unwrap(), text);
    }

    /// Repeated encoding gives the same ids, cached or not.
    #[test]
    fn bpe_is_deterministic(text in "[a-z ]{1,40}") {
        let tok = byte_level_bpe();
        let first = tok.encode(&text, None, true).unwrap();
        let second = tok.encode(&text, None, true).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn wordpiece_round_trip(text in words()) {
        let tok = letters_wordpiece();
        let ids = tok.encode(&text, None, true).unwrap();
        prop_assert!(!ids.contains(&0));
        prop_assert_eq!(tok.decode(&ids, &no_clean_up()).unwrap(), text);
    }

    /// A word with a character outside the vocabulary is one unknown id.
    #[test]
    fn wordpiece_unknown_word_is_single_id(prefix in "[a-z]{0,5}", suffix in "[a-z]{0,5}") {
        let tok = letters_wordpiece();
        let word = format!("{prefix}7{suffix}");
        prop_assert_eq!(tok.encode(&word, None, true).unwrap(), vec![0]);
    }

    #[test]
    fn unigram_round_trip(text in words()) {
        let tok = letters_unigram();
        let ids = tok.encode(&text, None, true).unwrap();
        prop_assert!(!ids.contains(&0));
        prop_assert_eq!(tok.decode(&ids, &no_clean_up()).unwrap(), text);
    }

    #[test]
    fn top_k_is_sorted_prefix(values in prop::collection::vec(-100.0f32..100.0, 1..50), k in 0usize..60) {
        let top = top_k(&values, k);
        let expected_len = if k == 0 { values.len() } else { k.min(values.len()) };
        prop_assert_eq!(top.len(), expected_len);
        prop_assert!(top.windows(2).all(|w| w[0].1 >= w[1].1));
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        for (i, &(_, v)) in top.iter().enumerate() {
            prop_assert!((v - sorted[i]).abs() < f32::EPSILON);
        }
    }
}
