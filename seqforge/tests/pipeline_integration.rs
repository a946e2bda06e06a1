//! End-to-end tokenizer pipelines built from `tokenizer.json` documents.

use std::collections::HashMap;

use seqforge::tokenizer::byte_level::bytes_to_unicode;
use seqforge::tokenizer::{
    DecodeOptions, EncodeOptions, Padding, TokenizerJson, TokenizerOptions,
};
use seqforge::{Error, Tokenizer, TokenizerPipeline};
use serde_json::json;

fn skip_special() -> DecodeOptions {
    DecodeOptions {
        skip_special_tokens: true,
        clean_up_tokenization_spaces: None,
    }
}

// ---------------------------------------------------------------------------
// WordPiece
// ---------------------------------------------------------------------------

fn bert(options: serde_json::Value) -> TokenizerPipeline {
    let config = json!({
        "normalizer": {"type": "BertNormalizer", "lowercase": true},
        "pre_tokenizer": {"type": "BertPreTokenizer"},
        "model": {
            "type": "WordPiece",
            "vocab": {"[CLS]": 0, "[SEP]": 1, "hello": 2, "world": 3, "[UNK]": 4,
                      "[PAD]": 5, "how": 6, "are": 7, "you": 8, "?": 9}
        },
        "post_processor": {"type": "BertProcessing", "sep": ["[SEP]", 1], "cls": ["[CLS]", 0]},
        "decoder": {"type": "WordPiece"}
    });
    let config: TokenizerJson = serde_json::from_value(config).unwrap();
    let options: TokenizerOptions = serde_json::from_value(options).unwrap();
    TokenizerPipeline::from_config(config, options).unwrap()
}

#[test]
fn test_wordpiece_end_to_end() {
    let tok = bert(json!({}));
    let ids = tok.encode("hello world", None, true).unwrap();
    assert_eq!(ids, vec![0, 2, 3, 1]);
    assert_eq!(tok.decode(&ids, &skip_special()).unwrap(), "hello world");
}

#[test]
fn test_wordpiece_unknown_word_is_one_token() {
    let tok = bert(json!({}));
    assert_eq!(tok.encode("Hello worldly", None, true).unwrap(), vec![0, 2, 4, 1]);
}

#[test]
fn test_bert_pair_and_clean_up() {
    let tok = bert(json!({}));
    let enc = tok
        .encode_with_type_ids("How are you?", Some("hello"), true)
        .unwrap();
    assert_eq!(enc.ids, vec![0, 6, 7, 8, 9, 1, 2, 1]);
    assert_eq!(enc.token_type_ids, vec![0, 0, 0, 0, 0, 0, 1, 1]);
    let text = tok.decode(&enc.ids[..6], &skip_special()).unwrap();
    assert_eq!(text, "how are you?");
}

#[test]
fn test_batch_padding_and_truncation() {
    let tok = bert(json!({"pad_token": "[PAD]", "model_max_length": 5}));
    let batch = tok
        .encode_batch(
            &["hello", "how are you?"],
            None,
            &EncodeOptions {
                padding: Padding::Longest,
                truncation: true,
                ..EncodeOptions::default()
            },
        )
        .unwrap();
    assert_eq!(batch.input_ids, vec![vec![0, 2, 1, 5, 5], vec![0, 6, 7, 8, 1]]);
    assert_eq!(batch.attention_mask, vec![vec![1, 1, 1, 0, 0], vec![1; 5]]);
    assert_eq!(batch.token_type_ids, vec![vec![0; 5], vec![0; 5]]);
}

#[test]
fn test_trait_surface() {
    let tok = bert(json!({"pad_token": "[PAD]", "unk_token": "[UNK]"}));
    let t: &dyn Tokenizer = &tok;
    assert_eq!(t.pad_token_id(), Some(5));
    assert_eq!(t.eos_token_id(), None);
    assert_eq!(t.vocab_size(), 10);
    assert_eq!(t.decode_token(3).unwrap(), "world");
    assert_eq!(t.decode(&[0, 2, 1], false).unwrap(), "[CLS] hello [SEP]");
}

#[test]
fn test_unknown_model_type_fails_at_construction() {
    let err = TokenizerPipeline::from_json_str(r#"{"model": {"type": "WordLevel", "vocab": {}}}"#)
        .unwrap_err();
    assert!(matches!(err, Error::Json(_) | Error::Config(_)));
}

#[test]
fn test_empty_decode_is_an_error() {
    let tok = bert(json!({}));
    assert!(matches!(
        tok.decode(&[], &DecodeOptions::default()),
        Err(Error::Decode(_))
    ));
}

// ---------------------------------------------------------------------------
// Byte-level BPE
// ---------------------------------------------------------------------------

fn byte_level_bpe() -> TokenizerPipeline {
    let mut vocab: HashMap<String, u32> = bytes_to_unicode()
        .iter()
        .zip(0u32..)
        .map(|(c, id)| (c.to_string(), id))
        .collect();
    for (token, id) in [("he", 256), ("ll", 257), ("hell", 258), ("hello", 259), ("Ġw", 260)] {
        vocab.insert(token.to_string(), id);
    }
    let config = json!({
        "pre_tokenizer": {"type": "ByteLevel", "add_prefix_space": false},
        "model": {
            "type": "BPE",
            "vocab": vocab,
            "merges": ["h e", "l l", "he ll", ["hell", "o"], "Ġ w"]
        },
        "decoder": {"type": "ByteLevel"}
    });
    TokenizerPipeline::from_config(
        serde_json::from_value(config).unwrap(),
        TokenizerOptions::default(),
    )
    .unwrap()
}

#[test]
fn test_byte_level_bpe_merges_by_rank() {
    let tok = byte_level_bpe();
    assert_eq!(
        tok.tokenize("hello world", None).unwrap(),
        vec!["hello", "Ġw", "o", "r", "l", "d"]
    );
    let ids = tok.encode("hello world", None, true).unwrap();
    assert_eq!(ids, vec![259, 260, 111, 114, 108, 100]);
    assert_eq!(tok.decode(&ids, &DecodeOptions::default()).unwrap(), "hello world");
}

#[test]
fn test_byte_level_bpe_round_trips_non_ascii() {
    let tok = byte_level_bpe();
    let text = "héllo wörld";
    let ids = tok.encode(text, None, true).unwrap();
    assert_eq!(tok.decode(&ids, &DecodeOptions::default()).unwrap(), text);
}

// ---------------------------------------------------------------------------
// Unigram
// ---------------------------------------------------------------------------

fn unigram() -> TokenizerPipeline {
    TokenizerPipeline::from_json_str(
        r#"{
            "pre_tokenizer": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "always"},
            "model": {
                "type": "Unigram",
                "unk_id": 0,
                "vocab": [["<unk>", 0.0], ["▁hello", -1.0], ["▁world", -1.5], ["▁", -3.0],
                          ["h", -4.0], ["e", -4.0], ["l", -4.0], ["o", -4.0]]
            },
            "decoder": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "always"}
        }"#,
    )
    .unwrap()
}

#[test]
fn test_unigram_round_trip() {
    let tok = unigram();
    let ids = tok.encode("hello world", None, true).unwrap();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(tok.decode(&ids, &DecodeOptions::default()).unwrap(), "hello world");
}

#[test]
fn test_unigram_fuses_unknown_run() {
    let tok = unigram();
    assert_eq!(tok.encode("hello zz", None, true).unwrap(), vec![1, 3, 0]);
}

// ---------------------------------------------------------------------------
// Loading from disk
// ---------------------------------------------------------------------------

#[test]
fn test_from_pretrained_reads_both_files() {
    let dir = std::env::temp_dir().join(format!("seqforge-pretrained-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("tokenizer.json"),
        r#"{"model": {"type": "WordPiece", "vocab": {"[UNK]": 0, "a": 1, "</s>": 2}},
            "pre_tokenizer": {"type": "WhitespaceSplit"}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("tokenizer_config.json"),
        r#"{"eos_token": {"content": "</s>"}, "padding_side": "left"}"#,
    )
    .unwrap();

    let tok = TokenizerPipeline::from_pretrained(&dir).unwrap();
    assert_eq!(Tokenizer::eos_token_id(&tok), Some(2));
    assert!(tok.is_special(2));

    std::fs::remove_dir_all(&dir).unwrap();
    assert!(matches!(
        TokenizerPipeline::from_pretrained(&dir),
        Err(Error::Config(_))
    ));
}
