//! Tokenize text with a Hugging Face tokenizer definition
//!
//! Usage:
//!   # Model directory holding tokenizer.json (and optionally tokenizer_config.json):
//!   cargo run --example tokenize -- -t /path/to/model "Hello world"
//!   # A bare tokenizer.json, with a second sequence:
//!   cargo run --example tokenize -- -t tokenizer.json "How are you?" --pair "Fine."

use std::path::Path;

use clap::Parser;
use seqforge::tokenizer::DecodeOptions;
use seqforge::{Result, TokenizerPipeline};

/// Encode text, show the tokens, and decode them back
#[derive(Parser)]
#[command(name = "tokenize")]
struct Cli {
    /// Path to a model directory or a tokenizer.json file
    #[arg(short, long, env = "SEQFORGE_TOKENIZER")]
    tokenizer: String,

    /// Text to encode
    text: String,

    /// Optional second sequence
    #[arg(long)]
    pair: Option<String>,

    /// Do not add the post-processor's special tokens
    #[arg(long)]
    no_special_tokens: bool,

    /// Keep special tokens when decoding
    #[arg(long)]
    keep_special: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load(path: &str) -> Result<TokenizerPipeline> {
    if Path::new(path).is_dir() {
        TokenizerPipeline::from_pretrained(path)
    } else {
        TokenizerPipeline::from_file(path)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    seqforge_examples::init_tracing(&cli.log_level);

    let tokenizer = load(&cli.tokenizer)?;
    println!("Vocabulary size: {}", tokenizer.vocab().len());

    let encoding =
        tokenizer.encode_with_type_ids(&cli.text, cli.pair.as_deref(), !cli.no_special_tokens)?;
    let tokens = tokenizer.convert_ids_to_tokens(&encoding.ids);

    println!("{:>8}  {:>4}  token", "id", "type");
    for ((id, type_id), token) in encoding.ids.iter().zip(&encoding.token_type_ids).zip(&tokens) {
        println!("{id:>8}  {type_id:>4}  {}", token.as_deref().unwrap_or("<?>"));
    }

    let decoded = tokenizer.decode(
        &encoding.ids,
        &DecodeOptions {
            skip_special_tokens: !cli.keep_special,
            clean_up_tokenization_spaces: None,
        },
    )?;
    println!("Decoded: {decoded:?}");
    Ok(())
}
