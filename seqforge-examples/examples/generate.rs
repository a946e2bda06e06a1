//! Text generation with a bigram model learned from a corpus
//!
//! Usage:
//!   # Greedy decoding, corpus read from a text file:
//!   cargo run --example generate -- -t /path/to/model -c corpus.txt "The cat"
//!   # Beam search returning the two best continuations:
//!   cargo run --example generate -- -t tokenizer.json -c corpus.txt -b 4 -r 2 "The cat"
//!   # Sampling:
//!   cargo run --example generate -- -t tokenizer.json -c corpus.txt --sample -k 20 -p 0.9 "The"

use std::path::Path;
use std::time::Instant;

use clap::Parser;
use serde_json::{json, Map, Value};

use seqforge::{GenerationConfig, ModelConfig, Result, Tokenizer as _, TokenizerPipeline};
use seqforge_examples::BigramModel;
use seqforge_runtime::{Generator, Runtime};

/// Generate text with a corpus-trained bigram model
///
/// Every line of the corpus is tokenized and adjacent token pairs are
/// counted. Generation options map onto `generation_config.json` keys.
#[derive(Parser)]
#[command(name = "generate")]
struct Cli {
    /// Path to a model directory or a tokenizer.json file
    #[arg(short, long, env = "SEQFORGE_TOKENIZER")]
    tokenizer: String,

    /// Text file to learn bigrams from
    #[arg(short, long)]
    corpus: String,

    /// Text prompt
    #[arg(default_value = "Hello")]
    prompt: String,

    /// Maximum tokens to generate
    #[arg(short = 'n', long, default_value_t = 32)]
    max_new_tokens: usize,

    /// Number of beams (1 = no beam search)
    #[arg(short = 'b', long, default_value_t = 1)]
    num_beams: usize,

    /// Sequences to return
    #[arg(short = 'r', long, default_value_t = 1)]
    num_return_sequences: usize,

    /// Sample instead of taking the argmax
    #[arg(long)]
    sample: bool,

    /// Sampling temperature
    #[arg(long, default_value_t = 1.0)]
    temperature: f32,

    /// Top-k restriction (0 = none)
    #[arg(short = 'k', long, default_value_t = 50)]
    top_k: usize,

    /// Nucleus sampling threshold
    #[arg(short = 'p', long, default_value_t = 1.0)]
    top_p: f32,

    /// Repetition penalty factor (1.0 = disabled)
    #[arg(long, default_value_t = 1.0)]
    repetition_penalty: f32,

    /// Ban repeated n-grams of this size (0 = disabled)
    #[arg(long, default_value_t = 0)]
    no_repeat_ngram_size: usize,

    /// RNG seed for sampling
    #[arg(short, long)]
    seed: Option<u64>,

    /// generation_config.json to start from
    #[arg(long)]
    generation_config: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    /// Options given on the command line as a generation config layer.
    fn overrides(&self) -> Value {
        let mut layer = Map::new();
        layer.insert("max_new_tokens".into(), json!(self.max_new_tokens));
        layer.insert("num_beams".into(), json!(self.num_beams));
        layer.insert("num_return_sequences".into(), json!(self.num_return_sequences));
        layer.insert("do_sample".into(), json!(self.sample));
        layer.insert("temperature".into(), json!(self.temperature));
        layer.insert("top_k".into(), json!(self.top_k));
        layer.insert("top_p".into(), json!(self.top_p));
        layer.insert("repetition_penalty".into(), json!(self.repetition_penalty));
        layer.insert("no_repeat_ngram_size".into(), json!(self.no_repeat_ngram_size));
        if let Some(seed) = self.seed {
            layer.insert("seed".into(), json!(seed));
        }
        Value::Object(layer)
    }
}

fn load_tokenizer(path: &str) -> Result<TokenizerPipeline> {
    if Path::new(path).is_dir() {
        TokenizerPipeline::from_pretrained(path)
    } else {
        TokenizerPipeline::from_file(path)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    seqforge_examples::init_tracing(&cli.log_level);

    println!("Loading tokenizer from: {}", cli.tokenizer);
    let tokenizer = load_tokenizer(&cli.tokenizer)?;

    let corpus = std::fs::read_to_string(&cli.corpus)?;
    let lines = corpus
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| tokenizer.encode(l, None, false))
        .collect::<Result<Vec<_>>>()?;

    let model_config = ModelConfig {
        vocab_size: tokenizer.vocab_size(),
        eos_token_id: tokenizer.eos_token_id(),
        pad_token_id: tokenizer.pad_token_id(),
        bos_token_id: tokenizer.bos_token_id(),
        ..ModelConfig::default()
    };
    let model = BigramModel::train(model_config, lines.iter().map(Vec::as_slice));
    println!(
        "Model trained on {} lines (vocab {})",
        lines.len(),
        tokenizer.vocab_size()
    );

    let mut generator = Generator::new(model);
    if let Some(path) = &cli.generation_config {
        let defaults = GenerationConfig::from_file(path)?;
        generator = generator.with_generation_config(defaults);
    }
    let runtime = Runtime::with_generator(generator, tokenizer);

    let start = Instant::now();
    let texts: Vec<String> = runtime
        .generate_batch(&[cli.prompt.as_str()], Some(cli.overrides()))
        .await?
        .into_iter()
        .flatten()
        .collect();
    let elapsed = start.elapsed();

    for (i, text) in texts.iter().enumerate() {
        println!("[{i}] {text}");
    }
    println!("Generated {} sequence(s) in {:.2}s", texts.len(), elapsed.as_secs_f64());

    Ok(())
}
