//! Byte-pair encoding with rank-ordered merges.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use super::{byte_fallback_tokens, MergeRule, TokenizerModel};
use crate::heap::PriorityQueue;
use crate::vocab::Vocabulary;
use crate::{Error, Result};

/// Maximum number of memoized words.
const CACHE_CAPACITY: usize = 10_000;

/// Optional BPE behaviors, mirroring the `tokenizer.json` fields.
#[derive(Debug, Clone, Default)]
pub struct BpeOptions {
    pub unk_token: Option<String>,
    pub continuing_subword_prefix: Option<String>,
    pub end_of_word_suffix: Option<String>,
    pub byte_fallback: bool,
    pub fuse_unk: bool,
    pub ignore_merges: bool,
}

/// Rank-based BPE.
///
/// Pre-tokens arrive already remapped (e.g. by the byte-level pre-tokenizer).
/// Each word starts as one symbol per char and the adjacent pair with the
/// lowest merge rank is merged until no ranked pair remains; ties go to the
/// leftmost pair.
#[derive(Debug)]
pub struct Bpe {
    vocab: Vocabulary,
    ranks: HashMap<(String, String), u32>,
    options: BpeOptions,
    cache: RwLock<HashMap<String, Vec<String>>>,
}

#[derive(Debug)]
struct Symbol {
    text: String,
    prev: Option<usize>,
    next: Option<usize>,
    alive: bool,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    rank: u32,
    left: usize,
    right: usize,
    /// Combined byte length when queued; a mismatch means a side has grown.
    len: usize,
}

impl Bpe {
    /// # Errors
    /// Returns [`Error::Config`] on a malformed merge rule, a duplicate id, or
    /// an `unk_token` missing from the vocabulary.
    pub fn new(vocab: HashMap<String, u32>, merges: &[MergeRule], options: BpeOptions) -> Result<Self> {
        let mut vocab = Vocabulary::from_map(vocab)?;
        if let Some(unk) = &options.unk_token {
            vocab = vocab.with_unk_token(unk)?;
        }

        let mut ranks = HashMap::with_capacity(merges.len());
        for (rank, rule) in merges.iter().enumerate() {
            let (a, b) = match rule {
                MergeRule::Pair(a, b) => (a.clone(), b.clone()),
                MergeRule::Joined(joined) => {
                    let mut parts = joined.splitn(2, ' ');
                    match (parts.next(), parts.next()) {
                        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
                            (a.to_string(), b.to_string())
                        }
                        _ => {
                            return Err(Error::config(format!(
                                "merge rule {rank} ({joined:?}) is not a space-separated pair"
                            )))
                        }
                    }
                }
            };
            #[allow(clippy::cast_possible_truncation)]
            let rank = rank as u32;
            ranks.entry((a, b)).or_insert(rank);
        }

        debug!(
            vocab_size = vocab.len(),
            merges = ranks.len(),
            byte_fallback = options.byte_fallback,
            "Built BPE model"
        );

        Ok(Self {
            vocab,
            ranks,
            options,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn rank(&self, left: &str, right: &str) -> Option<u32> {
        self.ranks
            .get(&(left.to_string(), right.to_string()))
            .copied()
    }

    fn candidate(&self, symbols: &[Symbol], left: usize, right: usize) -> Option<Candidate> {
        let (l, r) = (&symbols[left].text, &symbols[right].text);
        self.rank(l, r).map(|rank| Candidate {
            rank,
            left,
            right,
            len: l.len() + r.len(),
        })
    }

    /// Merge loop over one word; returns the surviving symbols in order.
    fn merge_word(&self, word: &str) -> Vec<String> {
        let chars: Vec<char> = word.chars().collect();
        let last = chars.len().saturating_sub(1);
        let mut symbols: Vec<Symbol> = chars
            .iter()
            .enumerate()
            .map(|(i, ch)| {
                let mut text = String::new();
                if i > 0 {
                    if let Some(prefix) = &self.options.continuing_subword_prefix {
                        text.push_str(prefix);
                    }
                }
                text.push(*ch);
                if i == last {
                    if let Some(suffix) = &self.options.end_of_word_suffix {
                        text.push_str(suffix);
                    }
                }
                Symbol {
                    text,
                    prev: i.checked_sub(1),
                    next: (i < last).then_some(i + 1),
                    alive: true,
                }
            })
            .collect();

        let mut queue = PriorityQueue::new(|a: &Candidate, b: &Candidate| {
            b.rank.cmp(&a.rank).then_with(|| b.left.cmp(&a.left))
        });
        for i in 1..symbols.len() {
            if let Some(c) = self.candidate(&symbols, i - 1, i) {
                queue.push(c);
            }
        }

        while let Some(c) = queue.pop() {
            let (l, r) = (&symbols[c.left], &symbols[c.right]);
            let stale = !l.alive
                || !r.alive
                || l.next != Some(c.right)
                || l.text.len() + r.text.len() != c.len;
            if stale {
                continue;
            }

            let right_text = std::mem::take(&mut symbols[c.right].text);
            let right_next = symbols[c.right].next;
            symbols[c.right].alive = false;
            let left = &mut symbols[c.left];
            let joined = match &self.options.continuing_subword_prefix {
                Some(prefix) => right_text.strip_prefix(prefix.as_str()).unwrap_or(&right_text),
                None => &right_text,
            };
            left.text.push_str(joined);
            left.next = right_next;
            if let Some(next) = right_next {
                symbols[next].prev = Some(c.left);
            }

            if let Some(prev) = symbols[c.left].prev {
                if let Some(nc) = self.candidate(&symbols, prev, c.left) {
                    queue.push(nc);
                }
            }
            if let Some(next) = symbols[c.left].next {
                if let Some(nc) = self.candidate(&symbols, c.left, next) {
                    queue.push(nc);
                }
            }
        }

        symbols
            .into_iter()
            .filter(|s| s.alive)
            .map(|s| s.text)
            .collect()
    }

    /// Map merged symbols to vocabulary tokens, applying byte fallback and
    /// unknown-token fusing.
    fn finalize(&self, symbols: Vec<String>) -> Vec<String> {
        let mut out = Vec::with_capacity(symbols.len());
        let mut previous_unk = false;
        for symbol in symbols {
            if self.vocab.contains(&symbol) {
                out.push(symbol);
                previous_unk = false;
                continue;
            }
            if self.options.byte_fallback {
                if let Some(bytes) = byte_fallback_tokens(&self.vocab, &symbol) {
                    out.extend(bytes);
                    previous_unk = false;
                    continue;
                }
            }
            match self.vocab.unk_token() {
                Some(unk) => {
                    if !(self.options.fuse_unk && previous_unk) {
                        out.push(unk.to_string());
                    }
                    previous_unk = true;
                }
                // Left as-is; resolving it later reports the missing token.
                None => out.push(symbol),
            }
        }
        out
    }
}

impl TokenizerModel for Bpe {
    fn tokenize(&self, pre_token: &str) -> Result<Vec<String>> {
        if pre_token.is_empty() {
            return Ok(Vec::new());
        }
        if self.options.ignore_merges && self.vocab.contains(pre_token) {
            return Ok(vec![pre_token.to_string()]);
        }
        if let Ok(cache) = self.cache.read() {
            if let Some(hit) = cache.get(pre_token) {
                return Ok(hit.clone());
            }
        }

        let tokens = self.finalize(self.merge_word(pre_token));

        if let Ok(mut cache) = self.cache.write() {
            if cache.len() < CACHE_CAPACITY {
                cache.insert(pre_token.to_string(), tokens.clone());
            }
        }
        Ok(tokens)
    }

    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(vocab: &[&str], merges: &[&str], options: BpeOptions) -> Bpe {
        let map = vocab
            .iter()
            .enumerate()
            .map(|(i, t)| ((*t).to_string(), i as u32))
            .collect();
        let merges: Vec<MergeRule> = merges
            .iter()
            .map(|m| MergeRule::Joined((*m).to_string()))
            .collect();
        Bpe::new(map, &merges, options).unwrap()
    }

    #[test]
    fn test_lowest_rank_merges_first() {
        // "bc" outranks "ab", so "abc" must become ["a", "bc"].
        let bpe = model(&["a", "b", "c", "ab", "bc"], &["b c", "a b"], BpeOptions::default());
        assert_eq!(bpe.tokenize("abc").unwrap(), vec!["a", "bc"]);
    }

    #[test]
    fn test_leftmost_wins_equal_rank() {
        let bpe = model(&["a", "aa", "aaa"], &["a a"], BpeOptions::default());
        assert_eq!(bpe.tokenize("aaa").unwrap(), vec!["aa", "a"]);
    }

    #[test]
    fn test_byte_level_word() {
        let bpe = model(
            &["Ġ", "h", "e", "l", "o", "Ġh", "ll", "llo", "Ġhe", "Ġhello"],
            &["Ġ h", "l l", "ll o", "Ġh e", "Ġhe llo"],
            BpeOptions::default(),
        );
        assert_eq!(bpe.tokenize("Ġhello").unwrap(), vec!["Ġhello"]);
        assert_eq!(bpe.encode(&["Ġhello".to_string()]).unwrap(), vec![9]);
    }

    #[test]
    fn test_unknown_and_fuse() {
        let options = BpeOptions {
            unk_token: Some("<unk>".into()),
            fuse_unk: true,
            ..BpeOptions::default()
        };
        let bpe = model(&["<unk>", "a"], &[], options);
        assert_eq!(bpe.tokenize("axyza").unwrap(), vec!["a", "<unk>", "a"]);
    }

    #[test]
    fn test_byte_fallback() {
        let options = BpeOptions {
            byte_fallback: true,
            unk_token: Some("<unk>".into()),
            ..BpeOptions::default()
        };
        let bpe = model(&["<unk>", "a", "<0xC3>", "<0xA9>"], &[], options);
        assert_eq!(bpe.tokenize("aé").unwrap(), vec!["a", "<0xC3>", "<0xA9>"]);
    }

    #[test]
    fn test_subword_prefix_and_suffix() {
        let prefixed = BpeOptions {
            continuing_subword_prefix: Some("##".into()),
            ..BpeOptions::default()
        };
        let bpe = model(&["a", "##b", "ab"], &["a ##b"], prefixed);
        assert_eq!(bpe.tokenize("ab").unwrap(), vec!["ab"]);

        let suffixed = BpeOptions {
            end_of_word_suffix: Some("</w>".into()),
            ..BpeOptions::default()
        };
        let bpe = model(&["a", "b</w>", "ab</w>"], &["a b</w>"], suffixed);
        assert_eq!(bpe.tokenize("ab").unwrap(), vec!["ab</w>"]);
    }

    #[test]
    fn test_ignore_merges_and_cache_are_transparent() {
        let options = BpeOptions {
            ignore_merges: true,
            ..BpeOptions::default()
        };
        let bpe = model(&["a", "b", "ab", "abab"], &["a b"], options);
        assert_eq!(bpe.tokenize("abab").unwrap(), vec!["abab"]);
        let first = bpe.tokenize("aba").unwrap();
        let second = bpe.tokenize("aba").unwrap();
        assert_eq!(first, vec!["ab", "a"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_merge_rejected() {
        let map: HashMap<String, u32> = [("a".to_string(), 0)].into_iter().collect();
        let err = Bpe::new(map, &[MergeRule::Joined("nospace".into())], BpeOptions::default());
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
