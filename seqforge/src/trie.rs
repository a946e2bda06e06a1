//! Character prefix tree over vocabulary entries.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct TrieNode {
    is_leaf: bool,
    children: HashMap<char, TrieNode>,
}

/// Prefix tree keyed by `char`.
///
/// Built once from a vocabulary and queried for every known token that is a
/// prefix of some input suffix (Unigram lattice construction).
#[derive(Debug, Clone, Default)]
pub struct Trie {
    root: TrieNode,
    len: usize,
}

impl Trie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one entry. Empty strings are ignored.
    pub fn push(&mut self, entry: &str) {
        if entry.is_empty() {
            return;
        }
        let mut node = &mut self.root;
        for ch in entry.chars() {
            node = node.children.entry(ch).or_default();
        }
        if !node.is_leaf {
            node.is_leaf = true;
            self.len += 1;
        }
    }

    pub fn extend<I, S>(&mut self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for entry in entries {
            self.push(entry.as_ref());
        }
    }

    #[must_use]
    pub fn contains(&self, entry: &str) -> bool {
        let mut node = &self.root;
        for ch in entry.chars() {
            match node.children.get(&ch) {
                Some(next) => node = next,
                None => return false,
            }
        }
        node.is_leaf
    }

    /// All entries that are a prefix of `text`, shortest first.
    ///
    /// Yielded values borrow from `text`.
    pub fn common_prefix_search<'a>(&'a self, text: &'a str) -> CommonPrefixIter<'a> {
        CommonPrefixIter {
            node: Some(&self.root),
            text,
            chars: text.char_indices(),
        }
    }

    /// Number of distinct entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<S: AsRef<str>> FromIterator<S> for Trie {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut trie = Self::new();
        trie.extend(iter);
        trie
    }
}

/// Iterator returned by [`Trie::common_prefix_search`].
pub struct CommonPrefixIter<'a> {
    node: Option<&'a TrieNode>,
    text: &'a str,
    chars: std::str::CharIndices<'a>,
}

impl<'a> Iterator for CommonPrefixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node?;
            let Some((offset, ch)) = self.chars.next() else {
                self.node = None;
                return None;
            };
            let child = node.children.get(&ch);
            self.node = child;
            if let Some(child) = child {
                if child.is_leaf {
                    return Some(&self.text[..offset + ch.len_utf8()]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_prefixes_in_length_order() {
        let trie: Trie = ["a", "ab", "abc", "b", "abd"].into_iter().collect();
        let found: Vec<&str> = trie.common_prefix_search("abcx").collect();
        assert_eq!(found, vec!["a", "ab", "abc"]);
    }

    #[test]
    fn test_no_match() {
        let trie: Trie = ["hello"].into_iter().collect();
        assert_eq!(trie.common_prefix_search("help").count(), 0);
        assert!(!trie.contains("hel"));
        assert!(trie.contains("hello"));
    }

    #[test]
    fn test_multibyte_prefixes() {
        let trie: Trie = ["▁", "▁he", "é"].into_iter().collect();
        let found: Vec<&str> = trie.common_prefix_search("▁hello").collect();
        assert_eq!(found, vec!["▁", "▁he"]);
        assert_eq!(trie.common_prefix_search("éa").collect::<Vec<_>>(), vec!["é"]);
    }

    #[test]
    fn test_len_counts_distinct_entries() {
        let mut trie = Trie::new();
        trie.extend(["x", "x", "xy", ""]);
        assert_eq!(trie.len(), 2);
    }
}
