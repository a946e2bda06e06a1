//! Bidirectional token ↔ id mapping shared by every tokenizer model.

use std::collections::HashMap;

use crate::{Error, Result};

/// A bijective mapping between token strings and ids.
///
/// Unknown tokens resolve to the configured unknown-token id. Entries are only
/// ever added, never removed, so ids handed out once stay valid.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    token_to_id: HashMap<String, u32>,
    /// Keyed rather than indexed, so a sparse id space costs nothing.
    id_to_token: HashMap<u32, String>,
    /// One past the largest assigned id.
    id_space: usize,
    unk_id: Option<u32>,
}

impl Vocabulary {
    /// Build a vocabulary from a `token → id` map.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if two tokens share an id.
    pub fn from_map(map: HashMap<String, u32>) -> Result<Self> {
        let mut id_to_token = HashMap::with_capacity(map.len());
        for (token, &id) in &map {
            if let Some(existing) = id_to_token.insert(id, token.clone()) {
                return Err(Error::config(format!(
                    "tokens {existing:?} and {token:?} share id {id}"
                )));
            }
        }
        Ok(Self {
            id_space: map.values().map(|&id| id as usize + 1).max().unwrap_or(0),
            token_to_id: map,
            id_to_token,
            unk_id: None,
        })
    }

    /// Build a vocabulary where each token's id is its position in `tokens`.
    ///
    /// Duplicate tokens keep their first id.
    #[must_use]
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self::default();
        for token in tokens {
            let token = token.into();
            #[allow(clippy::cast_possible_truncation)]
            let id = vocab.id_space as u32;
            vocab.token_to_id.entry(token.clone()).or_insert(id);
            vocab.id_to_token.insert(id, token);
            vocab.id_space += 1;
        }
        vocab
    }

    /// Designate `token` as the unknown token.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `token` is not in the vocabulary.
    pub fn with_unk_token(mut self, token: &str) -> Result<Self> {
        let id = self.token_to_id(token).ok_or_else(|| {
            Error::config(format!("unknown token {token:?} is not in the vocabulary"))
        })?;
        self.unk_id = Some(id);
        Ok(self)
    }

    /// Designate `id` as the unknown-token id.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `id` is not assigned.
    pub fn with_unk_id(mut self, id: u32) -> Result<Self> {
        if self.id_to_token(id).is_none() {
            return Err(Error::config(format!(
                "unknown-token id {id} is outside the vocabulary"
            )));
        }
        self.unk_id = Some(id);
        Ok(self)
    }

    /// Add a token, returning its id. Existing tokens keep their id.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `id` already belongs to another token.
    pub fn insert(&mut self, token: &str, id: u32) -> Result<u32> {
        if let Some(&existing) = self.token_to_id.get(token) {
            return Ok(existing);
        }
        if let Some(holder) = self.id_to_token.get(&id) {
            return Err(Error::config(format!(
                "cannot add {token:?} with id {id}, already held by {holder:?}"
            )));
        }
        self.id_to_token.insert(id, token.to_string());
        self.token_to_id.insert(token.to_string(), id);
        self.id_space = self.id_space.max(id as usize + 1);
        Ok(id)
    }

    #[must_use]
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    #[must_use]
    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.token_to_id.contains_key(token)
    }

    /// Look up `token`, falling back to the unknown-token id.
    ///
    /// # Errors
    /// Returns [`Error::Tokenizer`] if the token is unknown and no
    /// unknown-token id is configured.
    pub fn resolve(&self, token: &str) -> Result<u32> {
        self.token_to_id(token)
            .or(self.unk_id)
            .ok_or_else(|| {
                Error::Tokenizer(format!(
                    "token {token:?} is not in the vocabulary and no unknown token is configured"
                ))
            })
    }

    /// Look up the token for `id`, falling back to the unknown token.
    #[must_use]
    pub fn resolve_token(&self, id: u32) -> Option<&str> {
        self.id_to_token(id)
            .or_else(|| self.unk_id.and_then(|unk| self.id_to_token(unk)))
    }

    #[must_use]
    pub fn unk_id(&self) -> Option<u32> {
        self.unk_id
    }

    #[must_use]
    pub fn unk_token(&self) -> Option<&str> {
        self.unk_id.and_then(|id| self.id_to_token(id))
    }

    /// Number of distinct tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    /// One past the largest assigned id; the width of a logits row.
    #[must_use]
    pub fn id_space(&self) -> usize {
        self.id_space
    }

    /// Iterate `(token, id)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.token_to_id.iter().map(|(t, &id)| (t.as_str(), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> HashMap<String, u32> {
        [("[UNK]", 0), ("hello", 1), ("world", 2)]
            .into_iter()
            .map(|(t, id)| (t.to_string(), id))
            .collect()
    }

    #[test]
    fn test_lookup_both_directions() {
        let vocab = Vocabulary::from_map(sample_map()).unwrap();
        assert_eq!(vocab.token_to_id("hello"), Some(1));
        assert_eq!(vocab.id_to_token(2), Some("world"));
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn test_unknown_resolves_to_unk() {
        let vocab = Vocabulary::from_map(sample_map())
            .unwrap()
            .with_unk_token("[UNK]")
            .unwrap();
        assert_eq!(vocab.resolve("nope").unwrap(), 0);
        assert_eq!(vocab.resolve_token(99), Some("[UNK]"));
    }

    #[test]
    fn test_unknown_without_unk_is_error() {
        let vocab = Vocabulary::from_map(sample_map()).unwrap();
        assert!(vocab.resolve("nope").is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut map = sample_map();
        map.insert("again".into(), 1);
        assert!(Vocabulary::from_map(map).is_err());
    }

    #[test]
    fn test_insert_keeps_existing_id() {
        let mut vocab = Vocabulary::from_tokens(["a", "b"]);
        assert_eq!(vocab.insert("a", 7).unwrap(), 0);
        assert_eq!(vocab.insert("<pad>", 5).unwrap(), 5);
        assert_eq!(vocab.id_space(), 6);
        assert_eq!(vocab.id_to_token(3), None);
    }

    #[test]
    fn test_insert_rejects_taken_id() {
        let mut vocab = Vocabulary::from_tokens(["a", "b"]);
        assert!(matches!(vocab.insert("<s>", 1), Err(Error::Config(_))));
        assert_eq!(vocab.token_to_id("<s>"), None);
        assert_eq!(vocab.id_to_token(1), Some("b"));
        assert_eq!(vocab.token_to_id("b"), Some(1));
    }

    #[test]
    fn test_sparse_ids_are_cheap() {
        let map = [("a", 0), ("far", u32::MAX - 1)]
            .into_iter()
            .map(|(t, id)| (t.to_string(), id))
            .collect();
        let vocab = Vocabulary::from_map(map).unwrap();
        assert_eq!(vocab.id_to_token(u32::MAX - 1), Some("far"));
        assert_eq!(vocab.id_to_token(1), None);
        assert_eq!(vocab.id_space(), u32::MAX as usize);
        assert_eq!(vocab.len(), 2);
    }
}
