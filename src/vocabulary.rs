use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::store::{StoreError, WordRepository};
use crate::types::{Word, WordId};

/// Attempts per word before a conflicting insert is reported as unavailable.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Maps token text to stable word ids, creating words on first sight.
#[derive(Clone)]
pub struct Vocabulary {
    words: Arc<dyn WordRepository>,
}

impl Vocabulary {
    pub fn new(words: Arc<dyn WordRepository>) -> Self {
        Self { words }
    }

    /// Resolve every distinct token to a word id, creating missing words.
    ///
    /// A bulk insert that loses a race to a concurrent writer falls back to
    /// per-word find-or-create, so callers never see `Conflict`.
    pub async fn resolve(&self, tokens: &[String]) -> Result<HashMap<String, WordId>, StoreError> {
        let unique = dedup(tokens);
        if unique.is_empty() {
            return Ok(HashMap::new());
        }

        let mut ids: HashMap<String, WordId> = self
            .words
            .find_by_text(&unique)
            .await?
            .into_iter()
            .map(|w| (w.text.to_lowercase(), w.id))
            .collect();

        let missing = dedup(
            &unique
                .iter()
                .map(|t| t.to_lowercase())
                .filter(|t| !ids.contains_key(t))
                .collect::<Vec<_>>(),
        );

        if !missing.is_empty() {
            match self.words.insert(&missing).await {
                Ok(created) => ids.extend(created.into_iter().map(|w| (w.text, w.id))),
                Err(e) if e.is_conflict() => {
                    debug!(count = missing.len(), "bulk word insert raced, resolving one by one");
                    for text in missing {
                        let word = self.find_or_create(&text).await?;
                        ids.insert(text, word.id);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(unique
            .into_iter()
            .filter_map(|token| {
                let id = ids.get(&token.to_lowercase()).copied()?;
                Some((token, id))
            })
            .collect())
    }

    /// Ids of the tokens that already exist. Never creates words.
    pub async fn known_ids(&self, tokens: &[String]) -> Result<Vec<WordId>, StoreError> {
        let unique = dedup(tokens);
        if unique.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .words
            .find_by_text(&unique)
            .await?
            .into_iter()
            .map(|w| w.id)
            .collect())
    }

    /// Text of each known id.
    pub async fn texts(&self, ids: &[WordId]) -> Result<HashMap<WordId, String>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .words
            .find_by_ids(ids)
            .await?
            .into_iter()
            .map(|w| (w.id, w.text))
            .collect())
    }

    async fn find_or_create(&self, text: &str) -> Result<Word, StoreError> {
        let key = [text.to_string()];
        for _ in 0..MAX_CONFLICT_RETRIES {
            if let Some(word) = self.words.find_by_text(&key).await?.into_iter().next() {
                return Ok(word);
            }
            match self.words.insert(&key).await {
                Ok(created) => {
                    if let Some(word) = created.into_iter().next() {
                        return Ok(word);
                    }
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::Unavailable(format!(
            "word '{text}' could not be created or read back"
        )))
    }
}

/// Distinct values in order of first occurrence.
fn dedup(tokens: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tokens.len());
    tokens
        .iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}
