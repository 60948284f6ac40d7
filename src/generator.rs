use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

use crate::chain::ChainStore;
use crate::config::ChainConfig;
use crate::sampling::Randomness;
use crate::store::{Second, StoreError};
use crate::tokenizer::{ends_sentence, is_sentence_punctuation};
use crate::types::{ConversationId, WordId};
use crate::vocabulary::Vocabulary;

/// Produces sentences by walking a conversation's chain.
///
/// Each sentence starts from a sentence-start pair whose second word came
/// up in the triggering message, then follows sampled replies until a
/// sentence end, a dead end, or the step bound.
#[derive(Clone)]
pub struct Generator {
    vocabulary: Vocabulary,
    chain: ChainStore,
    rng: Arc<dyn Randomness>,
    end_sentence: Vec<char>,
    max_walk_steps: usize,
    max_sentences: usize,
}

impl Generator {
    pub fn new(
        vocabulary: Vocabulary,
        chain: ChainStore,
        rng: Arc<dyn Randomness>,
        config: &ChainConfig,
    ) -> Self {
        Self {
            vocabulary,
            chain,
            rng,
            end_sentence: config.end_sentence_chars(),
            max_walk_steps: config.max_walk_steps,
            max_sentences: config.max_sentences,
        }
    }

    /// Generate between 1 and `max_sentences` sentences. A sentence whose
    /// opening lookup found nothing is an empty string.
    pub async fn generate(
        &self,
        conversation: ConversationId,
        tokens: &[String],
    ) -> Result<Vec<String>, StoreError> {
        let usable: Vec<String> = tokens
            .iter()
            .filter(|t| !is_sentence_punctuation(t, &self.end_sentence))
            .cloned()
            .collect();
        let mut seed: BTreeSet<WordId> = self
            .vocabulary
            .known_ids(&usable)
            .await?
            .into_iter()
            .collect();

        let count = self.rng.count(self.max_sentences);
        let mut sentences = Vec::with_capacity(count);
        for _ in 0..count {
            sentences.push(self.sentence(conversation, &mut seed).await?);
        }
        Ok(sentences)
    }

    async fn sentence(
        &self,
        conversation: ConversationId,
        seed: &mut BTreeSet<WordId>,
    ) -> Result<String, StoreError> {
        let mut text = String::new();
        let mut first: Option<WordId> = None;
        let mut second = Second::AnyOf(seed.clone());

        for step in 0..self.max_walk_steps {
            let Some(pair) = self
                .chain
                .lookup(conversation, first, &second, self.rng.as_ref())
                .await?
            else {
                trace!(conversation, step, "walk reached a dead end");
                break;
            };
            if pair.replies.is_empty() {
                break;
            }
            let reply = &pair.replies[self.rng.index(pair.replies.len())];

            let wanted: Vec<WordId> = pair.second.into_iter().chain(reply.word).collect();
            let words = self.vocabulary.texts(&wanted).await?;

            if text.is_empty() {
                let opener = pair
                    .second
                    .and_then(|id| words.get(&id))
                    .map(String::as_str)
                    .unwrap_or_default();
                text = capitalize(opener);
                text.push(' ');
                if let Some(id) = pair.second {
                    seed.remove(&id);
                }
            }

            first = pair.second;
            second = Second::Exact(reply.word);

            match reply.word.and_then(|id| words.get(&id)).filter(|w| !w.is_empty()) {
                Some(word) => {
                    text.push_str(word);
                    text.push(' ');
                }
                None => break,
            }
        }

        // A walk that found an opener always closes, even if the opener
        // trims away to nothing.
        if text.is_empty() {
            return Ok(text);
        }
        let mut sentence = text.trim().to_string();
        if !ends_sentence(&sentence, &self.end_sentence) {
            let closing = self.end_sentence[self.rng.index(self.end_sentence.len())];
            sentence.push(closing);
        }
        Ok(sentence)
    }
}

/// Uppercase the first character, keep the rest.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
