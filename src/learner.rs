use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

use crate::chain::ChainStore;
use crate::store::StoreError;
use crate::tokenizer::ends_sentence;
use crate::types::{ConversationId, WordId};
use crate::vocabulary::Vocabulary;

/// What a single `learn` call managed to record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LearnReport {
    pub windows: usize,
    pub applied: usize,
    pub failed: usize,
}

/// Feeds tokenized messages into the vocabulary and the chain.
///
/// Learning is best-effort: every 3-token window is applied on its own and
/// a failing window is logged and skipped.
#[derive(Clone)]
pub struct Learner {
    vocabulary: Vocabulary,
    chain: ChainStore,
    end_sentence: Vec<char>,
}

impl Learner {
    pub fn new(vocabulary: Vocabulary, chain: ChainStore, end_sentence: Vec<char>) -> Self {
        Self {
            vocabulary,
            chain,
            end_sentence,
        }
    }

    pub async fn learn(&self, conversation: ConversationId, tokens: &[String]) -> LearnReport {
        let ids = match self.vocabulary.resolve(tokens).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(conversation, "vocabulary unavailable, message not learned: {e}");
                return LearnReport::default();
            }
        };

        let sequence = build_sequence(tokens, &ids, &self.end_sentence);
        let mut report = LearnReport::default();

        for window in sequence.windows(3) {
            let (first, second, next) = (window[0], window[1], window[2]);
            report.windows += 1;
            match self.apply(conversation, first, second, next).await {
                Ok(counter) => {
                    report.applied += 1;
                    trace!(conversation, ?first, ?second, ?next, counter, "transition learned");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(conversation, ?first, ?second, ?next, "failed to learn transition: {e}");
                }
            }
        }

        debug!(
            conversation,
            windows = report.windows,
            applied = report.applied,
            failed = report.failed,
            "message learned"
        );
        report
    }

    async fn apply(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
        next: Option<WordId>,
    ) -> Result<u64, StoreError> {
        let pair = self
            .chain
            .find_or_create_pair(conversation, first, second)
            .await?;
        self.chain.observe(&pair, next).await
    }
}

/// Lay tokens out as word ids framed by sentence sentinels.
///
/// The sequence opens with `None`, gets an extra `None` after every token
/// whose last character closes a sentence, and always ends with `None`.
pub fn build_sequence(
    tokens: &[String],
    ids: &HashMap<String, WordId>,
    end_sentence: &[char],
) -> Vec<Option<WordId>> {
    let mut sequence = vec![None];
    for token in tokens {
        let Some(id) = ids.get(token) else {
            continue;
        };
        sequence.push(Some(*id));
        if ends_sentence(token, end_sentence) {
            sequence.push(None);
        }
    }
    if sequence.last() != Some(&None) {
        sequence.push(None);
    }
    sequence
}
