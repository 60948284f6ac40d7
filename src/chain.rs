use std::sync::Arc;
use tracing::debug;

use crate::sampling::Randomness;
use crate::store::{ChainRepository, Second, StoreError};
use crate::types::{ChainStats, ConversationId, Pair, WordId};

/// Conflict-tolerant operations over a [`ChainRepository`].
#[derive(Clone)]
pub struct ChainStore {
    repo: Arc<dyn ChainRepository>,
    top_pairs: usize,
}

impl ChainStore {
    pub fn new(repo: Arc<dyn ChainRepository>, top_pairs: usize) -> Self {
        Self { repo, top_pairs }
    }

    /// Fetch the pair with its replies, creating it when missing.
    pub async fn find_or_create_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Pair, StoreError> {
        if let Some(pair) = self.repo.find_pair(conversation, first, second).await? {
            return Ok(pair);
        }
        match self.repo.insert_pair(conversation, first, second).await {
            Ok(pair) => Ok(pair),
            Err(e) if e.is_conflict() => {
                debug!(conversation, ?first, ?second, "pair created concurrently, re-reading");
                self.repo
                    .find_pair(conversation, first, second)
                    .await?
                    .ok_or_else(|| StoreError::Unavailable("pair missing after conflict".into()))
            }
            Err(e) => Err(e),
        }
    }

    /// Count one more observation of `next` following `pair`.
    /// Returns the reply's counter after the update.
    pub async fn observe(&self, pair: &Pair, next: Option<WordId>) -> Result<u64, StoreError> {
        if let Some(reply) = pair.reply_to(next) {
            return self.repo.increment_reply(reply.id).await;
        }
        match self.repo.insert_reply(pair.id, next).await {
            Ok(reply) => Ok(reply.counter),
            Err(e) if e.is_conflict() => {
                let fresh = self
                    .repo
                    .find_pair(pair.conversation_id, pair.first, pair.second)
                    .await?;
                let reply_id = fresh
                    .as_ref()
                    .and_then(|p| p.reply_to(next))
                    .map(|r| r.id)
                    .ok_or_else(|| StoreError::Unavailable("reply missing after conflict".into()))?;
                self.repo.increment_reply(reply_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Pick a pair to continue from.
    ///
    /// The heaviest matches (by their top reply counter) make the cut; the
    /// pick among the survivors is uniform.
    pub async fn lookup(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: &Second,
        rng: &dyn Randomness,
    ) -> Result<Option<Pair>, StoreError> {
        let mut candidates = self
            .repo
            .top_pairs(conversation, first, second, self.top_pairs)
            .await?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let pick = rng.index(candidates.len());
        Ok(Some(candidates.swap_remove(pick)))
    }

    pub async fn stats(&self, conversation: ConversationId) -> Result<ChainStats, StoreError> {
        self.repo.stats(conversation).await
    }
}
