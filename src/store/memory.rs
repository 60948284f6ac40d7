use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    ChainRepository, ConversationRepository, Second, StoreError, WordRepository,
    check_reply_chance,
};
use crate::types::{
    ChainStats, Conversation, ConversationId, Pair, PairId, Reply, ReplyId, Word, WordId,
};

/// In-process store with the same uniqueness rules as the SQLite schema.
///
/// Each entity family sits behind its own lock, so learning in one
/// conversation only contends with others on the chain maps.
pub struct MemoryStore {
    default_reply_chance: u8,
    words: RwLock<WordTable>,
    chain: RwLock<ChainTable>,
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

#[derive(Default)]
struct WordTable {
    rows: HashMap<WordId, Word>,
    by_text: HashMap<String, WordId>,
    next_id: WordId,
}

type PairKey = (ConversationId, Option<WordId>, Option<WordId>);

#[derive(Default)]
struct ChainTable {
    pairs: HashMap<PairId, PairKey>,
    pair_index: HashMap<PairKey, PairId>,
    by_conversation: HashMap<ConversationId, Vec<PairId>>,
    replies: HashMap<ReplyId, Reply>,
    reply_index: HashMap<(PairId, Option<WordId>), ReplyId>,
    by_pair: HashMap<PairId, Vec<ReplyId>>,
    next_pair_id: PairId,
    next_reply_id: ReplyId,
}

impl ChainTable {
    fn materialize(&self, id: PairId) -> Option<Pair> {
        let (conversation_id, first, second) = *self.pairs.get(&id)?;
        let replies = self
            .by_pair
            .get(&id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|reply_id| self.replies.get(reply_id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Some(Pair {
            id,
            conversation_id,
            first,
            second,
            replies,
        })
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new(default_reply_chance: u8) -> Self {
        Self {
            default_reply_chance,
            words: RwLock::new(WordTable::default()),
            chain: RwLock::new(ChainTable::default()),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn word_count(&self) -> usize {
        read(&self.words).rows.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::config::default_reply_chance())
    }
}

#[async_trait]
impl WordRepository for MemoryStore {
    async fn find_by_text(&self, texts: &[String]) -> Result<Vec<Word>, StoreError> {
        let table = read(&self.words);
        let mut found: Vec<Word> = texts
            .iter()
            .filter_map(|text| table.by_text.get(&text.to_lowercase()))
            .filter_map(|id| table.rows.get(id).cloned())
            .collect();
        found.sort_by_key(|w| w.id);
        found.dedup_by_key(|w| w.id);
        Ok(found)
    }

    async fn insert(&self, texts: &[String]) -> Result<Vec<Word>, StoreError> {
        let mut table = write(&self.words);
        let keys: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
        for (i, key) in keys.iter().enumerate() {
            if table.by_text.contains_key(key) || keys[..i].contains(key) {
                return Err(StoreError::Conflict { entity: "word" });
            }
        }

        let mut created = Vec::with_capacity(keys.len());
        for key in keys {
            table.next_id += 1;
            let word = Word {
                id: table.next_id,
                text: key.clone(),
            };
            table.by_text.insert(key, word.id);
            table.rows.insert(word.id, word.clone());
            created.push(word);
        }
        Ok(created)
    }

    async fn find_by_ids(&self, ids: &[WordId]) -> Result<Vec<Word>, StoreError> {
        let table = read(&self.words);
        Ok(ids
            .iter()
            .filter_map(|id| table.rows.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl ChainRepository for MemoryStore {
    async fn find_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Option<Pair>, StoreError> {
        let table = read(&self.chain);
        Ok(table
            .pair_index
            .get(&(conversation, first, second))
            .and_then(|id| table.materialize(*id)))
    }

    async fn insert_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Pair, StoreError> {
        let mut table = write(&self.chain);
        let key = (conversation, first, second);
        if table.pair_index.contains_key(&key) {
            return Err(StoreError::Conflict { entity: "pair" });
        }
        table.next_pair_id += 1;
        let id = table.next_pair_id;
        table.pairs.insert(id, key);
        table.pair_index.insert(key, id);
        table.by_conversation.entry(conversation).or_default().push(id);
        Ok(Pair {
            id,
            conversation_id: conversation,
            first,
            second,
            replies: Vec::new(),
        })
    }

    async fn insert_reply(
        &self,
        pair: PairId,
        word: Option<WordId>,
    ) -> Result<Reply, StoreError> {
        let mut table = write(&self.chain);
        if !table.pairs.contains_key(&pair) {
            return Err(StoreError::NotFound {
                entity: "pair",
                id: pair,
            });
        }
        if table.reply_index.contains_key(&(pair, word)) {
            return Err(StoreError::Conflict { entity: "reply" });
        }
        table.next_reply_id += 1;
        let reply = Reply {
            id: table.next_reply_id,
            pair_id: pair,
            word,
            counter: 1,
        };
        table.reply_index.insert((pair, word), reply.id);
        table.by_pair.entry(pair).or_default().push(reply.id);
        table.replies.insert(reply.id, reply.clone());
        Ok(reply)
    }

    async fn increment_reply(&self, reply: ReplyId) -> Result<u64, StoreError> {
        let mut table = write(&self.chain);
        let row = table.replies.get_mut(&reply).ok_or(StoreError::NotFound {
            entity: "reply",
            id: reply,
        })?;
        row.counter += 1;
        Ok(row.counter)
    }

    async fn top_pairs(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: &Second,
        limit: usize,
    ) -> Result<Vec<Pair>, StoreError> {
        let table = read(&self.chain);
        let Some(ids) = table.by_conversation.get(&conversation) else {
            return Ok(Vec::new());
        };

        let mut candidates: Vec<Pair> = ids
            .iter()
            .filter(|id| {
                table
                    .pairs
                    .get(*id)
                    .is_some_and(|(_, f, s)| *f == first && second.matches(*s))
            })
            .filter_map(|id| table.materialize(*id))
            .filter(|pair| !pair.replies.is_empty())
            .collect();

        candidates.sort_by(|a, b| b.weight().cmp(&a.weight()).then(a.id.cmp(&b.id)));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn stats(&self, conversation: ConversationId) -> Result<ChainStats, StoreError> {
        let table = read(&self.chain);
        let mut stats = ChainStats::default();
        for pair_id in table.by_conversation.get(&conversation).into_iter().flatten() {
            stats.pairs += 1;
            for reply_id in table.by_pair.get(pair_id).into_iter().flatten() {
                if let Some(reply) = table.replies.get(reply_id) {
                    stats.replies += 1;
                    stats.observations += reply.counter;
                }
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn get_or_create(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        if let Some(conversation) = read(&self.conversations).get(&id) {
            return Ok(conversation.clone());
        }
        let mut conversations = write(&self.conversations);
        let default_reply_chance = self.default_reply_chance;
        Ok(conversations
            .entry(id)
            .or_insert_with(|| Conversation {
                id,
                reply_chance: default_reply_chance,
                created_at: chrono::Utc::now(),
            })
            .clone())
    }

    async fn set_reply_chance(
        &self,
        id: ConversationId,
        reply_chance: u8,
    ) -> Result<Conversation, StoreError> {
        check_reply_chance(reply_chance)?;
        let mut conversations = write(&self.conversations);
        let conversation = conversations.entry(id).or_insert_with(|| Conversation {
            id,
            reply_chance,
            created_at: chrono::Utc::now(),
        });
        conversation.reply_chance = reply_chance;
        Ok(conversation.clone())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(read(&self.conversations).len() as u64)
    }
}
