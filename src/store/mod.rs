pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::config::StoreConfig;
use crate::types::{
    ChainStats, Conversation, ConversationId, Pair, PairId, Reply, ReplyId, Word, WordId,
};

/// Failures a repository can report.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend could not serve the request. The operation is abandoned.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint rejected an insert because a concurrent
    /// writer created the same row first.
    #[error("{entity} already exists")]
    Conflict { entity: &'static str },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("reply chance must be within 0..=100, got {0}")]
    InvalidReplyChance(u8),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// How a chain query matches a pair's second word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Second {
    /// Exactly this word, or the sentinel.
    Exact(Option<WordId>),
    /// Any word of the set. An empty set matches nothing.
    AnyOf(BTreeSet<WordId>),
}

impl Second {
    pub fn matches(&self, second: Option<WordId>) -> bool {
        match self {
            Second::Exact(word) => *word == second,
            Second::AnyOf(set) => second.is_some_and(|id| set.contains(&id)),
        }
    }
}

/// Global, append-only vocabulary.
#[async_trait]
pub trait WordRepository: Send + Sync {
    /// Words whose text matches any of `texts` (case-insensitive).
    async fn find_by_text(&self, texts: &[String]) -> Result<Vec<Word>, StoreError>;

    /// Create all of `texts` at once. Fails with `Conflict` without creating
    /// anything if one of them already exists.
    async fn insert(&self, texts: &[String]) -> Result<Vec<Word>, StoreError>;

    async fn find_by_ids(&self, ids: &[WordId]) -> Result<Vec<Word>, StoreError>;
}

/// Per-conversation pairs and their replies.
#[async_trait]
pub trait ChainRepository: Send + Sync {
    async fn find_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Option<Pair>, StoreError>;

    /// Create an empty pair. `Conflict` if it already exists.
    async fn insert_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Pair, StoreError>;

    /// Create a reply with counter 1. `Conflict` if it already exists.
    async fn insert_reply(&self, pair: PairId, word: Option<WordId>)
    -> Result<Reply, StoreError>;

    /// Atomically add one to a reply counter, returning the new value.
    async fn increment_reply(&self, reply: ReplyId) -> Result<u64, StoreError>;

    /// Pairs of `conversation` with `first` and a matching second word that
    /// have at least one reply, ordered by their highest reply counter
    /// (descending, ties by ascending id), at most `limit` of them.
    async fn top_pairs(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: &Second,
        limit: usize,
    ) -> Result<Vec<Pair>, StoreError>;

    async fn stats(&self, conversation: ConversationId) -> Result<ChainStats, StoreError>;
}

/// Conversation settings.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn get_or_create(&self, id: ConversationId) -> Result<Conversation, StoreError>;

    async fn set_reply_chance(
        &self,
        id: ConversationId,
        reply_chance: u8,
    ) -> Result<Conversation, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// The three repositories a running bot needs, sharing one backend.
#[derive(Clone)]
pub struct Stores {
    pub words: Arc<dyn WordRepository>,
    pub chain: Arc<dyn ChainRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
}

impl Stores {
    pub fn memory(default_reply_chance: u8) -> Self {
        let store = Arc::new(memory::MemoryStore::new(default_reply_chance));
        Self {
            words: store.clone(),
            chain: store.clone(),
            conversations: store,
        }
    }

    pub fn sqlite(store: sqlite::SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            words: store.clone(),
            chain: store.clone(),
            conversations: store,
        }
    }
}

/// Open the backend named in the config.
pub async fn open(config: &StoreConfig, default_reply_chance: u8) -> anyhow::Result<Stores> {
    match config.backend.as_str() {
        "memory" => {
            info!("using in-memory chain store");
            Ok(Stores::memory(default_reply_chance))
        }
        "sqlite" => {
            let path = config.resolved_path();
            let store = sqlite::SqliteStore::open(&path, default_reply_chance)
                .await
                .map_err(|e| anyhow::anyhow!("failed to open {}: {e}", path.display()))?;
            info!("using sqlite chain store at {}", path.display());
            Ok(Stores::sqlite(store))
        }
        other => anyhow::bail!("unknown store backend '{other}'"),
    }
}

pub(crate) fn check_reply_chance(reply_chance: u8) -> Result<(), StoreError> {
    if reply_chance > 100 {
        return Err(StoreError::InvalidReplyChance(reply_chance));
    }
    Ok(())
}
