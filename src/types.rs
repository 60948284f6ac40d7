use serde::{Deserialize, Serialize};

pub type WordId = i64;
pub type PairId = i64;
pub type ReplyId = i64;
pub type ConversationId = i64;

/// A vocabulary entry. Text is lowercase and globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub id: WordId,
    pub text: String,
}

/// Per-conversation settings owned by the conversation repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub reply_chance: u8,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A two-token context inside one conversation, fetched together with all
/// of its replies. `None` stands for the sentence-start sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub id: PairId,
    pub conversation_id: ConversationId,
    pub first: Option<WordId>,
    pub second: Option<WordId>,
    pub replies: Vec<Reply>,
}

impl Pair {
    /// Highest counter among the replies, 0 for a pair without replies.
    pub fn weight(&self) -> u64 {
        self.replies.iter().map(|r| r.counter).max().unwrap_or(0)
    }

    pub fn reply_to(&self, word: Option<WordId>) -> Option<&Reply> {
        self.replies.iter().find(|r| r.word == word)
    }
}

/// A continuation observed after a pair. `None` word marks sentence end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: ReplyId,
    pub pair_id: PairId,
    pub word: Option<WordId>,
    pub counter: u64,
}

/// Substring the transport wants suppressed before tokenizing
/// (mentions, links, formatting markers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedSpan {
    pub text: String,
}

/// Normalized incoming message from any transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub conversation_id: ConversationId,
    pub text: String,
    #[serde(default)]
    pub masked_spans: Vec<MaskedSpan>,
    #[serde(default)]
    pub is_reply_to_bot: bool,
}

impl IncomingMessage {
    /// Plain message with no masked spans that does not reply to the bot.
    pub fn text(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            text: text.into(),
            masked_spans: Vec::new(),
            is_reply_to_bot: false,
        }
    }

    pub fn tokens(&self) -> Vec<String> {
        crate::tokenizer::tokenize(&self.text, &self.masked_spans)
    }
}

/// Aggregate counts over a conversation's chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStats {
    pub pairs: u64,
    pub replies: u64,
    /// Sum of all reply counters.
    pub observations: u64,
}
