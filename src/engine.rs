use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::ChainStore;
use crate::config::{BabblerConfig, ChainConfig};
use crate::generator::Generator;
use crate::learner::{LearnReport, Learner};
use crate::policy::{ReplyPolicy, Trigger};
use crate::sampling::Randomness;
use crate::store::{ConversationRepository, StoreError, Stores};
use crate::tokenizer::is_eligible;
use crate::types::{Conversation, IncomingMessage};
use crate::vocabulary::Vocabulary;

/// Result of handling one incoming message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Outcome {
    /// The message had no text and was ignored.
    pub skipped: bool,
    pub learned: LearnReport,
    pub trigger: Option<Trigger>,
    pub reply: Option<String>,
}

/// Message pipeline: tokenize, learn, decide, maybe generate.
pub struct Engine {
    learner: Learner,
    generator: Generator,
    policy: ReplyPolicy,
    conversations: Arc<dyn ConversationRepository>,
    rng: Arc<dyn Randomness>,
}

impl Engine {
    pub fn new(
        stores: &Stores,
        chain: &ChainConfig,
        policy: ReplyPolicy,
        rng: Arc<dyn Randomness>,
    ) -> Self {
        let vocabulary = Vocabulary::new(Arc::clone(&stores.words));
        let chain_store = ChainStore::new(Arc::clone(&stores.chain), chain.top_pairs);
        Self {
            learner: Learner::new(
                vocabulary.clone(),
                chain_store.clone(),
                chain.end_sentence_chars(),
            ),
            generator: Generator::new(vocabulary, chain_store, Arc::clone(&rng), chain),
            policy,
            conversations: Arc::clone(&stores.conversations),
            rng,
        }
    }

    pub fn from_config(config: &BabblerConfig, stores: &Stores, rng: Arc<dyn Randomness>) -> Self {
        Self::new(
            stores,
            &config.chain,
            ReplyPolicy::from_config(&config.policy),
            rng,
        )
    }

    pub fn learner(&self) -> &Learner {
        &self.learner
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Look up the conversation and process the message against it.
    pub async fn handle(&self, message: &IncomingMessage) -> Result<Outcome, StoreError> {
        if !is_eligible(&message.text) {
            return Ok(Outcome::skipped());
        }
        let conversation = self
            .conversations
            .get_or_create(message.conversation_id)
            .await?;
        Ok(self.process(&conversation, message).await)
    }

    /// Process a message against a conversation snapshot.
    ///
    /// Learning always happens for eligible messages. Generation failures
    /// are logged and only suppress the reply.
    pub async fn process(&self, conversation: &Conversation, message: &IncomingMessage) -> Outcome {
        if !is_eligible(&message.text) {
            return Outcome::skipped();
        }

        let tokens = message.tokens();
        let learned = self.learner.learn(conversation.id, &tokens).await;

        let Some(trigger) = self.policy.decide(message, conversation, self.rng.as_ref()) else {
            return Outcome {
                learned,
                ..Outcome::default()
            };
        };

        let reply = match self.generator.generate(conversation.id, &tokens).await {
            Ok(sentences) => compose_reply(&sentences),
            Err(e) => {
                warn!(conversation = conversation.id, "generation failed, reply suppressed: {e}");
                None
            }
        };
        debug!(
            conversation = conversation.id,
            ?trigger,
            replied = reply.is_some(),
            "message processed"
        );

        Outcome {
            skipped: false,
            learned,
            trigger: Some(trigger),
            reply,
        }
    }
}

impl Outcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Join generated sentences into one reply.
///
/// Nothing is sent when there are no sentences or the first one is empty;
/// later empty sentences are dropped from the join.
pub fn compose_reply(sentences: &[String]) -> Option<String> {
    match sentences.first() {
        Some(first) if !first.is_empty() => {}
        _ => return None,
    }
    Some(
        sentences
            .iter()
            .filter(|s| !s.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" "),
    )
}
