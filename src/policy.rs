use serde::Serialize;

use crate::config::PolicyConfig;
use crate::sampling::Randomness;
use crate::types::{Conversation, IncomingMessage};

/// Why a message earned a generated reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Anchor,
    ReplyToBot,
    Chance,
}

/// Decides whether a message gets a reply.
///
/// Checked in order: anchor substring, reply to the bot, then a roll in
/// `0..100` that passes when it is at or below the conversation's chance.
/// The roll only happens when nothing earlier matched.
#[derive(Debug, Clone)]
pub struct ReplyPolicy {
    anchors: Vec<String>,
}

impl ReplyPolicy {
    pub fn new(anchors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            anchors: anchors
                .into_iter()
                .map(|a| a.into().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(config.anchors.iter().cloned())
    }

    pub fn decide(
        &self,
        message: &IncomingMessage,
        conversation: &Conversation,
        rng: &dyn Randomness,
    ) -> Option<Trigger> {
        let lower = message.text.to_lowercase();
        if self.anchors.iter().any(|anchor| lower.contains(anchor.as_str())) {
            return Some(Trigger::Anchor);
        }
        if message.is_reply_to_bot {
            return Some(Trigger::ReplyToBot);
        }
        if rng.percent() <= conversation.reply_chance {
            return Some(Trigger::Chance);
        }
        None
    }
}
