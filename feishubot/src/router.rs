//! Event admission and dispatch.
//!
//! Decides whether an inbound message is for the bot at all, derives the
//! session identity and hands the message to that session's mailbox.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::{ChatType, InboundMessage};
use crate::session::{SessionKey, SessionRegistry};

/// Why a message was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Neither a one-to-one nor a group chat
    UnsupportedChatType(String),
    /// Group message without any mention
    NoMention,
    /// Group message mentioning more than one participant
    MultipleMentions(usize),
    /// Group message whose only mention is someone else
    NotMentioned(String),
}

/// Outcome of [`EventRouter::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(SessionKey),
    Ignored(IgnoreReason),
}

pub struct EventRouter {
    bot_name: String,
    registry: Arc<SessionRegistry>,
}

impl EventRouter {
    pub fn new(bot_name: impl Into<String>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            bot_name: bot_name.into(),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Admission decision and session identity. Touches nothing.
    pub fn admit(&self, message: &InboundMessage) -> Admission {
        match &message.chat_type {
            ChatType::P2p => {}
            ChatType::Group => match message.mentions.as_slice() {
                [] => return Admission::Ignored(IgnoreReason::NoMention),
                [only] if only.name == self.bot_name => {}
                [only] => return Admission::Ignored(IgnoreReason::NotMentioned(only.name.clone())),
                many => return Admission::Ignored(IgnoreReason::MultipleMentions(many.len())),
            },
            ChatType::Other(raw) => {
                return Admission::Ignored(IgnoreReason::UnsupportedChatType(raw.clone()));
            }
        }

        Admission::Admitted(SessionKey::new(&message.chat_id, &message.sender_id))
    }

    /// Admit and enqueue. Waits while the session's mailbox is full.
    pub async fn dispatch(&self, message: InboundMessage) -> Admission {
        let admission = self.admit(&message);
        let key = match &admission {
            Admission::Admitted(key) => key.clone(),
            Admission::Ignored(reason) => {
                debug!(
                    message_id = %message.message_id,
                    chat_id = %message.chat_id,
                    reason = ?reason,
                    "Message ignored"
                );
                return admission;
            }
        };

        let session = self
            .registry
            .get_or_create(key, &message.chat_id, &message.sender_id)
            .await;
        if let Err(e) = session.enqueue(message).await {
            warn!(error = %e, "Message lost, session closed before delivery");
        }

        admission
    }
}
