//! Conversation sessions.
//!
//! Every (chat, sender) pair gets one [`Session`]: a bounded mailbox drained by
//! a dedicated actor task that talks to the upstream API in order, one call at
//! a time. The [`SessionRegistry`] creates sessions on first contact and tears
//! them down once they sit idle past their expiry.
//!
//! ```text
//! webhook → EventRouter → SessionRegistry::get_or_create → Session::enqueue
//!                                                              ↓
//!                        MessageSink ← format ← filter ← SessionActor (rate limit → upstream)
//! ```

mod actor;
mod expiry;
mod rate_limit;
mod registry;
mod state;

pub use expiry::Expiry;
pub use rate_limit::RateLimiter;
pub use registry::SessionRegistry;
pub use state::ConversationState;

use crate::filter::FilterPipeline;
use crate::message::InboundMessage;
use crate::traits::MessageSink;
use crate::upstream::ConversationApi;
use feishubot_common::Config;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Identity
// ============================================================================

/// Stable identity of a conversation: `<chat_id>_<sender_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(chat_id: &str, sender_id: &str) -> Self {
        Self(format!("{chat_id}_{sender_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Settings and shared context
// ============================================================================

/// Tunables for sessions and their actors.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Idle time before a session is swept
    pub expire_after: Duration,
    pub mailbox_capacity: usize,
    /// Minimum spacing between upstream calls of one session
    pub rate_limit: Duration,
    pub sweep_interval: Duration,
    /// Append the source line to replies
    pub show_source: bool,
    /// Reply text used when the upstream call fails
    pub error_message: String,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            expire_after: Duration::from_secs(config.session.expire_seconds),
            mailbox_capacity: config.session.mailbox_capacity.max(1),
            rate_limit: Duration::from_secs(config.session.rate_limit_secs),
            sweep_interval: Duration::from_secs(config.session.sweep_interval_secs.max(1)),
            show_source: config.reply.show_source,
            error_message: config.reply.custom_error_message.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Everything an actor needs besides its own state. Shared by all sessions.
pub struct SessionContext {
    pub api: Arc<dyn ConversationApi>,
    pub sink: Arc<dyn MessageSink>,
    pub filters: Arc<FilterPipeline>,
    pub settings: SessionSettings,
}

// ============================================================================
// Session handle
// ============================================================================

/// The mailbox is gone; the session was swept while the message was in flight.
#[derive(Debug, thiserror::Error)]
#[error("session {0} is closed")]
pub struct SessionClosed(pub SessionKey);

/// Handle to a live session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    key: SessionKey,
    chat_id: Arc<str>,
    sender_id: Arc<str>,
    mailbox: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
    expiry: Arc<Expiry>,
}

impl Session {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Queue a message for the actor, waiting while the mailbox is full.
    pub async fn enqueue(&self, message: InboundMessage) -> Result<(), SessionClosed> {
        self.mailbox
            .send(message)
            .await
            .map_err(|_| SessionClosed(self.key.clone()))
    }

    pub fn refresh_expiry(&self) {
        self.expiry.refresh();
    }

    pub fn is_expired(&self) -> bool {
        self.expiry.is_expired()
    }

    /// Ask the actor to say goodbye and stop. Queued messages are dropped.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes for the upstream API and the platform.

    use super::*;
    use crate::traits::ChannelResult;
    use crate::upstream::{ConversationReply, UpstreamError, UpstreamResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// One upstream call as seen by the fake.
    #[derive(Debug, Clone)]
    pub struct Call {
        pub input: String,
        pub conversation_id: String,
        pub parent_id: String,
        pub at: Instant,
    }

    /// Scripted upstream: pops one result per call, echoes when the script is empty.
    #[derive(Default)]
    pub struct FakeApi {
        pub calls: Mutex<Vec<Call>>,
        pub script: Mutex<VecDeque<UpstreamResult<ConversationReply>>>,
        pub latency: Duration,
    }

    impl FakeApi {
        pub fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Self::default()
            }
        }

        pub fn push_reply(&self, text: &str, conversation_id: &str, parent_id: &str, source: &str) {
            self.script.lock().unwrap().push_back(Ok(ConversationReply {
                text: text.into(),
                conversation_id: conversation_id.into(),
                parent_id: parent_id.into(),
                source: source.into(),
            }));
        }

        pub fn push_error(&self, message: &str) {
            self.script
                .lock()
                .unwrap()
                .push_back(Err(UpstreamError::Api(message.into())));
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConversationApi for FakeApi {
        async fn get_conversation(
            &self,
            input: &str,
            conversation_id: &str,
            parent_id: &str,
        ) -> UpstreamResult<ConversationReply> {
            self.calls.lock().unwrap().push(Call {
                input: input.into(),
                conversation_id: conversation_id.into(),
                parent_id: parent_id.into(),
                at: Instant::now(),
            });
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                Ok(ConversationReply {
                    text: format!("echo: {input}"),
                    ..ConversationReply::default()
                })
            })
        }
    }

    /// Where a message was delivered.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Reply { message_id: String, text: String },
        Chat { chat_id: String, text: String },
    }

    /// Records every outbound message, decoding the `{"text"}` payload.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<Sent>>,
    }

    impl RecordingSink {
        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn farewells(&self) -> Vec<(String, String)> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Chat { chat_id, text } => Some((chat_id, text)),
                    Sent::Reply { .. } => None,
                })
                .collect()
        }

        pub fn replies(&self) -> Vec<(String, String)> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Reply { message_id, text } => Some((message_id, text)),
                    Sent::Chat { .. } => None,
                })
                .collect()
        }
    }

    fn decode(content: &str) -> String {
        serde_json::from_str::<crate::message::TextContent>(content)
            .unwrap()
            .text
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn reply(&self, message_id: &str, content: &str) -> ChannelResult<()> {
            self.sent.lock().unwrap().push(Sent::Reply {
                message_id: message_id.into(),
                text: decode(content),
            });
            Ok(())
        }

        async fn send_to_chat(&self, chat_id: &str, content: &str) -> ChannelResult<()> {
            self.sent.lock().unwrap().push(Sent::Chat {
                chat_id: chat_id.into(),
                text: decode(content),
            });
            Ok(())
        }
    }

    pub fn settings() -> SessionSettings {
        SessionSettings {
            expire_after: Duration::from_secs(60),
            mailbox_capacity: 100,
            rate_limit: Duration::from_secs(6),
            sweep_interval: Duration::from_secs(5),
            show_source: false,
            error_message: "Sorry, I can't deal with you question".into(),
        }
    }

    pub fn context(
        api: Arc<FakeApi>,
        sink: Arc<RecordingSink>,
        filters: FilterPipeline,
        settings: SessionSettings,
    ) -> Arc<SessionContext> {
        Arc::new(SessionContext {
            api,
            sink,
            filters: Arc::new(filters),
            settings,
        })
    }

    pub fn text_message(id: &str, chat_type: &str, chat_id: &str, sender_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.into(),
            message_type: "text".into(),
            chat_type: crate::message::ChatType::parse(chat_type),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            mentions: vec![],
            content: crate::message::TextContent::new(text).to_json(),
        }
    }
}
