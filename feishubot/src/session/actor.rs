//! Per-session actor.
//!
//! One task per session drains the mailbox in order, so a session never has
//! more than one upstream call in flight and replies leave in the order the
//! messages arrived. Continuation state and the rate limiter are owned by the
//! task and need no locking.

use std::sync::Arc;

use feishubot_common::util::truncate_with_ellipsis;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ConversationState, Expiry, RateLimiter, Session, SessionContext, SessionKey};
use crate::format;
use crate::message::{InboundMessage, TextContent};

/// Characters of user text kept in log lines.
const LOG_PREVIEW_CHARS: usize = 80;

pub(crate) struct SessionActor {
    key: SessionKey,
    chat_id: Arc<str>,
    sender_id: Arc<str>,

    state: ConversationState,
    limiter: RateLimiter,
    expiry: Arc<Expiry>,

    ctx: Arc<SessionContext>,

    mailbox: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
}

impl SessionActor {
    /// Start an actor for a new session and return its handle.
    pub(crate) fn spawn(
        key: SessionKey,
        chat_id: &str,
        sender_id: &str,
        ctx: Arc<SessionContext>,
    ) -> (Session, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(ctx.settings.mailbox_capacity);
        let cancel = CancellationToken::new();
        let expiry = Arc::new(Expiry::new(ctx.settings.expire_after));
        let chat_id: Arc<str> = Arc::from(chat_id);
        let sender_id: Arc<str> = Arc::from(sender_id);

        let session = Session {
            key: key.clone(),
            chat_id: chat_id.clone(),
            sender_id: sender_id.clone(),
            mailbox: tx,
            cancel: cancel.clone(),
            expiry: expiry.clone(),
        };

        let actor = Self {
            key,
            chat_id,
            sender_id,
            state: ConversationState::default(),
            limiter: RateLimiter::new(ctx.settings.rate_limit),
            expiry,
            ctx,
            mailbox: rx,
            cancel,
        };

        let handle = tokio::spawn(actor.run());
        (session, handle)
    }

    async fn run(mut self) {
        debug!(session_id = %self.key, "Session actor started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    let dropped = self.mailbox.len();
                    if dropped > 0 {
                        warn!(session_id = %self.key, dropped, "Session closed with queued messages");
                    }
                    self.say_goodbye().await;
                    break;
                }

                message = self.mailbox.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        debug!(session_id = %self.key, "All handles dropped");
                        break;
                    }
                },
            }
        }

        debug!(session_id = %self.key, "Session actor stopped");
    }

    /// One turn: decode, throttle, ask upstream, filter, format, send.
    async fn handle_message(&mut self, message: InboundMessage) {
        let text = match message.text() {
            Ok(text) => text,
            Err(e) => {
                error!(
                    session_id = %self.key,
                    message_id = %message.message_id,
                    content = %truncate_with_ellipsis(&message.content, LOG_PREVIEW_CHARS),
                    error = %e,
                    "Can't parse message content"
                );
                return;
            }
        };

        let waited = self.limiter.acquire().await;
        if !waited.is_zero() {
            debug!(session_id = %self.key, waited_ms = waited.as_millis() as u64, "Rate limited");
        }

        debug!(
            session_id = %self.key,
            text = %truncate_with_ellipsis(&text, LOG_PREVIEW_CHARS),
            "Forwarding message upstream"
        );

        let result = self
            .ctx
            .api
            .get_conversation(&text, self.state.conversation_id(), self.state.parent_id())
            .await;

        let (reply, source) = match result {
            Ok(turn) => {
                if self.state.update(&turn.conversation_id, &turn.parent_id) {
                    debug!(
                        session_id = %self.key,
                        conversation_id = %self.state.conversation_id(),
                        parent_id = %self.state.parent_id(),
                        "Conversation continued"
                    );
                }
                (turn.text, turn.source)
            }
            Err(e) => {
                error!(session_id = %self.key, error = %e, "Upstream API invoke failed");
                (self.ctx.settings.error_message.clone(), String::new())
            }
        };

        self.expiry.refresh();

        let reply = self.ctx.filters.apply(&reply);
        let mention = message
            .chat_type
            .is_group()
            .then_some(message.sender_id.as_str());
        let text = format::reply_text(&reply, &source, mention, self.ctx.settings.show_source);
        let content = TextContent::new(text).to_json();

        match self.ctx.sink.reply(&message.message_id, &content).await {
            Ok(()) => info!(
                session_id = %self.key,
                message_id = %message.message_id,
                "Reply sent"
            ),
            Err(e) => error!(
                session_id = %self.key,
                message_id = %message.message_id,
                error = %e,
                "Send message failed"
            ),
        }
    }

    async fn say_goodbye(&self) {
        let content = TextContent::new(format::farewell_text(&self.sender_id)).to_json();
        match self.ctx.sink.send_to_chat(&self.chat_id, &content).await {
            Ok(()) => info!(session_id = %self.key, chat_id = %self.chat_id, "Farewell sent"),
            Err(e) => error!(
                session_id = %self.key,
                chat_id = %self.chat_id,
                error = %e,
                "Send farewell failed"
            ),
        }
    }
}
