//! Seams between the session core and the outside world.

use async_trait::async_trait;

/// Result type for platform operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Platform error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Verification token mismatch")]
    TokenMismatch,
}

/// Where replies and farewells are delivered.
///
/// Implemented by the Feishu adapter; tests substitute a recorder.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Reply to a specific inbound message. `content` is the serialized text payload.
    async fn reply(&self, message_id: &str, content: &str) -> ChannelResult<()>;

    /// Post a new message into a chat.
    async fn send_to_chat(&self, chat_id: &str, content: &str) -> ChannelResult<()>;
}
