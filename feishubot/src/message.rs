//! Message types shared by the platform adapter, router and session actors.

use crate::traits::{ChannelError, ChannelResult};
use serde::{Deserialize, Serialize};

/// Placeholder Feishu inserts into the text where the bot was mentioned.
pub const MENTION_PLACEHOLDER: &str = "@_user_1";

/// Kind of chat an event originated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatType {
    /// One-to-one chat with the bot
    P2p,
    /// Multi-party group chat
    Group,
    /// Anything else the platform may send
    Other(String),
}

impl ChatType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "p2p" => Self::P2p,
            "group" => Self::Group,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::P2p => "p2p",
            Self::Group => "group",
            Self::Other(raw) => raw,
        }
    }

    pub const fn is_group(&self) -> bool {
        matches!(self, Self::Group)
    }
}

/// A participant mentioned in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    /// Display name
    pub name: String,
    /// Platform id of the mentioned participant
    pub id: String,
}

/// An inbound chat message, after decryption and verification.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform message id, the target of replies
    pub message_id: String,
    /// `text`, `image`, `post`, ...
    pub message_type: String,
    pub chat_type: ChatType,
    pub chat_id: String,
    pub sender_id: String,
    /// Mentions in the order they appear
    pub mentions: Vec<Mention>,
    /// Raw JSON content, `{"text": "..."}` for text messages
    pub content: String,
}

impl InboundMessage {
    /// Decode the text payload, stripping the mention placeholder.
    ///
    /// Only `text` messages decode; everything else is an error.
    pub fn text(&self) -> ChannelResult<String> {
        if self.message_type != "text" {
            return Err(ChannelError::InvalidEvent(format!(
                "unsupported message type: {}",
                self.message_type
            )));
        }
        let content: TextContent = serde_json::from_str(&self.content)
            .map_err(|e| ChannelError::InvalidEvent(format!("invalid text content: {e}")))?;
        Ok(content.stripped())
    }
}

/// JSON body of a text message, used both inbound and outbound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

impl TextContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Text with the mention placeholder removed and surrounding whitespace trimmed.
    pub fn stripped(&self) -> String {
        self.text.replace(MENTION_PLACEHOLDER, "").trim().to_string()
    }

    /// Serialized form as Feishu expects it in the `content` field.
    pub fn to_json(&self) -> String {
        serde_json::json!({ "text": self.text }).to_string()
    }
}
