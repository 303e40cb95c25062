//! Client for the stateful conversational API.
//!
//! The upstream service keeps the conversation; the bot only carries the two
//! continuation tokens it hands back (`conversation_id` and the id of the last
//! reply, which becomes the next `parent_id`).

use async_trait::async_trait;
use feishubot_common::UpstreamConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upstream error type.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upstream error: {0}")]
    Api(String),
}

/// Result type for upstream calls.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// One turn returned by the conversational API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationReply {
    pub text: String,
    /// Empty when the API did not return one
    pub conversation_id: String,
    /// Empty when the API did not return one
    pub parent_id: String,
    /// Label of the backend that produced the reply
    pub source: String,
}

/// A stateful conversational API.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Send `input` as the next turn of the conversation identified by the
    /// continuation tokens. Empty tokens start a new conversation.
    async fn get_conversation(
        &self,
        input: &str,
        conversation_id: &str,
        parent_id: &str,
    ) -> UpstreamResult<ConversationReply>;
}

// ============================================================================
// HTTP API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ConversationRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    conversation_id: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    parent_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConversationResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// ChatGptApi
// ============================================================================

/// HTTP client for a ChatGPT-style conversation service.
pub struct ChatGptApi {
    client: reqwest::Client,
    base_url: String,
}

impl ChatGptApi {
    /// Create a client for the configured host.
    ///
    /// Only the connect phase is bounded; a slow answer stalls the calling
    /// session and nothing else.
    pub fn new(config: &UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ConversationApi for ChatGptApi {
    async fn get_conversation(
        &self,
        input: &str,
        conversation_id: &str,
        parent_id: &str,
    ) -> UpstreamResult<ConversationReply> {
        let url = self.url("/conversation");

        tracing::debug!(
            endpoint = %url,
            conversation_id = %conversation_id,
            parent_id = %parent_id,
            "Calling conversation API"
        );

        let response = self
            .client
            .post(&url)
            .json(&ConversationRequest {
                message: input,
                conversation_id,
                parent_id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: ConversationResponse = response.json().await?;
        if let Some(error) = data.error.filter(|e| !e.is_empty()) {
            return Err(UpstreamError::Api(error));
        }

        Ok(ConversationReply {
            text: data.response,
            conversation_id: data.conversation_id.unwrap_or_default(),
            parent_id: data.message_id.unwrap_or_default(),
            source: data.source.unwrap_or_default(),
        })
    }
}
