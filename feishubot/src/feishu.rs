//! Feishu/Lark platform adapter.
//!
//! Uses the Feishu Open Platform Bot API for messaging.
//! Turns webhook callbacks into [`InboundMessage`]s and delivers replies.
//! Implements AES-256-CBC decryption for encrypted event callbacks.

use crate::message::{ChatType, InboundMessage, Mention};
use crate::traits::{ChannelError, ChannelResult, MessageSink};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use async_trait::async_trait;
use base64::Engine;
use feishubot_common::FeishuConfig;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

// ============================================================================
// Constants
// ============================================================================

const FEISHU_API_BASE: &str = "https://open.feishu.cn/open-apis";
const LARK_API_BASE: &str = "https://open.larksuite.com/open-apis";
const TOKEN_REFRESH_MARGIN_SECS: u64 = 300;
const MESSAGE_RECEIVE_EVENT: &str = "im.message.receive_v1";
const AES_BLOCK_SIZE: usize = 16;

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TenantAccessTokenResponse {
    code: i32,
    msg: String,
    tenant_access_token: Option<String>,
    expire: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    code: i32,
    msg: String,
}

// ============================================================================
// Event Callback Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EventCallback {
    pub schema: Option<String>,
    pub header: Option<EventHeader>,
    pub event: Option<serde_json::Value>,
    pub challenge: Option<String>,
    /// Legacy (v1) verification token, also carried by URL verification requests
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EventHeader {
    pub event_id: String,
    pub event_type: String,
    pub create_time: String,
    pub token: Option<String>,
    pub app_id: String,
    pub tenant_key: String,
}

#[derive(Debug, Deserialize)]
struct MessageReceiveEvent {
    sender: MessageSender,
    message: FeishuMessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageSender {
    sender_id: UserIds,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserIds {
    open_id: Option<String>,
    user_id: Option<String>,
}

impl UserIds {
    fn preferred(self) -> Option<String> {
        self.open_id.or(self.user_id).filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct FeishuMessageContent {
    message_id: String,
    chat_id: String,
    chat_type: String,
    message_type: String,
    content: String,
    #[serde(default)]
    mentions: Vec<FeishuMention>,
}

#[derive(Debug, Deserialize)]
struct FeishuMention {
    #[serde(default)]
    name: String,
    #[serde(default)]
    id: UserIds,
}

/// What the webhook handler should do with a callback.
#[derive(Debug)]
pub enum EventOutcome {
    /// URL verification; echo the challenge back
    Challenge(String),
    /// A chat message for the event router
    Message(InboundMessage),
    /// Valid callback the bot does not act on
    Ignored,
}

// ============================================================================
// Token Cache
// ============================================================================

struct TokenCache {
    token: String,
    expires_at: Instant,
}

// ============================================================================
// FeishuChannel
// ============================================================================

/// Feishu/Lark messaging channel.
pub struct FeishuChannel {
    app_id: String,
    app_secret: String,
    encrypt_key: Option<String>,
    verification_token: Option<String>,
    client: reqwest::Client,
    token_cache: Arc<RwLock<Option<TokenCache>>>,
    api_base: String,
}

impl FeishuChannel {
    /// Create a new Feishu channel.
    pub fn new(app_id: String, app_secret: String) -> Self {
        Self {
            app_id,
            app_secret,
            encrypt_key: None,
            verification_token: None,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            token_cache: Arc::new(RwLock::new(None)),
            api_base: FEISHU_API_BASE.to_string(),
        }
    }

    /// Create a channel from the `feishu` config section.
    pub fn from_config(config: &FeishuConfig) -> Self {
        let channel = Self::new(config.app_id.clone(), config.app_secret.clone()).with_encryption(
            config.encrypt_key.clone(),
            Some(config.verification_token.clone()),
        );
        if config.use_lark {
            channel.with_lark_api()
        } else {
            channel
        }
    }

    /// Enable callback decryption and token verification. Blank values disable them.
    pub fn with_encryption(
        mut self,
        encrypt_key: Option<String>,
        verification_token: Option<String>,
    ) -> Self {
        self.encrypt_key = encrypt_key.filter(|k| !k.is_empty());
        self.verification_token = verification_token.filter(|t| !t.is_empty());
        self
    }

    /// Use Lark API (international) instead of Feishu (China).
    pub fn with_lark_api(mut self) -> Self {
        self.api_base = LARK_API_BASE.to_string();
        self
    }

    /// Point the client at another API base, e.g. a mock server.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Get or refresh the tenant access token.
    async fn get_access_token(&self) -> anyhow::Result<String> {
        // Check cache first
        {
            let cache = self.token_cache.read().await;
            if let Some(ref cached) = *cache {
                let now = Instant::now();
                if cached.expires_at > now + Duration::from_secs(TOKEN_REFRESH_MARGIN_SECS) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let url = self.api_url("/auth/v3/tenant_access_token/internal");
        let body = serde_json::json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret
        });

        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Failed to get Feishu access token ({status}): {text}");
        }

        let data: TenantAccessTokenResponse = resp.json().await?;

        if data.code != 0 {
            anyhow::bail!("Feishu API error ({}): {}", data.code, data.msg);
        }

        let token = data
            .tenant_access_token
            .ok_or_else(|| anyhow::anyhow!("Missing tenant_access_token in response"))?;
        let expire = data.expire.unwrap_or(7200);

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(TokenCache {
                token: token.clone(),
                expires_at: Instant::now() + Duration::from_secs(expire),
            });
        }

        tracing::debug!(expires_in = expire, "Feishu access token refreshed");
        Ok(token)
    }

    /// POST a message body and check Feishu's `code` field.
    async fn post_message(&self, url: &str, body: serde_json::Value) -> anyhow::Result<()> {
        let token = self.get_access_token().await?;

        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {token}"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Feishu message API failed ({status}): {text}");
        }

        let data: SendMessageResponse = resp.json().await?;

        if data.code != 0 {
            anyhow::bail!("Feishu message API error ({}): {}", data.code, data.msg);
        }
        Ok(())
    }

    /// Reply in the thread of an existing message.
    pub async fn reply_message(&self, message_id: &str, content: &str) -> anyhow::Result<()> {
        let url = self.api_url(&format!("/im/v1/messages/{message_id}/reply"));
        let body = serde_json::json!({
            "msg_type": "text",
            "content": content,
            "uuid": uuid::Uuid::new_v4().to_string()
        });
        self.post_message(&url, body).await
    }

    /// Create a new message in a chat.
    pub async fn create_message(&self, chat_id: &str, content: &str) -> anyhow::Result<()> {
        let url = format!("{}?receive_id_type=chat_id", self.api_url("/im/v1/messages"));
        let body = serde_json::json!({
            "receive_id": chat_id,
            "msg_type": "text",
            "content": content,
            "uuid": uuid::Uuid::new_v4().to_string()
        });
        self.post_message(&url, body).await
    }

    /// Parse event callback payload, decrypting it when needed.
    pub fn parse_event(&self, payload: &str) -> ChannelResult<EventCallback> {
        let json_value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| ChannelError::InvalidEvent(format!("payload is not JSON: {e}")))?;

        let decrypted_payload = match json_value.get("encrypt").and_then(|e| e.as_str()) {
            Some(encrypt) => match &self.encrypt_key {
                Some(key) => {
                    let decrypted = Self::decrypt_aes_cbc(key, encrypt)
                        .map_err(|e| ChannelError::InvalidEvent(e.to_string()))?;
                    tracing::debug!("Feishu event decrypted successfully");
                    decrypted
                }
                None => {
                    return Err(ChannelError::InvalidEvent(
                        "received encrypted event but no encrypt_key configured".into(),
                    ));
                }
            },
            None => payload.to_string(),
        };

        serde_json::from_str(&decrypted_payload)
            .map_err(|e| ChannelError::InvalidEvent(format!("malformed event: {e}")))
    }

    /// Reject callbacks not signed with the configured verification token.
    fn verify_token(&self, event: &EventCallback) -> ChannelResult<()> {
        let Some(expected) = &self.verification_token else {
            return Ok(());
        };
        let received = event
            .header
            .as_ref()
            .and_then(|h| h.token.as_deref())
            .or(event.token.as_deref());
        if received == Some(expected.as_str()) {
            Ok(())
        } else {
            Err(ChannelError::TokenMismatch)
        }
    }

    /// Decrypt Feishu encrypted event using AES-256-CBC.
    ///
    /// The payload is `base64(iv || ciphertext)`; the key is SHA-256 of the encrypt key.
    fn decrypt_aes_cbc(encrypt_key: &str, payload_b64: &str) -> anyhow::Result<String> {
        let key: [u8; 32] = Sha256::digest(encrypt_key.as_bytes()).into();

        let payload = base64::engine::general_purpose::STANDARD
            .decode(payload_b64)
            .map_err(|e| anyhow::anyhow!("Failed to decode base64 ciphertext: {e}"))?;

        if payload.len() < AES_BLOCK_SIZE {
            anyhow::bail!("Encrypted payload too short: {} bytes", payload.len());
        }
        let (iv, ciphertext) = payload.split_at(AES_BLOCK_SIZE);
        let iv: [u8; AES_BLOCK_SIZE] = iv.try_into()?;

        let decryptor = Aes256CbcDec::new(&key.into(), &iv.into());
        let mut buffer = ciphertext.to_vec();
        let decrypted = decryptor
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|e| anyhow::anyhow!("AES decryption failed: {e}"))?;

        String::from_utf8(decrypted.to_vec())
            .map_err(|e| anyhow::anyhow!("Decrypted content is not valid UTF-8: {e}"))
    }
}

#[async_trait]
impl MessageSink for FeishuChannel {
    async fn reply(&self, message_id: &str, content: &str) -> ChannelResult<()> {
        self.reply_message(message_id, content)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn send_to_chat(&self, chat_id: &str, content: &str) -> ChannelResult<()> {
        self.create_message(chat_id, content)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }
}

/// Process an incoming Feishu event callback.
///
/// This function should be called from a webhook handler.
pub fn process_event_callback(channel: &FeishuChannel, payload: &str) -> ChannelResult<EventOutcome> {
    let event = channel.parse_event(payload)?;
    channel.verify_token(&event)?;

    if let Some(challenge) = event.challenge {
        tracing::info!("Feishu URL verification challenge received");
        return Ok(EventOutcome::Challenge(challenge));
    }

    let (Some(header), Some(event_data)) = (event.header, event.event) else {
        tracing::debug!("Feishu callback without header or event, ignoring");
        return Ok(EventOutcome::Ignored);
    };

    if header.event_type != MESSAGE_RECEIVE_EVENT {
        tracing::debug!(event_type = %header.event_type, "Unhandled Feishu event type");
        return Ok(EventOutcome::Ignored);
    }

    let msg_event: MessageReceiveEvent = serde_json::from_value(event_data)
        .map_err(|e| ChannelError::InvalidEvent(format!("malformed message event: {e}")))?;

    let sender_id = msg_event
        .sender
        .sender_id
        .preferred()
        .ok_or_else(|| ChannelError::InvalidEvent("message event without sender id".into()))?;

    let message = msg_event.message;
    let mentions = message
        .mentions
        .into_iter()
        .map(|m| Mention {
            name: m.name,
            id: m.id.preferred().unwrap_or_default(),
        })
        .collect();

    Ok(EventOutcome::Message(InboundMessage {
        message_id: message.message_id,
        message_type: message.message_type,
        chat_type: ChatType::parse(&message.chat_type),
        chat_id: message.chat_id,
        sender_id,
        mentions,
        content: message.content,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel() -> FeishuChannel {
        FeishuChannel::new("app".into(), "secret".into())
            .with_encryption(None, Some("verify-me".into()))
    }

    /// Encrypt the way the platform does: a fresh IV prepended to the ciphertext.
    fn encrypt(encrypt_key: &str, plaintext: &str) -> String {
        use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};

        type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

        let key: [u8; 32] = Sha256::digest(encrypt_key.as_bytes()).into();
        let iv: [u8; 16] = *uuid::Uuid::new_v4().as_bytes();

        let encryptor = Aes256CbcEnc::new(&key.into(), &iv.into());
        let mut buffer = vec![0u8; plaintext.len() + 16];
        buffer[..plaintext.len()].copy_from_slice(plaintext.as_bytes());
        let ciphertext = encryptor
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
            .unwrap();

        let mut payload = iv.to_vec();
        payload.extend_from_slice(ciphertext);
        base64::engine::general_purpose::STANDARD.encode(payload)
    }

    fn message_event(token: &str, chat_type: &str, mentions: serde_json::Value) -> String {
        serde_json::json!({
            "schema": "2.0",
            "header": {
                "event_id": "ev_1",
                "event_type": "im.message.receive_v1",
                "create_time": "1700000000000",
                "token": token,
                "app_id": "app",
                "tenant_key": "tenant"
            },
            "event": {
                "sender": {
                    "sender_id": { "open_id": "ou_sender", "union_id": "on_sender" },
                    "sender_type": "user"
                },
                "message": {
                    "message_id": "om_1",
                    "chat_id": "oc_chat",
                    "chat_type": chat_type,
                    "message_type": "text",
                    "content": "{\"text\":\"@_user_1 hello\"}",
                    "mentions": mentions
                }
            }
        })
        .to_string()
    }

    #[test]
    fn feishu_api_url() {
        let ch = channel();
        assert!(ch.api_url("/auth").contains("feishu.cn"));
    }

    #[test]
    fn lark_api_url() {
        let ch = channel().with_lark_api();
        assert!(ch.api_url("/auth").contains("larksuite.com"));
    }

    #[test]
    fn feishu_from_config_blank_encrypt_key_disables_decryption() {
        let config = FeishuConfig {
            app_id: "app".into(),
            app_secret: "secret".into(),
            verification_token: "verify-me".into(),
            encrypt_key: Some(String::new()),
            use_lark: true,
            ..FeishuConfig::default()
        };
        let ch = FeishuChannel::from_config(&config);
        assert!(ch.encrypt_key.is_none());
        assert_eq!(ch.verification_token.as_deref(), Some("verify-me"));
        assert!(ch.api_url("").contains("larksuite.com"));
    }

    #[test]
    fn feishu_aes_decrypt_roundtrip() {
        let plaintext = r#"{"challenge":"test"}"#;
        let ciphertext_b64 = encrypt("test_key_12345", plaintext);

        let decrypted = FeishuChannel::decrypt_aes_cbc("test_key_12345", &ciphertext_b64).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn feishu_aes_decrypt_random_iv_per_payload() {
        let plaintext = r#"{"challenge":"test"}"#;
        let a = encrypt("test_key_12345", plaintext);
        let b = encrypt("test_key_12345", plaintext);
        assert_ne!(a, b);
        assert_eq!(FeishuChannel::decrypt_aes_cbc("test_key_12345", &b).unwrap(), plaintext);
    }

    #[test]
    fn feishu_aes_decrypt_published_vector() {
        // Sample from the Feishu event subscription docs.
        let decrypted =
            FeishuChannel::decrypt_aes_cbc("test key", "P37w+VZImNgPEO1RBhJ6RtKl7n6zymIbEG1pReEzghk=")
                .unwrap();
        assert_eq!(decrypted, "hello world");
    }

    #[test]
    fn feishu_aes_decrypt_rejects_short_payload() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 8]);
        assert!(FeishuChannel::decrypt_aes_cbc("test key", &short).is_err());
    }

    #[test]
    fn feishu_encrypted_challenge_with_fixed_iv() {
        // IV 00..0f, key "enc-key", produced outside this crate.
        let encrypted = "AAECAwQFBgcICQoLDA0OD+ySd/PM1kTNikJpJvQuMzQDfjx+4bm9TzxcxLhg5CtM47vKtJulV9n47rilORtagOcD1PCANuXRS2fV3B3pxMg+4MzlUjDqFVrXkI252B8Y";
        let ch = FeishuChannel::new("app".into(), "secret".into())
            .with_encryption(Some("enc-key".into()), Some("verify-me".into()));
        let payload = serde_json::json!({ "encrypt": encrypted }).to_string();

        assert!(matches!(
            process_event_callback(&ch, &payload).unwrap(),
            EventOutcome::Challenge(c) if c == "xyz"
        ));
    }

    #[test]
    fn feishu_encrypted_short_payload_is_invalid() {
        let ch = FeishuChannel::new("app".into(), "secret".into())
            .with_encryption(Some("enc-key".into()), None);
        let payload = r#"{"encrypt":"AAAA"}"#;
        assert!(matches!(
            process_event_callback(&ch, payload),
            Err(ChannelError::InvalidEvent(_))
        ));
    }

    #[test]
    fn feishu_challenge_is_echoed() {
        let payload = r#"{"challenge":"abc","token":"verify-me","type":"url_verification"}"#;
        match process_event_callback(&channel(), payload).unwrap() {
            EventOutcome::Challenge(c) => assert_eq!(c, "abc"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn feishu_encrypted_challenge() {
        let ch = FeishuChannel::new("app".into(), "secret".into())
            .with_encryption(Some("enc-key".into()), Some("verify-me".into()));
        let inner = r#"{"challenge":"xyz","token":"verify-me","type":"url_verification"}"#;
        let payload = serde_json::json!({ "encrypt": encrypt("enc-key", inner) }).to_string();

        assert!(matches!(
            process_event_callback(&ch, &payload).unwrap(),
            EventOutcome::Challenge(c) if c == "xyz"
        ));
    }

    #[test]
    fn feishu_encrypted_event_without_key_is_rejected() {
        let payload = r#"{"encrypt":"AAAA"}"#;
        assert!(matches!(
            process_event_callback(&channel(), payload),
            Err(ChannelError::InvalidEvent(_))
        ));
    }

    #[test]
    fn feishu_token_mismatch_is_rejected() {
        let payload = message_event("forged", "p2p", serde_json::json!([]));
        assert!(matches!(
            process_event_callback(&channel(), &payload),
            Err(ChannelError::TokenMismatch)
        ));
    }

    #[test]
    fn feishu_message_event_is_parsed() {
        let payload = message_event(
            "verify-me",
            "group",
            serde_json::json!([{
                "key": "@_user_1",
                "id": { "open_id": "ou_bot" },
                "name": "chatgpt-bot",
                "tenant_key": "tenant"
            }]),
        );

        let EventOutcome::Message(msg) = process_event_callback(&channel(), &payload).unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(msg.message_id, "om_1");
        assert_eq!(msg.chat_type, ChatType::Group);
        assert_eq!(msg.chat_id, "oc_chat");
        assert_eq!(msg.sender_id, "ou_sender");
        assert_eq!(
            msg.mentions,
            vec![Mention {
                name: "chatgpt-bot".into(),
                id: "ou_bot".into()
            }]
        );
        assert_eq!(msg.text().unwrap(), "hello");
    }

    #[test]
    fn feishu_other_event_types_are_ignored() {
        let payload = serde_json::json!({
            "schema": "2.0",
            "header": { "event_type": "im.chat.member.bot.added_v1", "token": "verify-me" },
            "event": {}
        })
        .to_string();
        assert!(matches!(
            process_event_callback(&channel(), &payload).unwrap(),
            EventOutcome::Ignored
        ));
    }

    #[test]
    fn feishu_garbage_is_invalid() {
        assert!(matches!(
            process_event_callback(&channel(), "not json"),
            Err(ChannelError::InvalidEvent(_))
        ));
    }

    async fn mock_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth/v3/tenant_access_token/internal"))
            .and(body_partial_json(serde_json::json!({ "app_id": "app" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "msg": "ok",
                "tenant_access_token": "t-123",
                "expire": 7200
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn feishu_reply_and_send_share_cached_token() {
        let server = MockServer::start().await;
        mock_token(&server).await;

        Mock::given(method("POST"))
            .and(path("/im/v1/messages/om_1/reply"))
            .and(header("Authorization", "Bearer t-123"))
            .and(body_partial_json(serde_json::json!({
                "msg_type": "text",
                "content": "{\"text\":\"hi\"}"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "code": 0, "msg": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/im/v1/messages"))
            .and(query_param("receive_id_type", "chat_id"))
            .and(body_partial_json(serde_json::json!({ "receive_id": "oc_chat" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "code": 0, "msg": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        let ch = channel().with_api_base(server.uri());
        ch.reply("om_1", r#"{"text":"hi"}"#).await.unwrap();
        ch.send_to_chat("oc_chat", r#"{"text":"bye"}"#).await.unwrap();
    }

    #[tokio::test]
    async fn feishu_api_error_code_is_send_failure() {
        let server = MockServer::start().await;
        mock_token(&server).await;

        Mock::given(method("POST"))
            .and(path("/im/v1/messages/om_1/reply"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "code": 230002, "msg": "bot not in chat" })),
            )
            .mount(&server)
            .await;

        let ch = channel().with_api_base(server.uri());
        let err = ch.reply("om_1", r#"{"text":"hi"}"#).await.unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed(ref m) if m.contains("230002")));
    }
}
