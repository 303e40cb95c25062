//! feishubot - Feishu/Lark bot backed by a stateful conversational API.
//!
//! Every (chat, sender) pair is a session with its own actor, so one user's
//! conversation is answered strictly in order and at a bounded rate while
//! other conversations proceed independently.
//!
//! ## Architecture
//!
//! ```text
//! Feishu → webhook → EventRouter → SessionRegistry → SessionActor → upstream API
//!                                                          ↓
//! Feishu ←────────── FeishuChannel (MessageSink) ← filters + format
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod feishu;
pub mod filter;
pub mod format;
pub mod message;
pub mod router;
pub mod routes;
pub mod session;
pub mod traits;
pub mod upstream;

// Re-export commonly used types
pub use feishu::{process_event_callback, EventOutcome, FeishuChannel};
pub use filter::{FilterPipeline, KeywordsFilter, MessageFilter};
pub use message::{ChatType, InboundMessage, Mention, TextContent};
pub use router::{Admission, EventRouter, IgnoreReason};
pub use routes::{build_router, AppState};
pub use session::{Session, SessionContext, SessionKey, SessionRegistry, SessionSettings};
pub use traits::{ChannelError, ChannelResult, MessageSink};
pub use upstream::{ChatGptApi, ConversationApi, ConversationReply, UpstreamError, UpstreamResult};

use feishubot_common::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;

/// Wire the platform adapter, upstream client and session core from config.
///
/// Returns the HTTP router and the registry, whose sweeper the caller starts.
pub fn build_app(config: &Config) -> (axum::Router, Arc<SessionRegistry>) {
    let feishu = Arc::new(FeishuChannel::from_config(&config.feishu));
    let api = Arc::new(ChatGptApi::new(&config.upstream));
    let filters = Arc::new(FilterPipeline::from_config(&config.filter));

    let ctx = Arc::new(SessionContext {
        api,
        sink: feishu.clone(),
        filters,
        settings: SessionSettings::from_config(config),
    });
    let registry = Arc::new(SessionRegistry::new(ctx));
    let router = Arc::new(EventRouter::new(config.feishu.bot_name.clone(), registry.clone()));

    let state = Arc::new(AppState { feishu, router });
    (build_router(state), registry)
}

/// Start the HTTP server and the session sweeper.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config.listen_address().parse()?;

    if config.reply.retry_time > 0 {
        tracing::warn!(
            retry_time = config.reply.retry_time,
            "retry_time is configured but upstream calls are never retried"
        );
    }

    let (router, registry) = build_app(config);
    let sweeper = registry.spawn_sweeper();

    tracing::info!(
        bot_name = %config.feishu.bot_name,
        upstream = %config.upstream.base_url(),
        expire_seconds = config.session.expire_seconds,
        "Starting feishubot on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("feishubot stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
