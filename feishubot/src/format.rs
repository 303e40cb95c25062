//! Outbound text formatting for Feishu.

/// Sent to the chat when a conversation times out.
pub const FAREWELL_TEXT: &str = "会话结束了，拜拜!";

/// Feishu mention markup for a user.
pub fn mention(user_id: &str) -> String {
    format!("<at user_id=\"{user_id}\"></at>")
}

/// Provenance line naming the backend that produced a reply.
pub fn source_line(source: &str) -> String {
    format!("【本次对话由 {source} 提供】")
}

/// Compose a reply.
///
/// Group replies mention the sender first; the source line is empty unless
/// provenance display is enabled.
pub fn reply_text(reply: &str, source: &str, mention_user: Option<&str>, show_source: bool) -> String {
    let source_text = if show_source {
        source_line(source)
    } else {
        String::new()
    };

    match mention_user {
        Some(user_id) => format!("{} {reply} \n {source_text}", mention(user_id)),
        None => format!("{reply} \n{source_text}"),
    }
}

/// Farewell addressed to the conversation's sender.
pub fn farewell_text(user_id: &str) -> String {
    format!("{}{FAREWELL_TEXT}", mention(user_id))
}
