//! Continuation tokens carried across turns of one conversation.

/// Opaque tokens from the upstream API. Empty until the first successful call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    conversation_id: String,
    parent_id: String,
}

impl ConversationState {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    /// Take the tokens of a new turn. Empty values never clear existing ones.
    ///
    /// Returns whether anything changed.
    pub fn update(&mut self, conversation_id: &str, parent_id: &str) -> bool {
        let mut changed = false;
        if !conversation_id.is_empty() && conversation_id != self.conversation_id {
            self.conversation_id = conversation_id.to_string();
            changed = true;
        }
        if !parent_id.is_empty() && parent_id != self.parent_id {
            self.parent_id = parent_id.to_string();
            changed = true;
        }
        changed
    }
}
