//! Per-conversation unsent input.

use std::collections::HashMap;

use spotter_shared::ConversationId;

/// At most one draft per conversation; writes overwrite.
#[derive(Debug, Clone, Default)]
pub struct DraftStore {
    drafts: HashMap<ConversationId, String>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the draft.  Writing an empty string clears it.
    pub fn set(&mut self, conversation: &ConversationId, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            self.drafts.remove(conversation);
        } else {
            self.drafts.insert(conversation.clone(), text);
        }
    }

    /// Verbatim draft text, or `""` when there is none.
    pub fn get(&self, conversation: &ConversationId) -> &str {
        self.drafts.get(conversation).map(String::as_str).unwrap_or("")
    }

    pub fn clear(&mut self, conversation: &ConversationId) {
        self.drafts.remove(conversation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_and_get_is_verbatim() {
        let mut drafts = DraftStore::new();
        let conv = ConversationId::new("r1");
        drafts.set(&conv, "hel");
        drafts.set(&conv, "  hello \n");
        assert_eq!(drafts.get(&conv), "  hello \n");
    }

    #[test]
    fn clear_and_missing_return_empty() {
        let mut drafts = DraftStore::new();
        let conv = ConversationId::new("r1");
        assert_eq!(drafts.get(&conv), "");
        drafts.set(&conv, "hello");
        drafts.clear(&conv);
        assert_eq!(drafts.get(&conv), "");
        assert!(drafts.drafts.is_empty());
    }
}
