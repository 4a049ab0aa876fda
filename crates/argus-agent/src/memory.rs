use argus_llm::{estimate_history_tokens, ChatMessage};

/// Conversation history for one ReAct conversation. Owns the message
/// list; trimming drops the oldest non-system turns when the estimated
/// token footprint exceeds the context budget.
pub struct ConversationMemory {
    pub conversation_id: String,
    messages: Vec<ChatMessage>,
}

impl ConversationMemory {
    pub fn new(system_prompt: &str) -> Self {
        Self {
            conversation_id: argus_common::id::next_id(),
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn with_conversation_id(system_prompt: &str, conversation_id: String) -> Self {
        Self {
            conversation_id,
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn estimated_tokens(&self) -> u64 {
        estimate_history_tokens(&self.messages)
    }

    /// Trim to fit `max_tokens`, preserving the system prompt and the most
    /// recent turns. Tool-result messages at the new head are dropped too;
    /// a result without its call confuses providers.
    pub fn trim(&mut self, max_tokens: u64) {
        while self.messages.len() > 2 && self.estimated_tokens() > max_tokens {
            self.messages.remove(1);
            while self.messages.len() > 1 && self.messages[1].role == "tool" {
                self.messages.remove(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_keeps_system_and_recent_turns() {
        let mut memory = ConversationMemory::new("system prompt");
        for i in 0..20 {
            memory.push(ChatMessage::user(format!("message number {i} {}", "x".repeat(200))));
        }
        let before = memory.messages().len();
        memory.trim(200);
        assert!(memory.messages().len() < before);
        assert_eq!(memory.messages()[0].role, "system");
        let last = memory.messages().last().unwrap();
        assert!(last.content.contains("message number 19"));
    }

    #[test]
    fn trim_never_strands_tool_results() {
        let mut memory = ConversationMemory::new("system");
        memory.push(ChatMessage::user("u1".repeat(100)));
        memory.push(ChatMessage::assistant("a1".repeat(100), Vec::new()));
        memory.push(ChatMessage::tool_result("call_1", "r1".repeat(100)));
        memory.push(ChatMessage::user("u2"));
        memory.trim(60);
        assert!(memory.messages().iter().all(|m| m.role != "tool"));
    }
}
