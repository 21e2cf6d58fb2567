//! Plain-text prompt layout and the sliding conversation window.

use serde::{Deserialize, Serialize};

/// Tokens reserved for the system prompt, the new input and the reply.
const RESERVED_CONTEXT_TOKENS: u32 = 500;
/// Rough per-turn token cost used to size the history window.
const ESTIMATED_TOKENS_PER_TURN: u32 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Speaker labels used to lay out a completion prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub user_label: String,
    pub assistant_label: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            user_label: "ユーザー".to_string(),
            assistant_label: "アシスタント".to_string(),
        }
    }
}

impl PromptTemplate {
    fn label(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user_label,
            Role::Assistant => &self.assistant_label,
        }
    }

    /// Text that marks the model starting to speak for the user.
    pub fn stop_sequence(&self) -> String {
        format!("{}:", self.user_label)
    }

    /// Prompt for a single exchange without history.
    pub fn single_turn(&self, input: &str) -> String {
        format!(
            "{}: {}\n{}: ",
            self.user_label, input, self.assistant_label
        )
    }

    /// Prompt with a system block and prior turns.
    pub fn with_history(&self, system: &str, history: &[Turn], input: &str) -> String {
        let mut prompt = String::new();
        let system = system.trim_end();
        if !system.is_empty() {
            prompt.push_str(system);
            prompt.push_str("\n\n");
        }
        for turn in history {
            prompt.push_str(self.label(turn.role));
            prompt.push_str(": ");
            prompt.push_str(&turn.content);
            prompt.push('\n');
        }
        prompt.push_str(&self.single_turn(input));
        prompt
    }
}

/// Complete chat history with a turn-count window sized from the context.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    max_history_turns: usize,
}

impl Conversation {
    pub fn new(n_ctx: u32) -> Self {
        Self {
            turns: Vec::new(),
            max_history_turns: max_history_turns(n_ctx),
        }
    }

    pub fn max_history_turns(&self) -> usize {
        self.max_history_turns
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The most recent turns that still fit in the window.
    pub fn window(&self) -> &[Turn] {
        let start = self.turns.len().saturating_sub(self.max_history_turns);
        &self.turns[start..]
    }

    /// Record a finished exchange. Blank replies are not kept.
    pub fn record(&mut self, input: &str, reply: &str) {
        self.turns.push(Turn::user(input));
        let reply = reply.trim();
        if !reply.is_empty() {
            self.turns.push(Turn::assistant(reply));
        }
    }
}

fn max_history_turns(n_ctx: u32) -> usize {
    let turns = n_ctx.saturating_sub(RESERVED_CONTEXT_TOKENS) / ESTIMATED_TOKENS_PER_TURN;
    (turns as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_turn_layout() {
        let template = PromptTemplate::default();
        assert_eq!(
            template.single_turn("こんにちは"),
            "ユーザー: こんにちは\nアシスタント: "
        );
        assert_eq!(template.stop_sequence(), "ユーザー:");
    }

    #[test]
    fn history_layout_with_system_block() {
        let template = PromptTemplate {
            user_label: "User".to_string(),
            assistant_label: "Bot".to_string(),
        };
        let history = vec![Turn::user("hi"), Turn::assistant("hello")];
        let prompt = template.with_history("System: be brief.", &history, "how are you?");
        assert_eq!(
            prompt,
            "System: be brief.\n\nUser: hi\nBot: hello\nUser: how are you?\nBot: "
        );
    }

    #[test]
    fn empty_system_prompt_is_omitted() {
        let template = PromptTemplate::default();
        let prompt = template.with_history("", &[], "x");
        assert_eq!(prompt, template.single_turn("x"));
    }

    #[test]
    fn window_size_follows_context() {
        assert_eq!(Conversation::new(2048).max_history_turns(), 10);
        assert_eq!(Conversation::new(4096).max_history_turns(), 23);
        assert_eq!(Conversation::new(600).max_history_turns(), 1);
        assert_eq!(Conversation::new(100).max_history_turns(), 1);
    }

    #[test]
    fn window_keeps_latest_turns() {
        let mut conversation = Conversation::new(800);
        assert_eq!(conversation.max_history_turns(), 2);
        conversation.record("one", "uno");
        conversation.record("two", "dos");

        assert_eq!(conversation.turns().len(), 4);
        assert_eq!(
            conversation.window(),
            &[Turn::user("two"), Turn::assistant("dos")]
        );
    }

    #[test]
    fn blank_reply_keeps_only_user_turn() {
        let mut conversation = Conversation::new(2048);
        conversation.record("hello?", "   \n");
        assert_eq!(conversation.turns(), &[Turn::user("hello?")]);
    }
}
