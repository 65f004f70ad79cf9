//! Conversation state shared by the terminal UI and the line loop.

use crate::protocol::{ChatMessage, Role};

/// What a line typed by the operator means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Exit,
    Clear,
    Prompt(String),
}

pub fn classify(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    match line.to_lowercase().as_str() {
        "exit" | "quit" => Input::Exit,
        "clear" => Input::Clear,
        _ => Input::Prompt(line.to_string()),
    }
}

/// History of one interactive session.
#[derive(Debug, Default)]
pub struct Session {
    history: Vec<ChatMessage>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn begin_turn(&mut self, prompt: String) {
        self.history.push(ChatMessage::user(prompt));
    }

    pub fn finish_turn(&mut self, reply: String) {
        self.history.push(ChatMessage::assistant(reply));
    }

    /// Forget a user turn that never got an answer.
    pub fn abandon_turn(&mut self) {
        if self.history.last().is_some_and(|m| m.role == Role::User) {
            self.history.pop();
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("   "), Input::Empty);
        assert_eq!(classify("EXIT"), Input::Exit);
        assert_eq!(classify("quit\n"), Input::Exit);
        assert_eq!(classify(" clear "), Input::Clear);
        assert_eq!(classify(" 你好 "), Input::Prompt("你好".into()));
        assert_eq!(classify("exit now"), Input::Prompt("exit now".into()));
    }

    #[test]
    fn test_turns() {
        let mut session = Session::new();
        session.begin_turn("hi".into());
        session.finish_turn("hello".into());
        session.begin_turn("again".into());
        session.abandon_turn();
        assert_eq!(
            session.history(),
            &[ChatMessage::user("hi"), ChatMessage::assistant("hello")]
        );
        // Answered turns are never dropped.
        session.abandon_turn();
        assert_eq!(session.history().len(), 2);
        session.clear();
        assert!(session.history().is_empty());
    }
}
