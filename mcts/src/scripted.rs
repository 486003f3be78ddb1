use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use model::ReasoningModel;
use protocol::ChatMessage;

/// Deterministic stand-in for the inference backend: fixed action lists,
/// fixed scores, and a terminal marker injected after a set number of
/// action applications.
pub struct ScriptedModel {
    actions: Vec<String>,
    score: f32,
    terminal_after: usize,
    collapse: bool,
    applications: AtomicUsize,
}

impl ScriptedModel {
    /// Applying an action appends ` -> <action>` to the state.
    pub fn appending(actions: &[&str], score: f32) -> Self {
        Self {
            actions: actions.iter().map(|a| a.to_string()).collect(),
            score,
            terminal_after: 0,
            collapse: false,
            applications: AtomicUsize::new(0),
        }
    }

    /// Every action maps to the same next state, regardless of which one
    /// was applied.
    pub fn collapsing(actions: &[&str], score: f32) -> Self {
        Self {
            collapse: true,
            ..Self::appending(actions, score)
        }
    }

    /// Appends the answer marker starting with the nth application.
    pub fn terminal_after(mut self, applications: usize) -> Self {
        self.terminal_after = applications;
        self
    }
}

#[async_trait]
impl ReasoningModel for ScriptedModel {
    async fn dynamic_actions(&self, _context: &[ChatMessage], _state: &str) -> Vec<String> {
        self.actions.clone()
    }

    async fn apply_action(
        &self,
        _context: &[ChatMessage],
        state: &str,
        action: &str,
    ) -> Result<String> {
        let count = self.applications.fetch_add(1, Ordering::SeqCst) + 1;

        let mut next = if self.collapse {
            format!("{} -> same", state)
        } else {
            format!("{} -> {}", state, action)
        };

        if self.terminal_after > 0 && count >= self.terminal_after {
            next.push_str(" The answer is: X");
        }

        Ok(next)
    }

    async fn evaluate_state(&self, _context: &[ChatMessage], _state: &str) -> f32 {
        self.score
    }

    async fn evaluate_actions(
        &self,
        _context: &[ChatMessage],
        _state: &str,
        actions: &[String],
    ) -> Vec<f32> {
        vec![self.score; actions.len()]
    }

    async fn summarize(&self, _context: &[ChatMessage], _state: &str) -> String {
        "condensed".to_string()
    }

    async fn complete(&self, _messages: Vec<ChatMessage>) -> Result<String> {
        Ok(String::new())
    }
}
