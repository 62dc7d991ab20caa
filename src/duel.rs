//! Two columns driven by one submit / stop pair.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Barrier;
use tracing::info;

use crate::consumer::{ColumnSession, Phase, StreamState};
use crate::providers::ModelSelector;

pub struct DuelSession {
    gpt: ColumnSession,
    gemini: ColumnSession,
}

impl DuelSession {
    /// Both columns talk to the same relay endpoint over one shared client.
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            gpt: ColumnSession::new(ModelSelector::Gpt, client.clone(), endpoint.clone()),
            gemini: ColumnSession::new(ModelSelector::Gemini, client, endpoint),
        }
    }

    pub fn with_timeout(self, limit: Duration) -> Self {
        Self {
            gpt: self.gpt.with_timeout(limit),
            gemini: self.gemini.with_timeout(limit),
        }
    }

    pub fn column(&self, model: ModelSelector) -> &ColumnSession {
        match model {
            ModelSelector::Gpt => &self.gpt,
            ModelSelector::Gemini => &self.gemini,
        }
    }

    /// Start both columns and return once both stream tasks are running.
    /// Blank prompts are ignored and yield `false`.
    pub async fn submit(&mut self, prompt: &str) -> bool {
        if prompt.trim().is_empty() {
            return false;
        }
        let gate = Arc::new(Barrier::new(3));
        self.gpt.launch(prompt, Some(Arc::clone(&gate)));
        self.gemini.launch(prompt, Some(Arc::clone(&gate)));
        gate.wait().await;
        info!("both columns streaming");
        true
    }

    /// Cancel both columns.
    pub fn stop(&mut self) {
        self.gpt.stop();
        self.gemini.stop();
    }

    pub fn reset(&mut self) {
        self.gpt.reset();
        self.gemini.reset();
    }

    pub fn is_generating(&self) -> bool {
        self.gpt.is_active() || self.gemini.is_active()
    }

    pub fn snapshots(&self) -> (StreamState, StreamState) {
        (self.gpt.snapshot(), self.gemini.snapshot())
    }

    /// Wait for both columns to settle; returns `(gpt, gemini)` phases.
    pub async fn wait(&mut self) -> (Phase, Phase) {
        tokio::join!(self.gpt.wait(), self.gemini.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_duel() -> DuelSession {
        DuelSession::new(Client::new(), "http://127.0.0.1:9/api/chat")
    }

    #[tokio::test]
    async fn test_blank_prompt_not_submitted() {
        let mut duel = unreachable_duel();
        assert!(!duel.submit("   ").await);
        assert!(!duel.is_generating());
        assert_eq!(duel.column(ModelSelector::Gpt).snapshot().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_stop_fans_out() {
        let mut duel = unreachable_duel();
        assert!(duel.submit("hello").await);
        duel.stop();
        assert!(!duel.is_generating());
        let (gpt, gemini) = duel.snapshots();
        assert!(!gpt.is_active);
        assert!(!gemini.is_active);
    }

    #[tokio::test]
    async fn test_columns_have_their_own_models() {
        let duel = unreachable_duel();
        assert_eq!(duel.column(ModelSelector::Gpt).model(), ModelSelector::Gpt);
        assert_eq!(duel.column(ModelSelector::Gemini).model(), ModelSelector::Gemini);
    }
}
