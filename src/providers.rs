use serde::{Deserialize, Serialize};

use crate::config::ModelMap;

/// Which comparison column a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSelector {
    Gpt,
    Gemini,
}

impl ModelSelector {
    pub const ALL: [ModelSelector; 2] = [ModelSelector::Gpt, ModelSelector::Gemini];

    /// Parse the `model` field of a relay request. Exact, lowercase match only.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "gpt" => Some(ModelSelector::Gpt),
            "gemini" => Some(ModelSelector::Gemini),
            _ => None,
        }
    }

    /// Static lookup of the upstream model identifier.
    pub fn upstream_model<'a>(&self, models: &'a ModelMap) -> &'a str {
        match self {
            ModelSelector::Gpt => &models.gpt,
            ModelSelector::Gemini => &models.gemini,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelSelector::Gpt => "GPT",
            ModelSelector::Gemini => "Gemini",
        }
    }
}

impl std::fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSelector::Gpt => write!(f, "gpt"),
            ModelSelector::Gemini => write!(f, "gemini"),
        }
    }
}

// -- Relay wire types -------------------------------------------------------

/// Body accepted by `POST /api/chat`. Both fields are optional at the decode
/// step so absence can be reported as a validation error rather than a parse
/// failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl RelayRequest {
    pub fn new(prompt: impl Into<String>, model: ModelSelector) -> Self {
        Self {
            prompt: Some(prompt.into()),
            model: Some(model.to_string()),
        }
    }
}

/// A validated submission: prompt plus resolved selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub prompt: String,
    pub model: ModelSelector,
}

/// The normalized unit sent to the client, one per upstream text fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl DeltaEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
        }
    }
}

// -- Upstream chat-completions types ----------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Single-turn conversation: fixed system instruction, then the user turn.
    pub fn single_turn(model: &str, system_prompt: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

impl ChatChunk {
    /// The first choice's text delta, if it carries any text.
    pub fn first_delta(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|s| !s.is_empty())
    }
}
