//! Provider-ready message shapes — the Message Builder's output type
//! (spec §4.8). Defined here rather than in `tenex-core` because both the
//! engine and any host embedding it need to agree on exactly what an LLM
//! provider call receives.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// One part of a multimodal message's content (spec §4.8 image strategy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
}

/// A message's content, either plain text (the common case) or a
/// multimodal sequence of parts (only ever produced for the single most
/// recent user message containing an image URL, per spec §4.8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(_) => None,
        }
    }
}

/// A single provider-ready message, the atomic unit of the Message
/// Builder's output (spec §4.8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: MessageContent,
    /// Present on tool-role messages to identify which tool-call this is
    /// the result of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Present on assistant-role tool-call messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ProviderMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, tool_name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Text(output.into()),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }
}

/// The Message Builder's full output (spec §4.7 `buildAgentMessages`):
/// the projected message list plus the provider session token to resume,
/// if the agent has one recorded in its [`crate::conversation::AgentState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltMessages {
    pub messages: Vec<ProviderMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_token: Option<String>,
}
