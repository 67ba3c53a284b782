use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ---------------------------------------------------------------------------
// Protocol variants
// ---------------------------------------------------------------------------

/// Wire protocol spoken by an upstream vendor endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// OpenAI-style `/chat/completions` SSE.
    ChatCompletions,
    /// OpenAI "Responses" typed event stream.
    Responses,
    /// Anthropic-style `/messages` stream.
    Messages,
    /// Gemini-style `streamGenerateContent?alt=sse`.
    GenerateContent,
}

impl ProtocolVariant {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVariant::ChatCompletions => "chat_completions",
            ProtocolVariant::Responses => "responses",
            ProtocolVariant::Messages => "messages",
            ProtocolVariant::GenerateContent => "generate_content",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chat_completions" => Some(ProtocolVariant::ChatCompletions),
            "responses" => Some(ProtocolVariant::Responses),
            "messages" => Some(ProtocolVariant::Messages),
            "generate_content" => Some(ProtocolVariant::GenerateContent),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Finish reasons and usage
// ---------------------------------------------------------------------------

/// Why a response stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Cancelled,
    Error,
    Unknown,
}

impl FinishReason {
    /// Whether this finish produced a response worth continuing from.
    /// `Unknown` covers an upstream that closed without a finish signal, so
    /// the turn may be cut short.
    #[must_use]
    pub fn is_successful(self) -> bool {
        !matches!(
            self,
            FinishReason::Cancelled | FinishReason::Error | FinishReason::Unknown
        )
    }
}

/// Token usage for one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
}

impl Usage {
    /// Fold a later report into this one. Vendors that split usage over
    /// several events send zero for the half they do not know yet.
    pub fn merge(&mut self, later: Usage) {
        if later.input_tokens > 0 {
            self.input_tokens = later.input_tokens;
        }
        if later.output_tokens > 0 {
            self.output_tokens = later.output_tokens;
        }
        if later.cached_tokens.is_some() {
            self.cached_tokens = later.cached_tokens;
        }
    }
}

// ---------------------------------------------------------------------------
// Content events
// ---------------------------------------------------------------------------

/// One canonical event, in the order the caller must observe it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentEvent {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
        chain_id: String,
    },
    ThinkingEnd {
        chain_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        redacted: Option<String>,
    },
    ToolCallStart {
        index: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    ToolCallComplete {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    UsageReport(Usage),
    /// Side-channel payload that must not be rendered as text.
    SessionData {
        mime: String,
        payload: Vec<u8>,
    },
}

// ---------------------------------------------------------------------------
// Conversation history
// ---------------------------------------------------------------------------

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// A part of a message in the caller's conversation history.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePart {
    Text(String),
    Thinking {
        text: String,
        signature: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        content: String,
    },
    /// Opaque side-channel data, e.g. a continuity marker.
    Data { mime: String, payload: Vec<u8> },
}

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub parts: SmallVec<[MessagePart; 2]>,
}

impl ConversationMessage {
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            parts: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        let mut message = Self::new(role);
        message.parts.push(MessagePart::Text(text.into()));
        message
    }

    #[must_use]
    pub fn with_part(mut self, part: MessagePart) -> Self {
        self.parts.push(part);
        self
    }
}
