//! Compact per-response digests used for continuation matching.
//!
//! One line per content item, `role:kind:...`:
//!
//! ```text
//! assistant:thinking:Let me look at the failing test first
//! assistant:text:The bug is in the parser.
//! assistant:tool_call:call_abc:read_file
//! tool:tool_result:call_abc:1834
//! ```

use std::fmt;
use std::str::FromStr;

use super::similarity::is_similar;
use crate::protocol::canonical::{ConversationMessage, MessagePart, Role};
use crate::util::truncate_chars;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed summary line: {0:?}")]
pub struct SummaryLineError(pub String);

/// One digest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryLine {
    ToolCall { role: Role, id: String, name: String },
    ToolResult { role: Role, id: String, len: usize },
    Text { role: Role, content: String },
    Thinking { role: Role, content: String },
}

impl SummaryLine {
    /// Tool lines must be identical; text and thinking lines of the same
    /// role match on similarity above `threshold` percent.
    #[must_use]
    pub fn matches(&self, other: &SummaryLine, threshold: f64) -> bool {
        match (self, other) {
            (SummaryLine::ToolCall { .. }, SummaryLine::ToolCall { .. })
            | (SummaryLine::ToolResult { .. }, SummaryLine::ToolResult { .. }) => self == other,
            (
                SummaryLine::Text { role, content },
                SummaryLine::Text {
                    role: other_role,
                    content: other_content,
                },
            )
            | (
                SummaryLine::Thinking { role, content },
                SummaryLine::Thinking {
                    role: other_role,
                    content: other_content,
                },
            ) => role == other_role && is_similar(content, other_content, threshold),
            _ => false,
        }
    }
}

impl fmt::Display for SummaryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryLine::ToolCall { role, id, name } => {
                write!(f, "{}:tool_call:{id}:{name}", role.as_str())
            }
            SummaryLine::ToolResult { role, id, len } => {
                write!(f, "{}:tool_result:{id}:{len}", role.as_str())
            }
            SummaryLine::Text { role, content } => write!(f, "{}:text:{content}", role.as_str()),
            SummaryLine::Thinking { role, content } => {
                write!(f, "{}:thinking:{content}", role.as_str())
            }
        }
    }
}

impl FromStr for SummaryLine {
    type Err = SummaryLineError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || SummaryLineError(line.to_string());
        let mut fields = line.splitn(3, ':');
        let role = fields.next().and_then(Role::parse).ok_or_else(malformed)?;
        let kind = fields.next().ok_or_else(malformed)?;
        let rest = fields.next().ok_or_else(malformed)?;
        match kind {
            "tool_call" => {
                let (id, name) = rest.rsplit_once(':').ok_or_else(malformed)?;
                Ok(SummaryLine::ToolCall {
                    role,
                    id: id.to_string(),
                    name: name.to_string(),
                })
            }
            "tool_result" => {
                let (id, len) = rest.rsplit_once(':').ok_or_else(malformed)?;
                Ok(SummaryLine::ToolResult {
                    role,
                    id: id.to_string(),
                    len: len.parse().map_err(|_| malformed())?,
                })
            }
            "text" => Ok(SummaryLine::Text {
                role,
                content: rest.to_string(),
            }),
            "thinking" => Ok(SummaryLine::Thinking {
                role,
                content: rest.to_string(),
            }),
            _ => Err(malformed()),
        }
    }
}

/// Digest of one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseSummary {
    pub lines: Vec<SummaryLine>,
}

impl ResponseSummary {
    /// Summarize `message`, truncating free text to `max_chars` characters.
    /// Side-channel data parts do not contribute lines.
    #[must_use]
    pub fn from_message(message: &ConversationMessage, max_chars: usize) -> Self {
        let role = message.role;
        let lines = message
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text(text) => Some(SummaryLine::Text {
                    role,
                    content: digest_text(text, max_chars),
                }),
                MessagePart::Thinking { text, .. } => Some(SummaryLine::Thinking {
                    role,
                    content: digest_text(text, max_chars),
                }),
                MessagePart::ToolCall { id, name, .. } => Some(SummaryLine::ToolCall {
                    role,
                    id: id.clone(),
                    name: name.clone(),
                }),
                MessagePart::ToolResult { call_id, content } => Some(SummaryLine::ToolResult {
                    role,
                    id: call_id.clone(),
                    len: content.len(),
                }),
                MessagePart::Data { .. } => None,
            })
            .collect();
        Self { lines }
    }

    /// Parse the line-oriented form produced by `Display`.
    ///
    /// # Errors
    ///
    /// Returns [`SummaryLineError`] for the first line that does not parse.
    pub fn parse(text: &str) -> Result<Self, SummaryLineError> {
        let lines = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { lines })
    }

    /// Whether any line here matches any line of `other`.
    #[must_use]
    pub fn matches_any(&self, other: &ResponseSummary, threshold: f64) -> bool {
        self.lines
            .iter()
            .any(|line| other.lines.iter().any(|o| line.matches(o, threshold)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for ResponseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Truncate and flatten to a single line.
fn digest_text(text: &str, max_chars: usize) -> String {
    truncate_chars(text, max_chars)
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}
