//! Message author identity.

use serde::{Deserialize, Serialize};

/// Kind of participant that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorType {
    /// A human participant.
    Human,
    /// An LLM assistant.
    Assistant,
    /// Automated or system-generated content.
    System,
}

impl AuthorType {
    /// Stable string form, matching the persisted `author_type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parses the persisted string form. Unknown values map to `System`
    /// so a schema-drifted row never aborts a read path.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "human" => Self::Human,
            "assistant" => Self::Assistant,
            _ => Self::System,
        }
    }
}

impl std::fmt::Display for AuthorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who wrote a message or chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorInfo {
    /// Display name, e.g. a Slack handle.
    pub name: String,
    /// Participant kind.
    #[serde(rename = "type")]
    pub kind: AuthorType,
}

impl AuthorInfo {
    /// Convenience constructor.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: AuthorType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}
