//! Enumeration types for memories and queries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Who may read a memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Owner only.
    #[default]
    Private,
    /// Any authenticated user, through persona queries and listings.
    Public,
}

impl Permission {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }

    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, Self::Public)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            _ => Err(format!("unknown permission: {s}")),
        }
    }
}

/// Response style for persona queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Default,
    Concise,
    Creative,
}

impl Persona {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Concise => "concise",
            Self::Creative => "creative",
        }
    }

    const fn preamble(self) -> &'static str {
        match self {
            Self::Default => {
                "You are a helpful assistant that answers questions based on the user's memories."
            }
            Self::Concise => {
                "You are a concise assistant that answers questions based on the user's memories."
            }
            Self::Creative => {
                "You are a creative assistant that answers questions based on the user's memories."
            }
        }
    }

    const fn instruction(self) -> &'static str {
        match self {
            Self::Default => {
                "Your response should be helpful, relevant, and based on the memories provided. \
                 If the memories don't contain relevant information, you can say so."
            }
            Self::Concise => "Provide a brief and direct response based on these memories. Be concise.",
            Self::Creative => {
                "Provide a creative and engaging response that incorporates these memories in an \
                 interesting way."
            }
        }
    }

    /// Build the completion prompt from memory texts and the user's question.
    #[must_use]
    pub fn render_prompt<S: AsRef<str>>(self, memories: &[S], query: &str) -> String {
        let memories = memories
            .iter()
            .map(|m| format!("- {}", m.as_ref()))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n\nMemories:\n{}\n\nUser Query: {}\n\n{}",
            self.preamble(),
            memories,
            query,
            self.instruction()
        )
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
