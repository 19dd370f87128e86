//! OAuth scopes and space-delimited scope sets (RFC 6749 §3.3).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named permission a token can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "memories:read")]
    MemoriesRead,
    #[serde(rename = "memories:write")]
    MemoriesWrite,
    #[serde(rename = "profile:read")]
    ProfileRead,
}

impl Scope {
    /// Every scope this server understands.
    pub const ALL: [Self; 3] = [Self::MemoriesRead, Self::MemoriesWrite, Self::ProfileRead];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MemoriesRead => "memories:read",
            Self::MemoriesWrite => "memories:write",
            Self::ProfileRead => "profile:read",
        }
    }

    /// Text shown on the consent page.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::MemoriesRead => "Read your memories and run queries over them",
            Self::MemoriesWrite => "Create, update and delete your memories",
            Self::ProfileRead => "Read your basic profile",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memories:read" => Ok(Self::MemoriesRead),
            "memories:write" => Ok(Self::MemoriesWrite),
            "profile:read" => Ok(Self::ProfileRead),
            _ => Err(format!("unknown scope: {s}")),
        }
    }
}

/// An ordered set of scopes, serialized as a space-delimited string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeSet(BTreeSet<Scope>);

impl ScopeSet {
    /// Parse a space-delimited scope string. Empty input yields an empty set.
    pub fn parse(s: &str) -> Result<Self, String> {
        s.split_whitespace().map(Scope::from_str).collect::<Result<BTreeSet<_>, _>>().map(Self)
    }

    /// All supported scopes.
    #[must_use]
    pub fn all() -> Self {
        Self(Scope::ALL.into_iter().collect())
    }

    #[must_use]
    pub fn contains(&self, scope: Scope) -> bool {
        self.0.contains(&scope)
    }

    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Scope> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = Scope>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope.as_str())?;
            first = false;
        }
        Ok(())
    }
}

impl TryFrom<String> for ScopeSet {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ScopeSet> for String {
    fn from(value: ScopeSet) -> Self {
        value.to_string()
    }
}
