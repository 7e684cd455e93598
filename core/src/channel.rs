// Typed channel keys
use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a channel key: either the wildcard or a concrete value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    Any,
    Id(String),
}

impl Scope {
    /// Parses user-facing text, where the literal `any` means the wildcard.
    pub fn parse(value: &str) -> Self {
        if value == "any" {
            Scope::Any
        } else {
            Scope::Id(value.to_string())
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Scope::Any)
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Scope::Any => None,
            Scope::Id(id) => Some(id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Any => f.write_str("any"),
            Scope::Id(id) => f.write_str(id),
        }
    }
}

/// `(rootId, objectType)` pair along which subscribers receive slices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub root: Scope,
    pub object_type: Scope,
}

impl ChannelKey {
    pub fn new(root: Scope, object_type: Scope) -> Self {
        Self { root, object_type }
    }

    /// The universal channel receiving every batch unmodified.
    pub fn all() -> Self {
        Self::new(Scope::Any, Scope::Any)
    }

    pub fn for_root(root_id: impl Into<String>) -> Self {
        Self::new(Scope::Id(root_id.into()), Scope::Any)
    }

    pub fn for_object_type(object_type: impl Into<String>) -> Self {
        Self::new(Scope::Any, Scope::Id(object_type.into()))
    }

    pub fn exact(root_id: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self::new(Scope::Id(root_id.into()), Scope::Id(object_type.into()))
    }

    /// Builds a key from user-facing text such as `("any", "case_task")`.
    pub fn parse(root: &str, object_type: &str) -> Self {
        Self::new(Scope::parse(root), Scope::parse(object_type))
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.root, self.object_type)
    }
}
