//! Common types used across CLI modules

use uuid::Uuid;

/// Identifier that can be either a full UUID or an unambiguous prefix
#[derive(Debug, Clone)]
pub enum IdOrPrefix {
    /// Full UUID
    Full(Uuid),
    /// Prefix that should uniquely identify a resource
    Prefix(String),
}

impl IdOrPrefix {
    /// Parse a string into an IdOrPrefix
    ///
    /// Attempts to parse as a full UUID first, otherwise treats as a prefix
    pub fn parse(input: &str) -> Self {
        if let Ok(uuid) = Uuid::parse_str(input) {
            IdOrPrefix::Full(uuid)
        } else {
            IdOrPrefix::Prefix(input.to_string())
        }
    }

    /// Get the UUID if this is a full ID
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            IdOrPrefix::Full(uuid) => Some(*uuid),
            IdOrPrefix::Prefix(_) => None,
        }
    }

    /// Lowercased prefix used for matching; ids render without dashes too
    pub fn prefix(&self) -> String {
        match self {
            IdOrPrefix::Full(uuid) => uuid.to_string(),
            IdOrPrefix::Prefix(prefix) => prefix.to_lowercase(),
        }
    }

    /// Whether `id` starts with this prefix, in hyphenated or simple form
    pub fn matches(&self, id: Uuid) -> bool {
        match self {
            IdOrPrefix::Full(uuid) => *uuid == id,
            IdOrPrefix::Prefix(_) => {
                let prefix = self.prefix();
                id.to_string().starts_with(&prefix) || id.simple().to_string().starts_with(&prefix)
            }
        }
    }
}
