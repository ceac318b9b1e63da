use serde::{Deserialize, Serialize};

/// The room and participant a join token is minted for.
///
/// Capabilities are fixed: every grant may join, publish and subscribe.
/// There is no finer-grained authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub room: String,
    pub identity: String,
    /// Display name; falls back to the identity when empty.
    #[serde(default)]
    pub name: String,
}

impl AccessGrant {
    pub fn new(room: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            identity: identity.into(),
            name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.identity
        } else {
            &self.name
        }
    }
}
