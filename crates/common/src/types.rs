use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Errors for username validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsernameError {
    #[error("username is empty")]
    Empty,

    #[error("username contains whitespace or control characters: {0:?}")]
    InvalidCharacters(String),
}

/// A validated username under which a node publishes its public key
/// and is addressed by other peers.
///
/// Usernames are embedded into reply-event names on the rendezvous
/// protocol (`receiveIP<username>`), so whitespace and control
/// characters are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(name: impl Into<String>) -> Result<Self, UsernameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(UsernameError::Empty);
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(UsernameError::InvalidCharacters(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Username {
    type Err = UsernameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for Username {
    type Error = UsernameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
