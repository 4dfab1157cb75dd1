//! Opaque access tokens and their issuer.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Random bytes behind every issued token (128 bits).
pub const TOKEN_ENTROPY_BYTES: usize = 16;

/// Unguessable key identifying one registered file.
///
/// Issued tokens are lowercase hex, which is URL-safe without escaping.
/// Tokens arriving from restored snapshots are accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Wrap an existing token string (from a URL path or a snapshot key).
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Draw a fresh token from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Source of new tokens.
pub trait TokenIssuer: Send + Sync {
    fn new_token(&self) -> Token;
}

/// Issuer backed by the operating system's random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenIssuer;

impl TokenIssuer for RandomTokenIssuer {
    fn new_token(&self) -> Token {
        Token::generate()
    }
}
