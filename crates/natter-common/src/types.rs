//! Core type definitions and protocol constants for natter.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque user identity, the only key shared by the session registry,
/// the message router and the friend graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a raw identity string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty identity (an unaddressed frame).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the identity, returning the owned string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for UserId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Current WebSocket subprotocol identifier.
/// Bump this on breaking wire-format changes.
pub const PROTOCOL_VERSION: &str = "natter.v1";

/// Human-readable `content` strings carried by server-generated frames.
pub mod reply_text {
    /// Content of the `login` acknowledgement.
    pub const LOGIN_OK: &str = "login ok";
    /// First frame was not a `login` frame, or carried no token.
    pub const LOGIN_REQUIRED: &str = "login required";
    /// Token was rejected by the authenticator.
    pub const INVALID_TOKEN: &str = "invalid token";
    /// Handshake did not complete within the login timeout.
    pub const LOGIN_TIMEOUT: &str = "login timed out";
    /// Inbound frame could not be decoded.
    pub const MALFORMED_FRAME: &str = "malformed frame";
    /// Recipient has no bound session.
    pub const RECIPIENT_OFFLINE: &str = "recipient offline";
    /// Recipient's outbound queue is full; the frame was dropped.
    pub const RECIPIENT_BUSY: &str = "recipient busy";
    /// This connection was replaced by a newer session for the same identity.
    pub const SIGNED_IN_ELSEWHERE: &str = "signed in elsewhere";
}

/// Returns the current wall-clock time in seconds since the Unix epoch.
///
/// A clock set before the epoch reads as `0`.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
