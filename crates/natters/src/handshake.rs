use crate::auth::{AuthError, Authenticator};
use natter_common::frame::{Envelope, FrameError, Kind};
use natter_common::types::reply_text;
use natter_common::UserId;
use thiserror::Error;

/// Why a login handshake failed. Every variant except [`Malformed`] closes
/// the connection.
///
/// [`Malformed`]: HandshakeError::Malformed
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HandshakeError {
    /// The first frame did not decode.
    #[error("malformed login frame: {0}")]
    Malformed(#[from] FrameError),
    /// The first frame was not a `login` frame.
    #[error("expected login frame, got {0}")]
    NotLogin(&'static str),
    /// The `login` frame carried no token.
    #[error("login frame without token")]
    MissingToken,
    /// The authenticator refused the token.
    #[error("token rejected: {0}")]
    Rejected(#[from] AuthError),
}

impl HandshakeError {
    /// Text of the `error` frame sent before closing.
    #[must_use]
    pub fn reply_text(&self) -> &'static str {
        match self {
            Self::Malformed(_) => reply_text::MALFORMED_FRAME,
            Self::Rejected(_) => reply_text::INVALID_TOKEN,
            Self::NotLogin(_) | Self::MissingToken => reply_text::LOGIN_REQUIRED,
        }
    }

    /// Whether the connection must close. An undecodable frame is answered
    /// and the connection keeps waiting for its login.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }

    /// Metric label for this failure.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Rejected(_) => "rejected",
            Self::NotLogin(_) | Self::MissingToken => "login_required",
        }
    }
}

/// Check that `data` is a `login` frame with a token the authenticator
/// accepts, and return the identity it names.
pub fn login(data: &[u8], auth: &dyn Authenticator) -> Result<UserId, HandshakeError> {
    let frame = Envelope::parse(data)?;
    if frame.kind != Kind::Login {
        return Err(HandshakeError::NotLogin(frame.kind.as_str()));
    }
    let token = frame
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(HandshakeError::MissingToken)?;
    Ok(auth.authenticate(token)?)
}
