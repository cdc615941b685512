//! Bearer token validation.
//!
//! Tokens are `base64url(uid "|" expiry) "." base64url(hmac_sha256(payload))`.
//! They are opaque to clients and valid until `expiry` (seconds since epoch).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL_SAFE, Engine as _};
use hmac::{Hmac, Mac};
use natter_common::{unix_now, UserId};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted secret length in bytes.
pub const MIN_SECRET_LEN: usize = 16;

/// Reasons a token is refused.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    /// The token is not in `payload.signature` form or does not decode.
    #[error("malformed token")]
    Malformed,
    /// The signature does not match the payload.
    #[error("bad token signature")]
    BadSignature,
    /// The validity window has passed.
    #[error("token expired")]
    Expired,
}

/// The configured signing secret is unusable.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("token secret must be at least {MIN_SECRET_LEN} bytes")]
pub struct InvalidSecret;

/// Turns an opaque bearer token into a user identity.
pub trait Authenticator: Send + Sync {
    /// Validate `token` and return the identity it was issued for.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the token is malformed, forged or expired.
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// HMAC-SHA256 token issuer and validator.
pub struct TokenAuthority {
    mac: HmacSha256,
    ttl: u64,
}

impl TokenAuthority {
    /// Create an authority signing with `secret`; issued tokens live `ttl` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSecret`] if `secret` is shorter than [`MIN_SECRET_LEN`].
    pub fn new(secret: &[u8], ttl: u64) -> Result<Self, InvalidSecret> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(InvalidSecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| InvalidSecret)?;
        Ok(Self { mac, ttl })
    }

    /// Create an authority with a random secret. Tokens it issues do not
    /// survive a restart.
    #[must_use]
    pub fn ephemeral(ttl: u64) -> Self {
        let mut key = hmac::digest::Key::<HmacSha256>::default();
        OsRng.fill_bytes(&mut key);
        Self {
            mac: <HmacSha256 as hmac::digest::KeyInit>::new(&key),
            ttl,
        }
    }

    fn mac(&self) -> HmacSha256 {
        self.mac.clone()
    }

    /// Issue a token for `uid`, valid from now for the configured window.
    #[must_use]
    pub fn issue(&self, uid: &UserId) -> String {
        self.issue_at(uid, unix_now())
    }

    /// Issue a token for `uid` as if the current time were `now`.
    #[must_use]
    pub fn issue_at(&self, uid: &UserId, now: u64) -> String {
        let payload = format!("{}|{}", uid, now.saturating_add(self.ttl));
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let tag = mac.finalize().into_bytes();
        format!(
            "{}.{}",
            BASE64_URL_SAFE.encode(payload.as_bytes()),
            BASE64_URL_SAFE.encode(tag)
        )
    }

    /// Validate `token` as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the token is malformed, forged or expired.
    pub fn verify_at(&self, token: &str, now: u64) -> Result<UserId, AuthError> {
        let (payload_b64, tag_b64) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let payload = BASE64_URL_SAFE
            .decode(payload_b64)
            .map_err(|_| AuthError::Malformed)?;
        let tag = BASE64_URL_SAFE
            .decode(tag_b64)
            .map_err(|_| AuthError::Malformed)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&tag)
            .map_err(|_| AuthError::BadSignature)?;

        let payload = String::from_utf8(payload).map_err(|_| AuthError::Malformed)?;
        let (uid, expiry) = payload.rsplit_once('|').ok_or(AuthError::Malformed)?;
        let expiry: u64 = expiry.parse().map_err(|_| AuthError::Malformed)?;
        if uid.is_empty() {
            return Err(AuthError::Malformed);
        }
        if now >= expiry {
            return Err(AuthError::Expired);
        }
        Ok(UserId::from(uid))
    }
}

impl Authenticator for TokenAuthority {
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        self.verify_at(token, unix_now())
    }
}
