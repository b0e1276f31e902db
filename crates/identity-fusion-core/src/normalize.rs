use std::fmt::{Debug, Formatter};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const SALT_ENV_VAR: &str = "IDENTITY_SALT";

/// Used when `IDENTITY_SALT` is unset and strict mode is off.
pub const FALLBACK_SALT: &str = "default-salt";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SaltError {
    #[error("IDENTITY_SALT is not set and strict salt mode is enabled")]
    Missing,
    #[error("salt cannot key HMAC-SHA256: {0}")]
    InvalidKey(String),
}

/// Process-wide secret keying the email digest.
#[derive(Clone)]
pub struct IdentitySalt {
    mac: HmacSha256,
    is_fallback: bool,
}

impl IdentitySalt {
    /// # Errors
    /// Returns [`SaltError::InvalidKey`] when the HMAC cannot be keyed.
    pub fn new(secret: &str) -> Result<Self, SaltError> {
        Self::keyed(secret, false)
    }

    /// # Errors
    /// Returns [`SaltError::InvalidKey`] when the HMAC cannot be keyed.
    pub fn fallback() -> Result<Self, SaltError> {
        Self::keyed(FALLBACK_SALT, true)
    }

    /// Resolve the salt from an optional configured value. Unset and empty
    /// values fall back to [`FALLBACK_SALT`] unless `strict` is set.
    ///
    /// # Errors
    /// Returns [`SaltError::Missing`] in strict mode when no value is configured.
    pub fn resolve(configured: Option<&str>, strict: bool) -> Result<Self, SaltError> {
        match configured.filter(|value| !value.is_empty()) {
            Some(secret) => Self::new(secret),
            None if strict => Err(SaltError::Missing),
            None => Self::fallback(),
        }
    }

    /// # Errors
    /// See [`IdentitySalt::resolve`].
    pub fn from_env(strict: bool) -> Result<Self, SaltError> {
        let configured = std::env::var(SALT_ENV_VAR).ok();
        Self::resolve(configured.as_deref(), strict)
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }

    fn keyed(secret: &str, is_fallback: bool) -> Result<Self, SaltError> {
        let mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
            .map_err(|err| SaltError::InvalidKey(err.to_string()))?;
        Ok(Self { mac, is_fallback })
    }
}

impl Debug for IdentitySalt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySalt").field("is_fallback", &self.is_fallback).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawSignal {
    #[serde(alias = "url")]
    pub domain: String,
    #[serde(default, alias = "emailHint")]
    pub email_hint: Option<String>,
    #[serde(default, alias = "usernameHint")]
    pub username_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedSignal {
    pub email_hash: Option<String>,
    pub domain: String,
    pub username: Option<String>,
}

/// Lowercase hex HMAC-SHA256 of `email` keyed by `salt`.
#[must_use]
pub fn hash_email(email: &str, salt: &IdentitySalt) -> String {
    let mut mac = salt.mac.clone();
    mac.update(email.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[must_use]
pub fn normalize(raw: &RawSignal, salt: &IdentitySalt) -> NormalizedSignal {
    NormalizedSignal {
        email_hash: raw
            .email_hint
            .as_deref()
            .filter(|email| !email.is_empty())
            .map(|email| hash_email(email, salt)),
        domain: raw.domain.clone(),
        username: raw
            .username_hint
            .as_deref()
            .filter(|username| !username.is_empty())
            .map(str::to_lowercase),
    }
}
