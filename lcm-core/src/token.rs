//! Minted credentials and the shape the metadata protocol serves them in
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scope granted when a caller does not ask for specific ones.
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];
/// Lifetime requested for every minted access token.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
/// Token type reported to metadata clients.
pub const BEARER: &str = "Bearer";

/// An access token minted for a cloud identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
    /// The bearer token
    pub token: String,
    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Seconds left until expiry as seen at `now`, never negative
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Render as a metadata token response
    pub fn to_response(&self, now: DateTime<Utc>) -> TokenResponse {
        TokenResponse {
            access_token: self.token.clone(),
            expires_in: self.expires_in(now),
            token_type: BEARER.to_owned(),
        }
    }
}

/// JSON body of the `service-accounts/<acc>/token` leaf
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenResponse {
    /// The bearer token
    pub access_token: String,
    /// Seconds until the token expires
    pub expires_in: i64,
    /// Always `Bearer`
    pub token_type: String,
}

/// Normalize requested scopes, falling back to [`DEFAULT_SCOPES`]
///
/// Empty entries are dropped so that `?scopes=` behaves like no scopes at all.
pub fn scopes_or_default<I, S>(scopes: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let scopes: Vec<String> = scopes
        .into_iter()
        .map(|s| s.as_ref().trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect();
    if scopes.is_empty() {
        DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect()
    } else {
        scopes
    }
}
