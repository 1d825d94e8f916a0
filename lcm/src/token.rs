//! Access and identity tokens for bound cloud identities
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lcm_client::CloudBackend;
use lcm_core::token::{scopes_or_default, TokenResponse, TOKEN_LIFETIME};
use tracing::debug;

use crate::{
    cache::{TokenCache, TokenKey},
    error::{Error, Result},
    guardian::PermissionGuardian,
};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The wall clock
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Mints tokens, reusing access tokens until they near expiry
#[derive(Clone)]
pub struct TokenMinter {
    cloud: Arc<dyn CloudBackend>,
    guardian: PermissionGuardian,
    tokens: TokenCache,
    clock: Clock,
}

impl TokenMinter {
    /// A minter acting through `cloud`
    pub fn new(cloud: Arc<dyn CloudBackend>, guardian: PermissionGuardian, clock: Clock) -> Self {
        Self {
            cloud,
            guardian,
            tokens: TokenCache::default(),
            clock,
        }
    }

    /// An access token for `email` with `scopes`, or the default scope when none are given
    pub async fn access_token(&self, email: &str, scopes: &[String]) -> Result<TokenResponse> {
        let scopes = scopes_or_default(scopes);
        let key = TokenKey::new(email, &scopes);
        if let Some(token) = self.tokens.fresh(&key, (self.clock)()) {
            debug!(email, "access token cache hit");
            return Ok(token.to_response((self.clock)()));
        }
        self.guardian.ensure_can_mint_tokens(email).await?;
        let token = self
            .cloud
            .generate_access_token(email, &scopes, TOKEN_LIFETIME)
            .await
            .map_err(Error::cloud)?;
        debug!(email, expires_at = %token.expires_at, "minted access token");
        self.tokens.insert(key, token.clone());
        Ok(token.to_response((self.clock)()))
    }

    /// An identity token for `email` addressed to `audience`
    pub async fn identity_token(&self, email: &str, audience: &str) -> Result<String> {
        self.guardian.ensure_can_mint_tokens(email).await?;
        let token = self
            .cloud
            .generate_id_token(email, audience)
            .await
            .map_err(Error::cloud)?;
        debug!(email, audience, "minted identity token");
        Ok(token)
    }
}
