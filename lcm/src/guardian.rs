//! Ensures the server may mint tokens for the identities it serves
//!
//! Minting needs `iam.serviceAccounts.getAccessToken` on the target identity.
//! The [`PermissionGuardian`] checks for it once per identity and, when it is
//! missing, grants the server's own principal the token creator role on the
//! identity's policy.
use std::sync::Arc;

use lcm_client::CloudBackend;
use lcm_core::iam::{principal_for, GET_ACCESS_TOKEN_PERMISSION, TOKEN_CREATOR_ROLE};
use tracing::{debug, info, warn};

use crate::{
    cache::PermissionSet,
    error::{Error, Result},
};

/// Verifies, and if needed grants, the mint-token permission
#[derive(Clone)]
pub struct PermissionGuardian {
    cloud: Arc<dyn CloudBackend>,
    verified: PermissionSet,
}

impl PermissionGuardian {
    /// A guardian acting through `cloud`
    pub fn new(cloud: Arc<dyn CloudBackend>) -> Self {
        Self {
            cloud,
            verified: PermissionSet::default(),
        }
    }

    /// Make sure tokens can be minted for `email`
    pub async fn ensure_can_mint_tokens(&self, email: &str) -> Result<()> {
        if self.verified.contains(email) {
            return Ok(());
        }
        if !self.verify(email).await? {
            warn!(email, "missing permission to mint tokens, granting");
            self.grant(email).await?;
        }
        self.verified.mark(email);
        Ok(())
    }

    /// Whether the server already holds the mint-token permission on `email`
    pub async fn verify(&self, email: &str) -> Result<bool> {
        let granted = self
            .cloud
            .test_iam_permissions(email, &[GET_ACCESS_TOKEN_PERMISSION])
            .await
            .map_err(Error::cloud)?;
        let held = granted.iter().any(|p| p == GET_ACCESS_TOKEN_PERMISSION);
        debug!(email, held, "verified mint permission");
        Ok(held)
    }

    /// Grant the server's own principal the token creator role on `email`
    pub async fn grant(&self, email: &str) -> Result<()> {
        let mut policy = self.cloud.get_iam_policy(email).await.map_err(Error::cloud)?;
        let caller = self.cloud.caller_email().await.map_err(Error::cloud)?;
        let principal = principal_for(&caller);
        if policy.add(&principal, TOKEN_CREATOR_ROLE) {
            self.cloud
                .set_iam_policy(email, &policy)
                .await
                .map_err(Error::cloud)?;
            info!(email, %principal, role = TOKEN_CREATOR_ROLE, "granted token creator");
        }
        Ok(())
    }
}
