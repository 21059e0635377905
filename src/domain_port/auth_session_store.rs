use crate::application_port::*;
use crate::domain_model::*;
use chrono::{DateTime, Utc};

#[async_trait::async_trait]
pub trait AuthSessionStore: Send + Sync {
    /// Save a refresh token jti for a user, valid until `expires_at`.
    async fn save_refresh_jti(
        &self,
        user_id: UserId,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError>;
    /// Check if JTI is present (valid). If valid and consume=true, delete it (rotation).
    async fn check_refresh_jti(&self, jti: &str, consume: bool)
    -> Result<Option<UserId>, AuthError>;
    async fn revoke_refresh_jti(&self, jti: &str) -> Result<(), AuthError>;
    /// Returns the number of revoked JTIs.
    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<usize, AuthError>;
    /// Drop JTIs that expired before `now`. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError>;
}
