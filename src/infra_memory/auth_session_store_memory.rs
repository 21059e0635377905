use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
struct JtiEntry {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

/// Refresh JTIs keyed by `{prefix}:{jti}`. Expired entries are treated as
/// absent and removed by [`AuthSessionStore::purge_expired`].
pub struct MemoryAuthSessionStore {
    entries: DashMap<String, JtiEntry>,
    prefix: String,
}

impl MemoryAuthSessionStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        MemoryAuthSessionStore {
            entries: DashMap::new(),
            prefix: prefix.into(),
        }
    }

    fn key(&self, jti: &str) -> String {
        format!("{}:{}", self.prefix, jti)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl AuthSessionStore for MemoryAuthSessionStore {
    async fn save_refresh_jti(
        &self,
        user_id: UserId,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.entries.insert(
            self.key(jti),
            JtiEntry {
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn check_refresh_jti(
        &self,
        jti: &str,
        consume: bool,
    ) -> Result<Option<UserId>, AuthError> {
        let key = self.key(jti);
        let now = Utc::now();
        let entry = if consume {
            self.entries.remove(&key).map(|(_, entry)| entry)
        } else {
            self.entries.get(&key).map(|entry| *entry)
        };
        match entry {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.user_id)),
            _ => Ok(None),
        }
    }

    async fn revoke_refresh_jti(&self, jti: &str) -> Result<(), AuthError> {
        self.entries.remove(&self.key(jti));
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<usize, AuthError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.user_id != user_id);
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(n: u128) -> UserId {
        UserId(uuid::Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn consumed_jti_cannot_be_used_twice() {
        let store = MemoryAuthSessionStore::new("auth:test");
        let until = Utc::now() + Duration::minutes(5);
        store.save_refresh_jti(user(1), "jti-a", until).await.unwrap();

        assert_eq!(store.check_refresh_jti("jti-a", false).await.unwrap(), Some(user(1)));
        assert_eq!(store.check_refresh_jti("jti-a", true).await.unwrap(), Some(user(1)));
        assert_eq!(store.check_refresh_jti("jti-a", true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_jti_is_absent_and_purged() {
        let store = MemoryAuthSessionStore::new("auth:test");
        let past = Utc::now() - Duration::seconds(1);
        store.save_refresh_jti(user(1), "old", past).await.unwrap();
        store
            .save_refresh_jti(user(1), "fresh", Utc::now() + Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(store.check_refresh_jti("old", false).await.unwrap(), None);
        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn revoke_all_only_touches_the_given_user() {
        let store = MemoryAuthSessionStore::new("auth:test");
        let until = Utc::now() + Duration::minutes(5);
        store.save_refresh_jti(user(1), "a1", until).await.unwrap();
        store.save_refresh_jti(user(1), "a2", until).await.unwrap();
        store.save_refresh_jti(user(2), "b1", until).await.unwrap();

        assert_eq!(store.revoke_all_for_user(user(1)).await.unwrap(), 2);
        assert_eq!(store.check_refresh_jti("b1", false).await.unwrap(), Some(user(2)));
    }
}
