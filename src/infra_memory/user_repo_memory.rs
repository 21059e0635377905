use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Users keyed by id, with a username index for login lookups.
pub struct MemoryUserRepo {
    users: DashMap<UserId, UserRecord>,
    usernames: DashMap<String, UserId>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        MemoryUserRepo {
            users: DashMap::new(),
            usernames: DashMap::new(),
        }
    }
}

impl Default for MemoryUserRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UserRepo for MemoryUserRepo {
    async fn create(&self, record: UserRecord) -> Result<(), AuthError> {
        match self.usernames.entry(record.username.clone()) {
            Entry::Occupied(_) => Err(AuthError::UserExists),
            Entry::Vacant(slot) => {
                slot.insert(record.user_id);
                self.users.insert(record.user_id, record);
                Ok(())
            }
        }
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<UserRecord>, AuthError> {
        let Some(user_id) = self.usernames.get(username).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.users.get(&user_id).map(|record| record.clone()))
    }

    async fn get_by_id(&self, user_id: UserId) -> Result<Option<UserRecord>, AuthError> {
        Ok(self.users.get(&user_id).map(|record| record.clone()))
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        update: &ProfileUpdate,
    ) -> Result<UserRecord, AuthError> {
        let mut record = self
            .users
            .get_mut(&user_id)
            .ok_or(AuthError::UserNotFound)?;
        if let Some(display_name) = &update.display_name {
            record.display_name = display_name.clone();
        }
        if let Some(email) = &update.email {
            record.email = Some(email.clone());
        }
        Ok(record.clone())
    }

    async fn update_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), AuthError> {
        let mut record = self
            .users
            .get_mut(&user_id)
            .ok_or(AuthError::UserNotFound)?;
        record.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn set_active(&self, user_id: UserId, is_active: bool) -> Result<(), AuthError> {
        let mut record = self
            .users
            .get_mut(&user_id)
            .ok_or(AuthError::UserNotFound)?;
        record.is_active = is_active;
        Ok(())
    }
}
