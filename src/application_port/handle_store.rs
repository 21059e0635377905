use crate::application_port::SessionError;
use crate::domain_model::RefreshHandle;

/// Single named slot holding the fallback copy of the refresh handle, used
/// when the cookie jar cannot carry it.
#[async_trait::async_trait]
pub trait RefreshHandleStore: Send + Sync {
    async fn load(&self) -> Result<Option<RefreshHandle>, SessionError>;
    async fn save(&self, handle: &RefreshHandle) -> Result<(), SessionError>;
    /// Clearing an empty slot is not an error.
    async fn clear(&self) -> Result<(), SessionError>;
}
