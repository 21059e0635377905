use crate::application_port::*;
use crate::domain_model::*;
use tokio::sync::Mutex;

/// Fallback slot that lives as long as the process. Suits tests and clients
/// that rely on the cookie jar alone.
#[derive(Default)]
pub struct MemoryHandleStore {
    slot: Mutex<Option<RefreshHandle>>,
}

impl MemoryHandleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RefreshHandleStore for MemoryHandleStore {
    async fn load(&self) -> Result<Option<RefreshHandle>, SessionError> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, handle: &RefreshHandle) -> Result<(), SessionError> {
        *self.slot.lock().await = Some(handle.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        *self.slot.lock().await = None;
        Ok(())
    }
}
