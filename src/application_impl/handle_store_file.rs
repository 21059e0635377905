use crate::application_port::*;
use crate::domain_model::*;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const HANDLE_SLOT_NAME: &str = "refresh_handle.json";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredHandle {
    refresh_token: RefreshHandle,
    saved_at: chrono::DateTime<chrono::Utc>,
}

/// Fallback slot persisted as one JSON file, so a new process can try to
/// resume the session.
pub struct FileHandleStore {
    path: PathBuf,
}

impl FileHandleStore {
    /// The slot file is `dir/refresh_handle.json`; `dir` is created on first save.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(HANDLE_SLOT_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn store_error(context: &str, path: &Path, e: impl std::fmt::Display) -> SessionError {
    SessionError::Store(format!("{} {}: {}", context, path.display(), e))
}

#[async_trait::async_trait]
impl RefreshHandleStore for FileHandleStore {
    async fn load(&self) -> Result<Option<RefreshHandle>, SessionError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error("reading", &self.path, e)),
        };
        let stored: StoredHandle =
            serde_json::from_slice(&bytes).map_err(|e| store_error("parsing", &self.path, e))?;
        Ok(Some(stored.refresh_token))
    }

    async fn save(&self, handle: &RefreshHandle) -> Result<(), SessionError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| store_error("creating", dir, e))?;
        }
        let stored = StoredHandle {
            refresh_token: handle.clone(),
            saved_at: chrono::Utc::now(),
        };
        let bytes =
            serde_json::to_vec(&stored).map_err(|e| store_error("encoding", &self.path, e))?;

        // Write then rename so a crash never leaves a half-written slot.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| store_error("writing", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| store_error("renaming", &self.path, e))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_error("removing", &self.path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_slot_loads_as_none_and_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileHandleStore::new(dir.path());

        assert_eq!(store.load().await.unwrap(), None);
        store.clear().await.unwrap();
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn saved_handle_survives_a_new_store_instance() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("session");
        FileHandleStore::new(&nested)
            .save(&RefreshHandle("rh-7".to_string()))
            .await
            .unwrap();

        let reopened = FileHandleStore::new(&nested);
        assert_eq!(
            reopened.load().await.unwrap(),
            Some(RefreshHandle("rh-7".to_string()))
        );

        reopened.clear().await.unwrap();
        assert!(!reopened.path().exists());
    }

    #[tokio::test]
    async fn corrupt_slot_is_a_store_error() {
        let dir = TempDir::new().unwrap();
        let store = FileHandleStore::new(dir.path());
        tokio::fs::write(store.path(), b"{not json").await.unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, SessionError::Store(_)));
    }
}
