use crate::domain_port::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically drops expired refresh token ids from the session store.
pub struct SessionSweeper {
    session_store: Arc<dyn AuthSessionStore>,
    interval: Duration,
    cancellation_token: CancellationToken,
}

impl SessionSweeper {
    pub fn new(
        session_store: Arc<dyn AuthSessionStore>,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            session_store,
            interval,
            cancellation_token,
        }
    }

    async fn tick_once(&self) -> anyhow::Result<usize> {
        tokio::time::sleep(self.interval).await;
        let purged = self.session_store.purge_expired(Utc::now()).await?;
        if purged > 0 {
            tracing::debug!(purged, "expired refresh tokens swept");
        }
        Ok(purged)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("SessionSweeper shutting down...");
                    break;
                }
                result = self.tick_once() => {
                    if let Err(e) = result {
                        tracing::error!("SessionSweeper error: {:#?}", e);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_model::UserId;
    use crate::infra_memory::MemoryAuthSessionStore;

    #[tokio::test]
    async fn sweeps_expired_entries_until_cancelled() {
        let store = Arc::new(MemoryAuthSessionStore::new("test"));
        store
            .save_refresh_jti(
                UserId(uuid::Uuid::new_v4()),
                "old",
                Utc::now() - chrono::Duration::seconds(5),
            )
            .await
            .unwrap();
        store
            .save_refresh_jti(
                UserId(uuid::Uuid::new_v4()),
                "fresh",
                Utc::now() + chrono::Duration::seconds(60),
            )
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let sweeper =
            SessionSweeper::new(store.clone(), Duration::from_millis(10), cancel.clone());
        let handle = tokio::spawn(async move { sweeper.run().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.check_refresh_jti("fresh", false).await.unwrap().is_some());
    }
}
