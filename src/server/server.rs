use crate::api::v1::CookiePolicy;
use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::logger::*;
use crate::server::SessionSweeper;
use crate::settings::Settings;
use nanoid::nanoid;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";

/// The development auth backend: in-memory users and refresh token ids,
/// JWT credentials and a background sweeper for expired ids.
pub struct Server {
    pub auth_service: Arc<dyn AuthService>,
    pub user_repo: Arc<dyn UserRepo>,
    pub cookie_policy: Arc<CookiePolicy>,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let alphabet: [char; 16] = [
            '1', '2', '3', '4', '5', '6', '7', '8', '9', '0', 'a', 'b', 'c', 'd', 'e', 'f',
        ];
        let run_id = nanoid!(10, &alphabet);

        let credential_hasher: Arc<dyn CredentialHasher> = match settings.auth.hasher.as_str() {
            "default" => Arc::new(Argon2PasswordHasher::new()),
            // Low cost for tests and local development only.
            "fast" => Arc::new(Argon2PasswordHasher::with_cost(1024, 1)?),
            other => return Err(anyhow::anyhow!("Unknown password hasher: {}", other)),
        };
        let key = std::env::var("JWT_SIGNING_KEY")
            .unwrap_or_else(|_| "shopkeep-dev-secret-key".to_string())
            .into_bytes();
        let token_codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(JwtConfig {
            issuer: settings.auth.issuer.clone(),
            audience: settings.auth.audience.clone(),
            access_ttl: Duration::from_secs(settings.auth.access_ttl_secs),
            refresh_ttl: Duration::from_secs(settings.auth.refresh_ttl_secs),
            signing_key: key,
        }));

        let session_store: Arc<dyn AuthSessionStore> =
            Arc::new(MemoryAuthSessionStore::new(format!("auth:{}", run_id)));
        let user_repo: Arc<dyn UserRepo> = Arc::new(MemoryUserRepo::new());

        let auth_service: Arc<dyn AuthService> = Arc::new(RealAuthService::new(
            user_repo.clone(),
            credential_hasher,
            token_codec,
            session_store.clone(),
        ));

        let cookie_policy = Arc::new(CookiePolicy {
            path: REFRESH_COOKIE_PATH.to_string(),
            secure: settings.http.cert_path.is_some() && settings.http.key_path.is_some(),
            max_age_secs: settings.auth.refresh_ttl_secs,
        });

        // region runtime infra
        let cancel = CancellationToken::new();

        let sweeper = SessionSweeper::new(
            session_store,
            Duration::from_secs(settings.auth.sweep_interval_secs.max(1)),
            cancel.clone(),
        );
        let sweeper_handle = tokio::spawn(async move {
            let _ = sweeper.run().await;
        });

        // endregion

        info!(%run_id, "server started");

        Ok(Self {
            auth_service,
            user_repo,
            cookie_policy,
            sweeper_handle: Mutex::new(Some(sweeper_handle)),
            cancel,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        self.cancel.cancel();

        let handle = match self.sweeper_handle.lock() {
            Ok(mut lock) => lock.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let r = handle.await;
            info!("sweeper handle dropped: {:?}", r);
        }
    }
}
