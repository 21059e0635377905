//! Drives a `SessionCoordinator` against a running backend.
//!
//! $ cargo run --bin shopkeep-session
//! $ cargo run --bin session_demo -- --register --fan-out 8

use futures_util::future::join_all;
use shopkeep_session::application_impl::*;
use shopkeep_session::application_port::*;
use shopkeep_session::domain_model::*;
use shopkeep_session::logger::*;
use shopkeep_session::settings::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = DemoCli::parse();
    let logger = Logger::new_bootstrap()?;
    let project_settings = parse_settings(cli.settings.as_deref())?;
    logger.reload_from_config(&LogConfig::from(&project_settings.log))?;

    let client = &project_settings.client;
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::try_new(&client.transport_config())?);
    let handle_store: Arc<dyn RefreshHandleStore> = match client.handle_store.as_str() {
        "memory" => Arc::new(MemoryHandleStore::new()),
        "file" => Arc::new(FileHandleStore::new(&client.handle_store_dir)),
        other => return Err(anyhow::anyhow!("Unknown handle store: {}", other)),
    };
    let session = SessionCoordinator::new(transport, handle_store, client.coordinator_config());

    let subscription = session.subscribe(|credential| match credential {
        Some(token) => info!(?token, "credential changed"),
        None => info!("credential cleared"),
    });
    let mut events = session.session_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            warn!(?event, "session event");
        }
    });

    let user = match session.restore_session().await {
        Some(payload) => payload.user,
        None if cli.register => {
            session
                .register(RegistrationProfile {
                    username: cli.username.clone(),
                    password: cli.password.clone(),
                    display_name: None,
                    email: None,
                })
                .await?
                .user
        }
        None => {
            session
                .login(LoginCredentials {
                    username: cli.username.clone(),
                    password: cli.password.clone(),
                })
                .await?
                .user
        }
    };
    info!(username = %user.username, id = %user.id, "signed in");

    let calls = (0..cli.fan_out).map(|_| session.current_user());
    for (i, result) in join_all(calls).await.into_iter().enumerate() {
        match result {
            Ok(profile) => info!(call = i, username = %profile.username, "me"),
            Err(e) => error!(call = i, code = ?e.code(), "me failed: {}", e),
        }
    }

    session.logout().await?;
    session.unsubscribe(subscription);

    Ok(())
}
