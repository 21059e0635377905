use crate::application_port::*;
use crate::domain_model::*;
use crate::logger::*;
use dashmap::DashMap;
use nanoid::nanoid;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{broadcast, oneshot};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const LOGOUT_ALL_PATH: &str = "/auth/logout-all";
pub const ME_PATH: &str = "/auth/me";
pub const PROFILE_PATH: &str = "/auth/profile";
pub const PASSWORD_PATH: &str = "/auth/password";

type RefreshOutcome = Result<SessionPayload, SessionError>;

/// Who is waiting on a refresh. Only failures seen by protocol callers end
/// the session with a broadcast; explicit and cold-start refreshes report
/// their failure to the caller alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOrigin {
    Unauthorized,
    Explicit,
}

enum RefreshFailure {
    TimedOut(std::time::Duration),
    Failed(SessionError),
}

impl From<SessionError> for RefreshFailure {
    fn from(error: SessionError) -> Self {
        RefreshFailure::Failed(error)
    }
}

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
        announce: bool,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshHandleBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshHandle>,
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    handle_store: Arc<dyn RefreshHandleStore>,
    config: CoordinatorConfig,
    credential: RwLock<Option<AccessToken>>,
    refresh_state: Mutex<RefreshState>,
    observers: DashMap<SubscriptionId, CredentialObserver>,
    next_subscription: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
    // Serializes credential + handle store updates so they land together.
    auth_lock: tokio::sync::Mutex<()>,
    // Bumped under `auth_lock` whenever a session is established or cleared.
    epoch: AtomicU64,
}

/// Owns the access credential, signs outgoing calls with it and recovers
/// from its expiry with a single in-flight refresh shared by every caller.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        handle_store: Arc<dyn RefreshHandleStore>,
        config: CoordinatorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                transport,
                handle_store,
                config,
                credential: RwLock::new(None),
                refresh_state: Mutex::new(RefreshState::Idle),
                observers: DashMap::new(),
                next_subscription: AtomicU64::new(1),
                events,
                auth_lock: tokio::sync::Mutex::new(()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    // region credential & handle

    /// Replace the in-memory credential and notify every subscriber, even when
    /// the value did not change.
    pub fn set_credential(&self, value: Option<AccessToken>) {
        {
            let mut guard = self
                .inner
                .credential
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *guard = value.clone();
        }

        let observers: Vec<CredentialObserver> = self
            .inner
            .observers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for observer in observers {
            observer(value.as_ref());
        }
    }

    pub fn credential(&self) -> Option<AccessToken> {
        self.inner
            .credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn set_refresh_handle(&self, value: Option<RefreshHandle>) -> Result<(), SessionError> {
        match value {
            Some(handle) => self.inner.handle_store.save(&handle).await,
            None => self.inner.handle_store.clear().await,
        }
    }

    pub async fn refresh_handle(&self) -> Result<Option<RefreshHandle>, SessionError> {
        self.inner.handle_store.load().await
    }

    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(Option<&AccessToken>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner.observers.insert(id, Arc::new(observer));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.remove(&id).is_some()
    }

    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Store a session obtained by login or register. Supersedes any refresh
    /// still in flight.
    async fn apply_session(&self, payload: &SessionPayload) -> Result<(), SessionError> {
        let _guard = self.inner.auth_lock.lock().await;
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.store_session(payload).await
    }

    /// Store a refreshed session, unless the session it refreshes was
    /// cleared or replaced after `epoch` was read.
    async fn apply_refreshed(&self, payload: &SessionPayload, epoch: u64) -> Result<(), SessionError> {
        let _guard = self.inner.auth_lock.lock().await;
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            if self.credential().is_none() {
                self.revoke_orphan(payload).await;
            }
            return Err(SessionError::SessionExpired(
                "session ended while refreshing".to_string(),
            ));
        }
        self.store_session(payload).await
    }

    /// Best-effort revoke of a handle rotated for a session that was logged
    /// out in the meantime.
    async fn revoke_orphan(&self, payload: &SessionPayload) {
        let Some(handle) = &payload.refresh_token else {
            return;
        };
        let request = match ApiRequest::post(LOGOUT_PATH).json(&RefreshHandleBody {
            refresh_token: Some(handle.clone()),
        }) {
            Ok(request) => request.kind(RequestKind::CredentialExchange),
            Err(e) => {
                warn!(error = %e, "could not build revoke request");
                return;
            }
        };
        match self.inner.transport.send(&request).await {
            Ok(response) if response.is_success() => debug!("orphaned refresh handle revoked"),
            Ok(response) => warn!(status = response.status, "orphaned refresh handle not revoked"),
            Err(e) => warn!(error = %e, "orphaned refresh handle not revoked"),
        }
    }

    async fn store_session(&self, payload: &SessionPayload) -> Result<(), SessionError> {
        if let Some(handle) = &payload.refresh_token {
            self.inner.handle_store.save(handle).await?;
        }
        self.set_credential(Some(payload.access_token.clone()));
        Ok(())
    }

    async fn clear_session(&self) -> Result<(), SessionError> {
        let _guard = self.inner.auth_lock.lock().await;
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.set_credential(None);
        self.inner.handle_store.clear().await
    }

    /// Drop the credential after a failed refresh. Returns false when the
    /// session was already cleared or replaced since `epoch`.
    async fn expire_credential(&self, epoch: u64) -> bool {
        let _guard = self.inner.auth_lock.lock().await;
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        self.set_credential(None);
        true
    }

    // endregion

    // region request pipeline

    pub fn sign_request(&self, request: &mut ApiRequest) {
        if let Some(credential) = self.credential() {
            request.authorization = Some(credential.bearer());
        }
    }

    /// Sign and issue a request. A credential-expired 401 on a standard request
    /// is absorbed by [`Self::handle_unauthorized`]; every other response is
    /// returned as-is.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, SessionError> {
        self.sign_request(&mut request);
        let request_id = nanoid!(8);
        debug!(
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
            attempt = request.context.attempt_count,
            "sending request"
        );

        let response = self.inner.transport.send(&request).await?;
        if response.is_unauthorized() && request.context.may_refresh() {
            debug!(request_id = %request_id, "request unauthorized");
            return self.handle_unauthorized(request, response).await;
        }
        Ok(response)
    }

    /// Recover a failed request: classify the 401, wait for (or start) the
    /// single in-flight refresh, then retry the request once with the new
    /// credential.
    pub async fn handle_unauthorized(
        &self,
        mut request: ApiRequest,
        response: ApiResponse,
    ) -> Result<ApiResponse, SessionError> {
        let (code, message) = failure_details(&response);
        if !request.context.may_refresh() || !self.is_expiry(code.as_deref()) {
            return Err(SessionError::Unauthorized { code, message });
        }

        let current = self.credential();
        let credential = match current {
            // A refresh already landed after this request was signed.
            Some(current) if request.authorization.as_deref() != Some(current.bearer().as_str()) => {
                debug!(path = %request.path, "retrying with newer credential");
                current
            }
            _ => {
                self.await_refresh(RefreshOrigin::Unauthorized)
                    .await?
                    .access_token
            }
        };

        request.context.attempt_count += 1;
        request.authorization = Some(credential.bearer());
        debug!(path = %request.path, attempt = request.context.attempt_count, "retrying request");
        self.inner.transport.send(&request).await
    }

    fn is_expiry(&self, code: Option<&str>) -> bool {
        match code {
            Some(code) => self.inner.config.expiry_codes.iter().any(|c| c == code),
            None => self.inner.config.bare_unauthorized == BareUnauthorizedPolicy::AssumeExpired,
        }
    }

    /// Issue a request and decode the `data` of a successful envelope.
    pub async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, SessionError> {
        let response = self.send(request).await?;
        decode_data(&response)
    }

    /// Issue a request whose successful envelope carries no meaningful data.
    pub async fn call_unit(&self, request: ApiRequest) -> Result<(), SessionError> {
        let response = self.send(request).await?;
        expect_success::<serde_json::Value>(&response)?;
        Ok(())
    }

    // endregion

    // region refresh

    async fn await_refresh(&self, origin: RefreshOrigin) -> RefreshOutcome {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut state = self
                .inner
                .refresh_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match &mut *state {
                RefreshState::Refreshing { waiters, announce } => {
                    waiters.push(tx);
                    *announce |= origin == RefreshOrigin::Unauthorized;
                    debug!(queued = waiters.len(), "waiting on in-flight refresh");
                    false
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing {
                        waiters: vec![tx],
                        announce: origin == RefreshOrigin::Unauthorized,
                    };
                    true
                }
            }
        };

        if start {
            // Detached so a cancelled caller cannot strand the queue.
            let this = self.clone();
            tokio::spawn(async move { this.run_refresh_cycle().await });
        }

        rx.await
            .unwrap_or_else(|_| Err(SessionError::SessionExpired("refresh abandoned".to_string())))
    }

    async fn run_refresh_cycle(&self) {
        info!("refreshing access credential");
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let result = self.exchange_refresh(epoch).await.map_err(|e| match e {
            RefreshFailure::TimedOut(timeout) => (
                SessionEndReason::RefreshTimedOut,
                format!("refresh timed out after {:?}", timeout),
            ),
            RefreshFailure::Failed(e) => (SessionEndReason::SessionExpired, e.to_string()),
        });

        let mut current = true;
        if let Err((_, reason)) = &result {
            current = self.expire_credential(epoch).await;
            if current {
                warn!(%reason, "refresh failed, clearing credential");
            } else {
                info!(%reason, "refresh outlived its session, discarding");
            }
        }

        let (waiters, announce) = {
            let mut state = self
                .inner
                .refresh_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters, announce } => (waiters, announce),
                RefreshState::Idle => (Vec::new(), false),
            }
        };

        match result {
            Ok(payload) => {
                info!(waiters = waiters.len(), "refresh succeeded");
                for waiter in waiters {
                    let _ = waiter.send(Ok(payload.clone()));
                }
            }
            Err((end_reason, reason)) => {
                let error = SessionError::SessionExpired(reason);
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                if announce && current {
                    info!(reason = end_reason.as_str(), "session ended");
                    let _ = self
                        .inner
                        .events
                        .send(SessionEvent::Ended { reason: end_reason });
                }
            }
        }
    }

    /// The refresh network exchange. Uses the fallback handle when one is
    /// stored; otherwise relies on the cookie jar. Goes to the transport
    /// directly: a refresh never re-enters the unauthorized protocol.
    ///
    /// Only the network call is bounded by `refresh_timeout`; once the server
    /// has rotated the handle, the store write always runs to completion.
    async fn exchange_refresh(&self, epoch: u64) -> Result<SessionPayload, RefreshFailure> {
        let handle = self.refresh_handle().await?;
        let request = ApiRequest::post(REFRESH_PATH)
            .json(&RefreshHandleBody {
                refresh_token: handle,
            })?
            .kind(RequestKind::Refresh);
        let timeout = self.inner.config.refresh_timeout;
        let response = tokio::time::timeout(timeout, self.inner.transport.send(&request))
            .await
            .map_err(|_| RefreshFailure::TimedOut(timeout))??;
        let payload: SessionPayload = decode_data(&response)?;
        self.apply_refreshed(&payload, epoch).await?;
        Ok(payload)
    }

    /// Obtain a new credential. Joins the in-flight refresh if there is one.
    pub async fn refresh(&self) -> Result<SessionPayload, SessionError> {
        self.await_refresh(RefreshOrigin::Explicit).await
    }

    /// Single best-effort refresh at startup. `None` means the application
    /// starts unauthenticated.
    pub async fn restore_session(&self) -> Option<SessionPayload> {
        match self.refresh().await {
            Ok(payload) => {
                info!(user = %payload.user.username, "session restored");
                Some(payload)
            }
            Err(e) => {
                info!(error = %e, "no session to restore");
                None
            }
        }
    }

    // endregion

    // region auth operations

    pub async fn login(&self, credentials: LoginCredentials) -> Result<SessionPayload, SessionError> {
        let request = ApiRequest::post(LOGIN_PATH)
            .json(&credentials)?
            .kind(RequestKind::CredentialExchange);
        let payload: SessionPayload = self.call(request).await?;
        self.apply_session(&payload).await?;
        info!(user = %payload.user.username, "logged in");
        Ok(payload)
    }

    pub async fn register(
        &self,
        profile: RegistrationProfile,
    ) -> Result<SessionPayload, SessionError> {
        let request = ApiRequest::post(REGISTER_PATH)
            .json(&profile)?
            .kind(RequestKind::CredentialExchange);
        let payload: SessionPayload = self.call(request).await?;
        self.apply_session(&payload).await?;
        info!(user = %payload.user.username, "registered");
        Ok(payload)
    }

    /// Notify the server, then clear local state whatever the server said.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let handle = match self.refresh_handle().await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "could not read refresh handle for logout");
                None
            }
        };
        let notified = match ApiRequest::post(LOGOUT_PATH).json(&RefreshHandleBody {
            refresh_token: handle,
        }) {
            Ok(request) => {
                self.call_unit(request.kind(RequestKind::CredentialExchange))
                    .await
            }
            Err(e) => Err(e),
        };
        self.finish_logout(notified).await
    }

    /// Revoke every session of the user on the server, then clear local state.
    pub async fn logout_all(&self) -> Result<(), SessionError> {
        let notified = self.call_unit(ApiRequest::post(LOGOUT_ALL_PATH)).await;
        self.finish_logout(notified).await
    }

    async fn finish_logout(&self, notified: Result<(), SessionError>) -> Result<(), SessionError> {
        if let Err(e) = notified {
            warn!(error = %e, "server logout failed, clearing local session anyway");
        }
        self.clear_session().await?;
        info!("logged out");
        Ok(())
    }

    pub async fn current_user(&self) -> Result<UserProfile, SessionError> {
        self.call(ApiRequest::get(ME_PATH)).await
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<UserProfile, SessionError> {
        self.call(ApiRequest::put(PROFILE_PATH).json(&update)?)
            .await
    }

    /// On success the server revokes every refresh handle, so the local
    /// session is cleared and the user must log in again.
    pub async fn change_password(&self, change: PasswordChange) -> Result<(), SessionError> {
        self.call_unit(ApiRequest::put(PASSWORD_PATH).json(&change)?)
            .await?;
        self.clear_session().await?;
        info!("password changed, re-login required");
        Ok(())
    }

    // endregion
}

fn failure_details(response: &ApiResponse) -> (Option<String>, String) {
    match serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&response.body) {
        Ok(envelope) => {
            let message = if envelope.message.is_empty() {
                format!("status {}", response.status)
            } else {
                envelope.message
            };
            (envelope.code, message)
        }
        Err(_) if response.body.trim().is_empty() => (None, format!("status {}", response.status)),
        Err(_) => (None, response.body.clone()),
    }
}

fn decode_data<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, SessionError> {
    expect_success::<T>(response)?
        .data
        .ok_or_else(|| SessionError::Decode("response has no data".to_string()))
}

fn expect_success<T: DeserializeOwned>(
    response: &ApiResponse,
) -> Result<ApiEnvelope<T>, SessionError> {
    if !response.is_success() {
        let (code, message) = failure_details(response);
        return Err(if response.is_unauthorized() {
            SessionError::Unauthorized { code, message }
        } else {
            SessionError::Api {
                status: response.status,
                code,
                message,
            }
        });
    }

    let envelope: ApiEnvelope<T> =
        serde_json::from_str(&response.body).map_err(|e| SessionError::Decode(e.to_string()))?;
    if !envelope.success {
        return Err(SessionError::Api {
            status: response.status,
            code: envelope.code,
            message: envelope.message,
        });
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{FakeTransport, MemoryHandleStore, RefreshMode};
    use futures_util::future::join_all;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn coordinator(transport: Arc<FakeTransport>) -> (SessionCoordinator, Arc<MemoryHandleStore>) {
        coordinator_with(transport, CoordinatorConfig::default())
    }

    fn coordinator_with(
        transport: Arc<FakeTransport>,
        config: CoordinatorConfig,
    ) -> (SessionCoordinator, Arc<MemoryHandleStore>) {
        let store = Arc::new(MemoryHandleStore::new());
        let coordinator = SessionCoordinator::new(transport, store.clone(), config);
        (coordinator, store)
    }

    fn good_login() -> LoginCredentials {
        LoginCredentials {
            username: "cashier".to_string(),
            password: FakeTransport::PASSWORD.to_string(),
        }
    }

    #[tokio::test]
    async fn login_stores_credential_and_handle_together() {
        let transport = Arc::new(FakeTransport::new());
        let (session, store) = coordinator(transport.clone());

        let payload = session.login(good_login()).await.unwrap();

        assert_eq!(payload.access_token.as_str(), "tok1");
        assert_eq!(session.credential(), Some(AccessToken("tok1".into())));
        assert_eq!(store.load().await.unwrap(), Some(RefreshHandle("rh1".into())));
    }

    #[tokio::test]
    async fn sign_request_leaves_unsigned_without_credential() {
        let transport = Arc::new(FakeTransport::new());
        let (session, _) = coordinator(transport);

        let mut request = ApiRequest::get("/items");
        session.sign_request(&mut request);
        assert!(request.authorization.is_none());

        session.set_credential(Some(AccessToken("abc".into())));
        session.sign_request(&mut request);
        assert_eq!(request.authorization.as_deref(), Some("Bearer abc"));
    }

    #[tokio::test]
    async fn concurrent_expired_calls_share_one_refresh() {
        let transport = Arc::new(FakeTransport::new().with_refresh_delay(Duration::from_millis(50)));
        let (session, _) = coordinator(transport.clone());
        session.login(good_login()).await.unwrap();
        transport.expire_credential();

        let calls = (0..2).map(|i| {
            let session = session.clone();
            async move {
                session
                    .call::<serde_json::Value>(ApiRequest::get(format!("/items/{}", i)))
                    .await
            }
        });
        let results = join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
        assert_eq!(transport.refresh_calls(), 1);
        let retried: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.path.starts_with("/items/") && r.status == 200)
            .collect();
        assert_eq!(retried.len(), 2);
        assert!(
            retried
                .iter()
                .all(|r| r.authorization.as_deref() == Some("Bearer tok2"))
        );
        assert_eq!(session.credential(), Some(AccessToken("tok2".into())));
    }

    #[tokio::test]
    async fn many_waiters_resolve_exactly_once_after_refresh_settles() {
        let transport = Arc::new(FakeTransport::new().with_refresh_delay(Duration::from_millis(80)));
        let (session, _) = coordinator(transport.clone());
        session.login(good_login()).await.unwrap();
        transport.expire_credential();

        let mut handles = Vec::new();
        for i in 0..16 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis((i % 4) * 5)).await;
                session
                    .call::<serde_json::Value>(ApiRequest::get(format!("/items/{}", i)))
                    .await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 16);
        assert_eq!(transport.refresh_calls(), 1);

        let requests = transport.requests();
        let refresh_at = requests
            .iter()
            .position(|r| r.path == REFRESH_PATH)
            .unwrap();
        let retried: Vec<usize> = requests
            .iter()
            .enumerate()
            .filter(|(_, r)| r.path.starts_with("/items/") && r.status == 200)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(retried.len(), 16);
        assert!(retried.iter().all(|&i| i > refresh_at), "{:?}", requests);
    }

    #[tokio::test]
    async fn logout_during_refresh_keeps_session_cleared() {
        let transport = Arc::new(FakeTransport::new().with_refresh_delay(Duration::from_millis(100)));
        let (session, store) = coordinator(transport.clone());
        let mut events = session.session_events();
        session.login(good_login()).await.unwrap();
        transport.expire_credential();

        let pending = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .call::<serde_json::Value>(ApiRequest::get("/items"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.logout().await.unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SessionError::SessionExpired(_))), "{:?}", result);
        assert_eq!(session.credential(), None);
        assert_eq!(store.load().await.unwrap(), None);
        assert!(events.try_recv().is_err());

        // The handle rotated for the ended session is revoked.
        let logouts: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.path == LOGOUT_PATH)
            .collect();
        assert_eq!(logouts.len(), 2);
        assert_eq!(logouts[1].body.as_ref().unwrap()["refreshToken"], "rh2");
    }

    #[tokio::test]
    async fn login_during_refresh_is_not_overwritten() {
        let transport = Arc::new(FakeTransport::new().with_refresh_delay(Duration::from_millis(100)));
        let (session, store) = coordinator(transport.clone());
        session.login(good_login()).await.unwrap();

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = session.login(good_login()).await.unwrap();

        assert!(pending.await.unwrap().is_err());
        assert_eq!(session.credential(), Some(fresh.access_token));
        assert_eq!(store.load().await.unwrap(), fresh.refresh_token);
        assert!(
            transport
                .requests()
                .iter()
                .all(|r| r.path != LOGOUT_PATH)
        );
    }

    /// Memory slot whose writes take `delay`.
    struct SlowStore {
        inner: MemoryHandleStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl RefreshHandleStore for SlowStore {
        async fn load(&self) -> Result<Option<RefreshHandle>, SessionError> {
            self.inner.load().await
        }

        async fn save(&self, handle: &RefreshHandle) -> Result<(), SessionError> {
            tokio::time::sleep(self.delay).await;
            self.inner.save(handle).await
        }

        async fn clear(&self) -> Result<(), SessionError> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn slow_handle_write_is_not_cut_by_refresh_timeout() {
        let transport = Arc::new(FakeTransport::new());
        let store = Arc::new(SlowStore {
            inner: MemoryHandleStore::new(),
            delay: Duration::from_millis(150),
        });
        let config = CoordinatorConfig {
            refresh_timeout: Duration::from_millis(50),
            ..CoordinatorConfig::default()
        };
        let session = SessionCoordinator::new(transport.clone(), store.clone(), config);
        session.login(good_login()).await.unwrap();

        let payload = session.refresh().await.unwrap();

        assert_eq!(payload.access_token.as_str(), "tok2");
        assert_eq!(session.credential(), Some(AccessToken("tok2".into())));
        assert_eq!(store.load().await.unwrap(), Some(RefreshHandle("rh2".into())));
    }

    #[tokio::test]
    async fn refresh_failure_rejects_all_waiters_and_ends_session_once() {
        let transport = Arc::new(FakeTransport::new().with_refresh_delay(Duration::from_millis(50)));
        let (session, _) = coordinator(transport.clone());
        let mut events = session.session_events();
        session.login(good_login()).await.unwrap();
        transport.expire_credential();
        transport.set_refresh_mode(RefreshMode::Reject);

        let calls = (0..3).map(|i| {
            let session = session.clone();
            async move {
                session
                    .call::<serde_json::Value>(ApiRequest::get(format!("/items/{}", i)))
                    .await
            }
        });
        let results = join_all(calls).await;

        for result in &results {
            let err = result.as_ref().unwrap_err();
            assert!(err.is_session_expired(), "{:?}", err);
        }
        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(session.credential(), None);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Ended {
                reason: SessionEndReason::SessionExpired
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_expiry_unauthorized_bypasses_refresh() {
        let transport = Arc::new(FakeTransport::new());
        let (session, _) = coordinator(transport.clone());
        session.login(good_login()).await.unwrap();
        transport.expire_credential();
        transport.set_rejection_code(Some("ACCOUNT_DISABLED"));

        let err = session
            .call::<serde_json::Value>(ApiRequest::get("/items"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some("ACCOUNT_DISABLED"));
        assert_eq!(transport.refresh_calls(), 0);
        assert!(session.credential().is_some());
    }

    #[tokio::test]
    async fn failed_login_is_returned_unchanged() {
        let transport = Arc::new(FakeTransport::new());
        let (session, _) = coordinator(transport.clone());

        let err = session
            .login(LoginCredentials {
                username: "cashier".to_string(),
                password: "wrong".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::Unauthorized { ref code, .. } if code.as_deref() == Some("INVALID_CREDENTIALS")
        ));
        assert_eq!(transport.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn retried_request_is_not_retried_again() {
        let transport = Arc::new(FakeTransport::new());
        let (session, _) = coordinator(transport.clone());
        session.login(good_login()).await.unwrap();

        let err = session
            .call::<serde_json::Value>(ApiRequest::get("/always-401/report"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Unauthorized { .. }));
        assert_eq!(transport.refresh_calls(), 1);
        let attempts = transport
            .requests()
            .into_iter()
            .filter(|r| r.path == "/always-401/report")
            .count();
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn bare_unauthorized_follows_configured_policy() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_rejection_code(None);
        let (permissive, _) = coordinator(transport.clone());
        permissive.login(good_login()).await.unwrap();
        transport.expire_credential();
        permissive
            .call::<serde_json::Value>(ApiRequest::get("/items"))
            .await
            .unwrap();
        assert_eq!(transport.refresh_calls(), 1);

        let strict_transport = Arc::new(FakeTransport::new());
        strict_transport.set_rejection_code(None);
        let config = CoordinatorConfig {
            bare_unauthorized: BareUnauthorizedPolicy::Reject,
            ..CoordinatorConfig::default()
        };
        let (strict, _) = coordinator_with(strict_transport.clone(), config);
        strict.login(good_login()).await.unwrap();
        strict_transport.expire_credential();
        let err = strict
            .call::<serde_json::Value>(ApiRequest::get("/items"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Unauthorized { code: None, .. }));
        assert_eq!(strict_transport.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn hung_refresh_times_out_and_drains_queue() {
        let transport = Arc::new(FakeTransport::new());
        let config = CoordinatorConfig {
            refresh_timeout: Duration::from_millis(100),
            ..CoordinatorConfig::default()
        };
        let (session, _) = coordinator_with(transport.clone(), config);
        let mut events = session.session_events();
        session.login(good_login()).await.unwrap();
        transport.expire_credential();
        transport.set_refresh_mode(RefreshMode::Hang);

        let calls = (0..3).map(|i| {
            let session = session.clone();
            async move {
                session
                    .call::<serde_json::Value>(ApiRequest::get(format!("/items/{}", i)))
                    .await
            }
        });
        let results = tokio::time::timeout(Duration::from_secs(5), join_all(calls))
            .await
            .expect("queued calls must not hang");

        assert!(results.iter().all(|r| matches!(r, Err(SessionError::SessionExpired(_)))));
        assert_eq!(session.credential(), None);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Ended {
                reason: SessionEndReason::RefreshTimedOut
            }
        );
    }

    #[tokio::test]
    async fn stale_credential_is_retried_without_refresh() {
        let transport = Arc::new(FakeTransport::new());
        let (session, _) = coordinator(transport.clone());
        session.login(good_login()).await.unwrap();
        session.refresh().await.unwrap();
        assert_eq!(transport.refresh_calls(), 1);

        // A response to a request signed before the refresh.
        let mut stale = ApiRequest::get("/items");
        stale.authorization = Some(AccessToken("tok1".into()).bearer());
        let response = ApiResponse {
            status: 401,
            body: r#"{"success":false,"message":"expired","code":"TOKEN_EXPIRED"}"#.to_string(),
        };
        let retried = session.handle_unauthorized(stale, response).await.unwrap();

        assert_eq!(retried.status, 200);
        assert_eq!(transport.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn logout_clears_local_state_even_when_server_fails() {
        let transport = Arc::new(FakeTransport::new());
        let (session, store) = coordinator(transport.clone());
        session.login(good_login()).await.unwrap();
        transport.set_logout_status(500);

        session.logout().await.unwrap();

        assert_eq!(session.credential(), None);
        assert_eq!(store.load().await.unwrap(), None);
        let logout = transport
            .requests()
            .into_iter()
            .find(|r| r.path == LOGOUT_PATH)
            .unwrap();
        assert_eq!(logout.body.unwrap()["refreshToken"], "rh1");
    }

    #[tokio::test]
    async fn observer_sees_every_set_without_dedup() {
        let transport = Arc::new(FakeTransport::new());
        let (session, _) = coordinator(transport);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let id = session.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        session.set_credential(Some(AccessToken("same".into())));
        session.set_credential(Some(AccessToken("same".into())));
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        assert!(session.unsubscribe(id));
        assert!(!session.unsubscribe(id));
        session.set_credential(None);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restore_session_uses_stored_handle() {
        let transport = Arc::new(FakeTransport::new());
        let (session, store) = coordinator(transport.clone());
        store.save(&RefreshHandle("rh-from-last-run".into())).await.unwrap();

        let restored = session.restore_session().await.unwrap();

        assert_eq!(restored.access_token.as_str(), "tok1");
        assert_eq!(session.credential(), Some(AccessToken("tok1".into())));
        assert_eq!(store.load().await.unwrap(), Some(RefreshHandle("rh1".into())));
        let refresh = transport
            .requests()
            .into_iter()
            .find(|r| r.path == REFRESH_PATH)
            .unwrap();
        assert_eq!(refresh.body.unwrap()["refreshToken"], "rh-from-last-run");
    }

    #[tokio::test]
    async fn failed_restore_starts_unauthenticated_without_event() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_refresh_mode(RefreshMode::Reject);
        let (session, _) = coordinator(transport.clone());
        let mut events = session.session_events();

        assert!(session.restore_session().await.is_none());
        assert_eq!(session.credential(), None);
        assert_eq!(transport.refresh_calls(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn password_change_forces_re_login() {
        let transport = Arc::new(FakeTransport::new());
        let (session, store) = coordinator(transport.clone());
        session.login(good_login()).await.unwrap();

        session
            .change_password(PasswordChange {
                current_password: FakeTransport::PASSWORD.to_string(),
                new_password: "even-better".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(session.credential(), None);
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn current_user_recovers_from_expiry_transparently() {
        let transport = Arc::new(FakeTransport::new());
        let (session, _) = coordinator(transport.clone());
        session.login(good_login()).await.unwrap();
        transport.expire_credential();

        let user = session.current_user().await.unwrap();
        assert_eq!(user.username, "cashier");
        assert_eq!(transport.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn non_auth_errors_pass_through() {
        let transport = Arc::new(FakeTransport::new());
        let (session, _) = coordinator(transport.clone());
        session.login(good_login()).await.unwrap();

        let err = session
            .call::<serde_json::Value>(ApiRequest::get("/missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Api { status: 404, .. }));
        assert_eq!(transport.refresh_calls(), 0);
    }
}
