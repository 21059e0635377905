use crate::application_port::*;
use crate::domain_model::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Issue `tok{n}` / `rh{n}` and make `tok{n}` the only valid credential.
    Rotate,
    /// Answer 401 `REFRESH_TOKEN_INVALID`.
    Reject,
    /// Never answer.
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<serde_json::Value>,
    pub status: u16,
}

struct FakeState {
    valid_token: Option<String>,
    generation: u32,
    username: String,
    refresh_mode: RefreshMode,
    rejection_code: Option<String>,
    logout_status: u16,
}

/// Scripted in-process auth backend.
///
/// Paths under `/auth/` behave like the real endpoints; any other path is a
/// protected resource echoing its path, except `/always-401/...` which
/// rejects every credential as expired. Unknown `/missing` answers 404.
pub struct FakeTransport {
    state: Mutex<FakeState>,
    refresh_delay: Duration,
    refresh_calls: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeTransport {
    pub const PASSWORD: &'static str = "correct-horse";

    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                valid_token: None,
                generation: 0,
                username: "cashier".to_string(),
                refresh_mode: RefreshMode::Rotate,
                rejection_code: Some(TOKEN_EXPIRED_CODE.to_string()),
                logout_status: 200,
            }),
            refresh_delay: Duration::ZERO,
            refresh_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invalidate the current credential server-side.
    pub fn expire_credential(&self) {
        self.state().valid_token = None;
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        self.state().refresh_mode = mode;
    }

    /// Code carried by 401s on protected paths; `None` sends a bare 401.
    pub fn set_rejection_code(&self, code: Option<&str>) {
        self.state().rejection_code = code.map(str::to_string);
    }

    pub fn set_logout_status(&self, status: u16) {
        self.state().logout_status = status;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn issue_session(&self) -> ApiResponse {
        let mut state = self.state();
        state.generation += 1;
        let token = format!("tok{}", state.generation);
        state.valid_token = Some(token.clone());
        let payload = SessionPayload {
            user: profile(&state.username),
            access_token: AccessToken(token),
            refresh_token: Some(RefreshHandle(format!("rh{}", state.generation))),
        };
        ok(json!(payload))
    }

    fn protected(&self, request: &ApiRequest, data: serde_json::Value) -> ApiResponse {
        let state = self.state();
        let valid = match (&state.valid_token, &request.authorization) {
            (Some(token), Some(header)) => header == &format!("Bearer {}", token),
            _ => false,
        };
        if valid && !request.path.starts_with("/always-401") {
            return ok(data);
        }
        let body = match &state.rejection_code {
            Some(code) => json!({ "success": false, "message": "unauthorized", "code": code }),
            None => json!({ "success": false, "message": "unauthorized" }),
        };
        respond(401, body)
    }

    async fn route(&self, request: &ApiRequest) -> ApiResponse {
        match request.path.as_str() {
            "/auth/login" | "/auth/register" => {
                let body = request.body.clone().unwrap_or_default();
                if body["password"] != Self::PASSWORD {
                    return respond(
                        401,
                        json!({ "success": false, "message": "bad password", "code": "INVALID_CREDENTIALS" }),
                    );
                }
                if let Some(username) = body["username"].as_str() {
                    self.state().username = username.to_string();
                }
                self.issue_session()
            }
            "/auth/refresh" => {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                let mode = self.state().refresh_mode;
                if mode == RefreshMode::Hang {
                    std::future::pending::<()>().await;
                }
                if !self.refresh_delay.is_zero() {
                    tokio::time::sleep(self.refresh_delay).await;
                }
                match mode {
                    RefreshMode::Rotate => self.issue_session(),
                    _ => respond(
                        401,
                        json!({ "success": false, "message": "refresh token invalid", "code": "REFRESH_TOKEN_INVALID" }),
                    ),
                }
            }
            "/auth/logout" => {
                let status = self.state().logout_status;
                respond(status, json!({ "success": status < 400, "message": "logout" }))
            }
            "/auth/me" => {
                let username = self.state().username.clone();
                self.protected(request, json!(profile(&username)))
            }
            "/auth/password" => {
                let response = self.protected(request, serde_json::Value::Null);
                if response.is_success() {
                    self.expire_credential();
                }
                response
            }
            "/missing" => respond(404, json!({ "success": false, "message": "not found", "code": "NOT_FOUND" })),
            path => self.protected(request, json!({ "path": path })),
        }
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError> {
        let response = self.route(request).await;
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                method: request.method,
                path: request.path.clone(),
                authorization: request.authorization.clone(),
                body: request.body.clone(),
                status: response.status,
            });
        Ok(response)
    }
}

fn profile(username: &str) -> UserProfile {
    UserProfile {
        id: UserId(uuid::Uuid::nil()),
        username: username.to_string(),
        display_name: username.to_string(),
        email: None,
        is_active: true,
    }
}

fn ok(data: serde_json::Value) -> ApiResponse {
    respond(200, json!({ "success": true, "message": "ok", "data": data }))
}

fn respond(status: u16, body: serde_json::Value) -> ApiResponse {
    ApiResponse {
        status,
        body: body.to_string(),
    }
}
