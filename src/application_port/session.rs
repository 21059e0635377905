use crate::domain_model::AccessToken;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The refresh attempt failed; the session has ended and re-login is required.
    #[error("session expired: {0}")]
    SessionExpired(String),
    /// Authorization failure that a refresh cannot fix (wrong password, disabled account, ...).
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: Option<String>,
        message: String,
    },
    #[error("request failed with status {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("refresh handle store error: {0}")]
    Store(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl SessionError {
    pub fn code(&self) -> Option<&str> {
        match self {
            SessionError::Unauthorized { code, .. } | SessionError::Api { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, SessionError::SessionExpired(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    SessionExpired,
    RefreshTimedOut,
}

impl SessionEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEndReason::SessionExpired => "session_expired",
            SessionEndReason::RefreshTimedOut => "refresh_timed_out",
        }
    }
}

/// Broadcast to the rest of the application; the UI layer reacts by showing
/// an unauthenticated view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Ended { reason: SessionEndReason },
}

/// How a 401 that carries no machine-readable code is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BareUnauthorizedPolicy {
    /// Treat it as an expired credential and attempt one refresh.
    #[default]
    AssumeExpired,
    /// Surface it to the caller without refreshing.
    Reject,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub refresh_timeout: Duration,
    pub bare_unauthorized: BareUnauthorizedPolicy,
    /// Error codes that mean "credential expired".
    pub expiry_codes: Vec<String>,
    pub event_capacity: usize,
}

pub const TOKEN_EXPIRED_CODE: &str = "TOKEN_EXPIRED";

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(10),
            bare_unauthorized: BareUnauthorizedPolicy::default(),
            expiry_codes: vec![TOKEN_EXPIRED_CODE.to_string()],
            event_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub type CredentialObserver = Arc<dyn Fn(Option<&AccessToken>) + Send + Sync>;
