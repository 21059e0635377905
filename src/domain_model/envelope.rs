use crate::domain_model::{AccessToken, RefreshHandle, UserProfile};
use serde::{Deserialize, Serialize};

/// Response envelope shared by every endpoint of the auth backend.
///
/// Success: `{ success: true, message, data }`.
/// Failure: `{ success: false, message, code? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T, C = String> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<C>,
}

impl<T, C> ApiEnvelope<T, C> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            code: None,
        }
    }

    pub fn err(code: C, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            code: Some(code),
        }
    }
}

/// `data` of a successful login, register or refresh exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub user: UserProfile,
    pub access_token: AccessToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshHandle>,
}
