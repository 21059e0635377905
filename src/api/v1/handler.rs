use super::error::*;
use crate::application_port::{AuthService, LoginResult};
use crate::domain_model::*;
use crate::logger::*;
use serde::Deserialize;
use std::sync::Arc;
use warp::http::header::SET_COOKIE;
use warp::reply::{Json, WithHeader};
use warp::{self, reject};

pub const REFRESH_COOKIE: &str = "refreshToken";

/// Attributes of the refresh cookie set next to every issued session.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub path: String,
    pub secure: bool,
    pub max_age_secs: u64,
}

impl CookiePolicy {
    fn attributes(&self) -> String {
        let mut attributes = format!("HttpOnly; Path={}; SameSite=Strict", self.path);
        if self.secure {
            attributes.push_str("; Secure");
        }
        attributes
    }

    fn set(&self, handle: &RefreshHandle) -> String {
        format!(
            "{}={}; Max-Age={}; {}",
            REFRESH_COOKIE,
            handle.as_str(),
            self.max_age_secs,
            self.attributes()
        )
    }

    fn clear(&self) -> String {
        format!("{}=; Max-Age=0; {}", REFRESH_COOKIE, self.attributes())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenBody {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl RefreshTokenBody {
    /// Body value first, cookie second.
    fn resolve(self, cookie: Option<String>) -> Option<String> {
        self.refresh_token
            .or(cookie)
            .filter(|token| !token.trim().is_empty())
    }
}

fn session_reply(
    result: LoginResult,
    message: &str,
    cookies: &CookiePolicy,
) -> WithHeader<Json> {
    let cookie = cookies.set(&result.tokens.refresh_token);
    let payload = SessionPayload {
        user: result.user,
        access_token: result.tokens.access_token,
        refresh_token: Some(result.tokens.refresh_token),
    };
    let json = warp::reply::json(&ApiResponse::ok(payload, message));
    warp::reply::with_header(json, SET_COOKIE, cookie)
}

pub async fn login(
    body: LoginCredentials,
    auth_service: Arc<dyn AuthService>,
    cookies: Arc<CookiePolicy>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let result = auth_service
        .login(body)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    info!(user = %result.user.username, "login");

    Ok(session_reply(result, "Login successful", &cookies))
}

pub async fn register(
    body: RegistrationProfile,
    auth_service: Arc<dyn AuthService>,
    cookies: Arc<CookiePolicy>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let result = auth_service
        .signup(body)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    info!(user = %result.user.username, "registered");

    Ok(session_reply(result, "Registration successful", &cookies))
}

pub async fn refresh(
    body: RefreshTokenBody,
    cookie: Option<String>,
    auth_service: Arc<dyn AuthService>,
    cookies: Arc<CookiePolicy>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let Some(refresh_token) = body.resolve(cookie) else {
        return Err(reject::custom(ApiErrorCode::RefreshTokenInvalid));
    };
    let result = auth_service
        .refresh_token(&refresh_token)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    debug!(user = %result.user.username, "refresh token rotated");

    Ok(session_reply(result, "Token refreshed", &cookies))
}

pub async fn logout(
    body: RefreshTokenBody,
    cookie: Option<String>,
    auth_service: Arc<dyn AuthService>,
    cookies: Arc<CookiePolicy>,
) -> Result<impl warp::Reply, warp::Rejection> {
    if let Some(refresh_token) = body.resolve(cookie) {
        auth_service
            .logout(&refresh_token)
            .await
            .map_err(ApiErrorCode::from)
            .map_err(reject::custom)?;
    }

    let json = warp::reply::json(&ApiResponse::ok((), "Logged out"));
    Ok(warp::reply::with_header(json, SET_COOKIE, cookies.clear()))
}

pub async fn logout_all(
    user_id: UserId,
    auth_service: Arc<dyn AuthService>,
    cookies: Arc<CookiePolicy>,
) -> Result<impl warp::Reply, warp::Rejection> {
    auth_service
        .logout_all(user_id)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    info!(%user_id, "logged out everywhere");

    let json = warp::reply::json(&ApiResponse::ok((), "Logged out from all sessions"));
    Ok(warp::reply::with_header(json, SET_COOKIE, cookies.clear()))
}

pub async fn me(
    user_id: UserId,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let user = auth_service
        .current_user(user_id)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(user, "OK")))
}

pub async fn update_profile(
    body: ProfileUpdate,
    user_id: UserId,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let user = auth_service
        .update_profile(user_id, body)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(user, "Profile updated")))
}

pub async fn change_password(
    body: PasswordChange,
    user_id: UserId,
    auth_service: Arc<dyn AuthService>,
    cookies: Arc<CookiePolicy>,
) -> Result<impl warp::Reply, warp::Rejection> {
    auth_service
        .change_password(user_id, body)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    info!(%user_id, "password changed");

    let json = warp::reply::json(&ApiResponse::ok((), "Password changed, please log in again"));
    Ok(warp::reply::with_header(json, SET_COOKIE, cookies.clear()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(secure: bool) -> CookiePolicy {
        CookiePolicy {
            path: "/api/v1/auth".to_string(),
            secure,
            max_age_secs: 60,
        }
    }

    #[test]
    fn cookie_carries_handle_and_attributes() {
        let cookie = policy(false).set(&RefreshHandle("rh-1".to_string()));
        assert_eq!(
            cookie,
            "refreshToken=rh-1; Max-Age=60; HttpOnly; Path=/api/v1/auth; SameSite=Strict"
        );
        assert!(policy(true).clear().ends_with("; Secure"));
        assert!(policy(true).clear().starts_with("refreshToken=; Max-Age=0;"));
    }

    #[test]
    fn body_handle_wins_over_cookie() {
        let body = RefreshTokenBody {
            refresh_token: Some("from-body".to_string()),
        };
        assert_eq!(
            body.resolve(Some("from-cookie".to_string())).as_deref(),
            Some("from-body")
        );
        assert_eq!(
            RefreshTokenBody::default()
                .resolve(Some("from-cookie".to_string()))
                .as_deref(),
            Some("from-cookie")
        );
        let blank = RefreshTokenBody {
            refresh_token: Some("  ".to_string()),
        };
        assert_eq!(blank.resolve(None), None);
    }
}
