use crate::application_port::SessionError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Which part of the unauthorized-response protocol a request may take part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Ordinary API call; a credential-expired 401 triggers refresh and one retry.
    Standard,
    /// Login, register and logout. Their 401s always reach the caller.
    CredentialExchange,
    /// The refresh call itself.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub attempt_count: u32,
    pub kind: RequestKind,
}

impl RequestContext {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            attempt_count: 0,
            kind,
        }
    }

    /// A request may enter the refresh protocol once, and only if it is a standard call.
    pub fn may_refresh(&self) -> bool {
        self.kind == RequestKind::Standard && self.attempt_count == 0
    }
}

/// An outgoing API call, owned by the coordinator rather than by the HTTP client.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub authorization: Option<String>,
    pub context: RequestContext,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            authorization: None,
            context: RequestContext::new(RequestKind::Standard),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, SessionError> {
        let value =
            serde_json::to_value(body).map_err(|e| SessionError::Decode(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn kind(mut self, kind: RequestKind) -> Self {
        self.context.kind = kind;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue the request as-is. Only transport-level failures are errors;
    /// any HTTP status comes back as an [`ApiResponse`].
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError>;
}
