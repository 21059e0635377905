use crate::application_port::*;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Prefix joined with every request path, e.g. `http://127.0.0.1:8080/api/v1`.
    pub base_url: String,
    pub request_timeout: Duration,
    /// Keep cookies between calls so the backend's refresh cookie is replayed.
    pub use_cookies: bool,
}

pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn try_new(config: &TransportConfig) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .cookie_store(config.use_cookies)
            .build()
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError> {
        let mut builder = self
            .http
            .request(method(request.method), self.url(&request.path))
            .header(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(authorization) = &request.authorization {
            let value = HeaderValue::from_str(authorization)
                .map_err(|e| SessionError::Transport(format!("authorization header: {}", e)))?;
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let res = builder
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let status = res.status().as_u16();
        let body = res
            .text()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(ApiResponse { status, body })
    }
}
