use crate::application_impl::TransportConfig;
use crate::application_port::{BareUnauthorizedPolicy, CoordinatorConfig};
use anyhow::{Result, anyhow};
use config::{Config, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub auth: Auth,
    pub client: Client,
    pub http: Http,
    pub log: Log,
}

#[derive(Debug, Deserialize)]
pub struct Auth {
    pub issuer: String,
    pub audience: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub hasher: String, // "default" or "fast"
}

#[derive(Debug, Deserialize)]
pub struct Client {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub refresh_timeout_ms: u64,
    pub use_cookies: bool,
    pub treat_bare_unauthorized_as_expired: bool,
    pub handle_store: String, // "memory" or "file"
    pub handle_store_dir: String,
}

impl Client {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.base_url.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            use_cookies: self.use_cookies,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            refresh_timeout: Duration::from_millis(self.refresh_timeout_ms),
            bare_unauthorized: if self.treat_bare_unauthorized_as_expired {
                BareUnauthorizedPolicy::AssumeExpired
            } else {
                BareUnauthorizedPolicy::Reject
            },
            ..CoordinatorConfig::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
