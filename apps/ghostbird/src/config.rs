use std::env;

use thiserror::Error;
use url::Url;

pub const DEFAULT_SERVER_PORT: u16 = 4001;
pub const DEFAULT_CLIENT_ID: &str = "ghostbird";

const SERVER_PORT_VAR: &str = "GHOSTBIRD_SERVER_PORT";
const SERVER_URL_VAR: &str = "GHOSTBIRD_SERVER_URL";
const CLIENT_ID_VAR: &str = "GHOSTBIRD_CLIENT_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server port {value:?}: expected 1-65535")]
    InvalidPort { value: String },
    #[error("invalid server url {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("invalid client id {0:?}")]
    InvalidClientId(String),
}

/// Where the GhostText server lives and who we are to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server_url: Url,
    pub client_id: String,
}

/// Values the session needs, derived from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub server_url: Url,
    /// Sent as the document url so the server can tell clients apart.
    pub client_host_name: String,
}

impl Config {
    /// `GHOSTBIRD_SERVER_URL` wins over `GHOSTBIRD_SERVER_PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = match non_empty_var(SERVER_URL_VAR) {
            Some(raw) => parse_server_url(&raw)?,
            None => match non_empty_var(SERVER_PORT_VAR) {
                Some(raw) => local_server_url(parse_port(&raw)?)?,
                None => local_server_url(DEFAULT_SERVER_PORT)?,
            },
        };
        let client_id =
            non_empty_var(CLIENT_ID_VAR).unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());
        Ok(Self {
            server_url,
            client_id,
        })
    }

    pub fn with_server_port(mut self, port: u16) -> Result<Self, ConfigError> {
        self.server_url = local_server_url(port)?;
        Ok(self)
    }

    pub fn with_server_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.server_url = parse_server_url(raw)?;
        Ok(self)
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn client_options(&self) -> Result<ClientOptions, ConfigError> {
        Ok(ClientOptions {
            server_url: self.server_url.clone(),
            client_host_name: client_host_name(&self.client_id)?,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort {
            value: raw.to_string(),
        }),
    }
}

fn local_server_url(port: u16) -> Result<Url, ConfigError> {
    parse_server_url(&format!("http://localhost:{port}/"))
}

fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        value: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".into()));
    }
    Ok(url)
}

/// `<id>.localhost`, normalized the way a URL host is.
fn client_host_name(client_id: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::InvalidClientId(client_id.to_string());
    if client_id.is_empty() || client_id.contains(['/', ':', '@', '.', '?', '#']) {
        return Err(invalid());
    }
    let url = Url::parse(&format!("http://{client_id}.localhost/")).map_err(|_| invalid())?;
    url.host_str().map(str::to_string).ok_or_else(invalid)
}
