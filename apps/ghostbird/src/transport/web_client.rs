use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use transport_port::MessagePort;
use url::Url;

use super::WebSocketPort;
use crate::runner::api::ConnectError;

/// Network primitives the connector needs.
#[async_trait]
pub trait WebClient: Send + Sync {
    async fn get_json(&self, url: &Url) -> Result<Value, ConnectError>;

    async fn open_web_socket(
        &self,
        url: &Url,
    ) -> Result<Arc<dyn MessagePort<String, String>>, ConnectError>;
}

pub struct ReqwestWebClient {
    client: reqwest::Client,
}

impl ReqwestWebClient {
    pub fn new() -> Result<Self, ConnectError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebClient for ReqwestWebClient {
    async fn get_json(&self, url: &Url) -> Result<Value, ConnectError> {
        debug!(%url, "requesting GhostText server info");
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ConnectError::HttpStatus(response.status()));
        }
        Ok(response.json::<Value>().await?)
    }

    async fn open_web_socket(
        &self,
        url: &Url,
    ) -> Result<Arc<dyn MessagePort<String, String>>, ConnectError> {
        let port = WebSocketPort::connect(url)
            .await
            .map_err(|err| ConnectError::WebSocket(err.to_string()))?;
        Ok(Arc::new(port))
    }
}
