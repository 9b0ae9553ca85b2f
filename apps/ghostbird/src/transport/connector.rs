use std::sync::Arc;

use async_trait::async_trait;
use ghosttext_proto::{EditorChangeResponse, ServerInitialResponse, UpdateRequest};
use serde_json::Value;
use tracing::{debug, info};
use transport_port::MessagePort;
use url::Url;

use super::WebClient;
use crate::runner::api::{ConnectError, GhostTextConnector, Session, SessionError};

/// Connects by asking the server for its WebSocket port, then opening it.
pub struct WebSocketConnector {
    web_client: Arc<dyn WebClient>,
}

impl WebSocketConnector {
    pub fn new(web_client: Arc<dyn WebClient>) -> Self {
        Self { web_client }
    }
}

#[async_trait]
impl GhostTextConnector for WebSocketConnector {
    async fn connect(
        &self,
        server_url: &Url,
    ) -> Result<(Box<dyn Session>, ServerInitialResponse), ConnectError> {
        let body = self.web_client.get_json(server_url).await?;
        let (init, port) = parse_initial_response(&body)?;
        let ws_url = web_socket_url(server_url, port)?;
        info!(%ws_url, "opening GhostText session");
        let socket = self.web_client.open_web_socket(&ws_url).await?;
        Ok((Box::new(ClientSession::new(socket)), init))
    }
}

fn parse_initial_response(body: &Value) -> Result<(ServerInitialResponse, u16), ConnectError> {
    let invalid = || ConnectError::InvalidResponse(body.to_string());
    let init: ServerInitialResponse =
        serde_json::from_value(body.clone()).map_err(|_| invalid())?;
    let port = init.usable_port().ok_or_else(invalid)?;
    Ok((init, port))
}

/// Same host as the server, the advertised port, `ws` scheme.
pub fn web_socket_url(server_url: &Url, port: u16) -> Result<Url, ConnectError> {
    let mut url = server_url.clone();
    url.set_port(Some(port))
        .map_err(|()| ConnectError::InvalidUrl(format!("{server_url} cannot carry a port")))?;
    url.set_scheme("ws")
        .map_err(|()| ConnectError::InvalidUrl(format!("{server_url} cannot use the ws scheme")))?;
    Ok(url)
}

/// JSON framing of the GhostText protocol over a text port.
pub struct ClientSession {
    port: Arc<dyn MessagePort<String, String>>,
}

impl ClientSession {
    pub fn new(port: Arc<dyn MessagePort<String, String>>) -> Self {
        Self { port }
    }
}

#[async_trait]
impl Session for ClientSession {
    fn send_update(&self, update: &UpdateRequest) -> Result<(), SessionError> {
        let frame = update.to_json().map_err(SessionError::Encode)?;
        debug!(bytes = frame.len(), "sending update");
        self.port.send(frame)?;
        Ok(())
    }

    async fn wait_server_change(&self) -> Result<(), SessionError> {
        Ok(self.port.wait_ready().await?)
    }

    fn pop_server_change(&self) -> Result<Option<EditorChangeResponse>, SessionError> {
        match self.port.clear_latest()? {
            Some(frame) => Ok(Some(EditorChangeResponse::from_json(&frame)?)),
            None => Ok(None),
        }
    }

    fn close(&self) {
        self.port.close();
    }
}
