//! Collaborators the runner drives. Hosts plug their own implementations in
//! behind these traits.

use async_trait::async_trait;
use ghosttext_proto::{EditorChangeResponse, ServerInitialResponse, UpdateRequest};
use reqwest::StatusCode;
use thiserror::Error;
use transport_port::PortError;
use url::Url;

use crate::session::{ClientStatus, EditorState, ExternalEdit, InternalEdit};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("malformed server frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to encode update: {0}")]
    Encode(serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("editor closed: {0}")]
    Closed(String),
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("editor io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected message from compose surface: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("status indicator unavailable: {0}")]
    Unavailable(String),
}

/// Opens a session against a GhostText server.
#[async_trait]
pub trait GhostTextConnector: Send + Sync {
    async fn connect(
        &self,
        server_url: &Url,
    ) -> Result<(Box<dyn Session>, ServerInitialResponse), ConnectError>;
}

/// An open connection to the external editor.
#[async_trait]
pub trait Session: Send + Sync {
    /// Fails once the connection is closed.
    fn send_update(&self, update: &UpdateRequest) -> Result<(), SessionError>;

    async fn wait_server_change(&self) -> Result<(), SessionError>;

    /// Newest pending change, dropping older ones. `None` when nothing is pending.
    fn pop_server_change(&self) -> Result<Option<EditorChangeResponse>, SessionError>;

    fn close(&self);
}

/// The locally edited document.
#[async_trait]
pub trait ClientEditor: Send + Sync {
    async fn get_state(&self) -> Result<EditorState, EditorError>;

    async fn apply_change(&self, change: &ExternalEdit) -> Result<(), EditorError>;

    async fn wait_edit(&self) -> Result<(), EditorError>;

    /// Newest pending local edit, dropping older ones. `None` when nothing is pending.
    fn pop_last_edit(&self) -> Result<Option<InternalEdit>, EditorError>;
}

#[async_trait]
pub trait StatusIndicator: Send + Sync {
    async fn update(&self, status: ClientStatus) -> Result<(), IndicatorError>;
}

/// Keeps the host alive while a session runs.
pub trait Heart: Send + Sync {
    fn start_beat(&self) -> Beat;
}

/// A running keep-alive. Stops when dropped.
#[must_use = "the beat stops as soon as it is dropped"]
pub struct Beat {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl Beat {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// A beat for hosts that need no keep-alive.
    pub fn noop() -> Self {
        Self { stop: None }
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for Beat {
    fn drop(&mut self) {
        self.halt();
    }
}
