use std::sync::Arc;

use async_trait::async_trait;
use ghosttext_proto::SelectionObject;

use crate::compose::{BackgroundMessage, BodyState, ComposePort};
use crate::registry::DocumentId;
use crate::runner::api::{ClientEditor, EditorError, IndicatorError, StatusIndicator};
use crate::session::{ClientStatus, EditorState, ExternalEdit, InternalEdit};

/// What the host knows about a compose window without asking its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeDetails {
    pub subject: String,
    pub body: String,
    pub is_plain_text: bool,
}

/// A compose window managed by the host.
#[async_trait]
pub trait ComposeWindow: Send + Sync {
    fn id(&self) -> DocumentId;

    /// Makes sure the compose side is ready to accept a connection.
    async fn prepare(&self) -> Result<(), EditorError>;

    async fn details(&self) -> Result<ComposeDetails, EditorError>;

    /// Opens a fresh connection to the compose side.
    fn open_port(&self) -> Result<ComposePort, EditorError>;

    async fn set_icon(&self, status: ClientStatus) -> Result<(), IndicatorError>;
}

/// [`ClientEditor`] backed by a compose window and its open connection.
pub struct PortEditor {
    window: Arc<dyn ComposeWindow>,
    port: ComposePort,
    client_host_name: String,
}

impl PortEditor {
    pub fn new(
        window: Arc<dyn ComposeWindow>,
        port: ComposePort,
        client_host_name: impl Into<String>,
    ) -> Self {
        Self {
            window,
            port,
            client_host_name: client_host_name.into(),
        }
    }
}

#[async_trait]
impl ClientEditor for PortEditor {
    async fn get_state(&self) -> Result<EditorState, EditorError> {
        let ComposeDetails {
            subject,
            mut body,
            is_plain_text,
        } = self.window.details().await?;

        self.port.send(BackgroundMessage::Format { is_plain_text })?;
        self.wait_edit().await?;
        // The compose side knows the body better than the host does.
        if let Some(BodyState { body: current }) = self.port.clear_latest()? {
            body = current;
        }

        Ok(EditorState {
            subject,
            url: self.client_host_name.clone(),
            is_plain_text,
            body,
            selections: vec![SelectionObject::caret(0)],
        })
    }

    async fn apply_change(&self, change: &ExternalEdit) -> Result<(), EditorError> {
        self.port.send(BackgroundMessage::Body {
            body: change.body.clone(),
        })?;
        Ok(())
    }

    async fn wait_edit(&self) -> Result<(), EditorError> {
        Ok(self.port.wait_ready().await?)
    }

    fn pop_last_edit(&self) -> Result<Option<InternalEdit>, EditorError> {
        Ok(self
            .port
            .clear_latest()?
            .map(|BodyState { body }| InternalEdit { body: Some(body) }))
    }
}

#[async_trait]
impl StatusIndicator for PortEditor {
    async fn update(&self, status: ClientStatus) -> Result<(), IndicatorError> {
        self.window.set_icon(status).await
    }
}
