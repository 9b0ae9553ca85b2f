//! The compose surface's end of the editor connection.
//!
//! The runner side sends the format once, the compose side answers with the
//! current body, and from then on the runner side pushes bodies written by
//! the external editor.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use transport_port::MessagePort;

use crate::runner::api::EditorError;

/// Runner side → compose side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackgroundMessage {
    Body {
        body: String,
    },
    Format {
        #[serde(rename = "isPlainText")]
        is_plain_text: bool,
    },
}

/// Compose side → runner side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyState {
    pub body: String,
}

/// Runner's end of the compose connection.
pub type ComposePort = Arc<dyn MessagePort<BackgroundMessage, BodyState>>;

/// A document body the compose surface can read and replace.
pub trait BodyEditor: Send + Sync {
    fn body(&self, is_plain_text: bool) -> String;

    fn apply_edit(&self, body: &str, is_plain_text: bool);
}

/// In-memory body shared between the compose surface and its handler.
#[derive(Debug, Default)]
pub struct TextBody {
    text: Mutex<String>,
}

impl TextBody {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(text.into()),
        }
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.lock() = text.into();
    }
}

impl BodyEditor for TextBody {
    fn body(&self, _is_plain_text: bool) -> String {
        self.text()
    }

    fn apply_edit(&self, body: &str, _is_plain_text: bool) {
        self.set_text(body);
    }
}

pub struct PortHandler {
    body: Arc<dyn BodyEditor>,
}

impl PortHandler {
    pub fn new(body: Arc<dyn BodyEditor>) -> Self {
        Self { body }
    }

    /// Serves one connection until it closes or the runner side sends
    /// something other than a body.
    pub async fn handle_connect(
        &self,
        port: &dyn MessagePort<BodyState, BackgroundMessage>,
    ) -> Result<(), EditorError> {
        let is_plain_text = receive_format(port).await?;
        port.send(BodyState {
            body: self.body.body(is_plain_text),
        })?;

        loop {
            if let Err(err) = port.wait_ready().await {
                debug!(error = %err, "compose connection closed");
                break;
            }
            match port.clear_latest() {
                Ok(Some(BackgroundMessage::Body { body })) => {
                    self.body.apply_edit(&body, is_plain_text)
                }
                Ok(None) => {}
                Ok(Some(other)) => {
                    debug!(message = ?other, "stopping on non-body message");
                    break;
                }
                Err(err) => {
                    debug!(error = %err, "compose connection closed");
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn receive_format(
    port: &dyn MessagePort<BodyState, BackgroundMessage>,
) -> Result<bool, EditorError> {
    port.wait_ready().await?;
    match port.clear_latest()? {
        Some(BackgroundMessage::Format { is_plain_text }) => Ok(is_plain_text),
        other => Err(EditorError::Protocol(format!(
            "expected the email format, got {other:?}"
        ))),
    }
}
