//! Wire shapes of the GhostText protocol
//! (<https://github.com/fregante/GhostText/blob/v1.2.4/PROTOCOL.md>).
//! Kept free of runtime code so editors and tests can share the exact
//! serialization without pulling in the session engine.

use serde::{Deserialize, Serialize};

/// Body of the initial HTTP GET against a GhostText server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInitialResponse {
    /// Currently always 1.
    pub protocol_version: i64,
    /// Port of the listening WebSocket; usually, but not necessarily, the HTTP port.
    pub web_socket_port: i64,
}

impl ServerInitialResponse {
    /// The advertised WebSocket port, if both fields are usable.
    pub fn usable_port(&self) -> Option<u16> {
        if self.protocol_version < 1 || self.web_socket_port < 1 {
            return None;
        }
        u16::try_from(self.web_socket_port).ok()
    }
}

/// A cursor selection, 0-indexed in UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionObject {
    pub start: u32,
    pub end: u32,
}

impl SelectionObject {
    pub fn caret(at: u32) -> Self {
        Self { start: at, end: at }
    }
}

/// Client → server frame sent whenever the local document changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub text: String,
    pub title: String,
    /// Host of the document's URL.
    pub url: String,
    pub selections: Vec<SelectionObject>,
    /// Reserved; current implementations always send an empty string.
    pub syntax: String,
}

impl UpdateRequest {
    pub fn new(
        text: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        selections: Vec<SelectionObject>,
    ) -> Self {
        Self {
            text: text.into(),
            title: title.into(),
            url: url.into(),
            selections,
            syntax: String::new(),
        }
    }

    /// An update that only carries new text.
    pub fn text_only(text: impl Into<String>) -> Self {
        Self::new(text, "", "", Vec::new())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Server → client frame sent when the external editor changes the text.
/// The protocol requires at least one field; each is optional on its own.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditorChangeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selections: Option<Vec<SelectionObject>>,
}

impl EditorChangeResponse {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.selections.is_none()
    }
}
