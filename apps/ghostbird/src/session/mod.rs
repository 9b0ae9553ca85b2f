//! Protocol vocabulary shared by the state machine and the runner.

mod client;

use std::fmt;

use ghosttext_proto::{EditorChangeResponse, SelectionObject, ServerInitialResponse, UpdateRequest};

pub use client::{GhostTextClient, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Unconnected,
    Connecting,
    Running,
    Error,
    Finished,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Error | SessionStatus::Finished)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Unconnected => "unconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Running => "running",
            SessionStatus::Error => "error",
            SessionStatus::Finished => "finished",
        };
        f.write_str(label)
    }
}

/// Coarse status shown to the user next to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientStatus {
    Active,
    Inactive,
    Error,
}

impl From<SessionStatus> for ClientStatus {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Error => ClientStatus::Error,
            SessionStatus::Running => ClientStatus::Active,
            SessionStatus::Unconnected | SessionStatus::Connecting | SessionStatus::Finished => {
                ClientStatus::Inactive
            }
        }
    }
}

/// Full snapshot of the local document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorState {
    pub subject: String,
    /// Host name identifying the client to the server.
    pub url: String,
    pub is_plain_text: bool,
    pub body: String,
    pub selections: Vec<SelectionObject>,
}

impl EditorState {
    pub fn to_update(&self) -> UpdateRequest {
        UpdateRequest::new(
            self.body.clone(),
            self.subject.clone(),
            self.url.clone(),
            self.selections.clone(),
        )
    }
}

/// Partial snapshot produced by a local edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalEdit {
    pub body: Option<String>,
}

impl InternalEdit {
    pub fn to_update(&self) -> UpdateRequest {
        UpdateRequest::text_only(self.body.clone().unwrap_or_default())
    }
}

/// Edit coming from the server that should be applied locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEdit {
    pub body: String,
}

impl ExternalEdit {
    /// Selection-only changes carry nothing to apply.
    pub fn from_change(change: &EditorChangeResponse) -> Option<Self> {
        change.text.clone().map(|body| ExternalEdit { body })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    NotifyStatus(SessionStatus),
    QueryEditor,
    RequestUpdate(UpdateRequest),
    ApplyChange(Option<ExternalEdit>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::NotifyStatus(_) => "notify_status",
            Command::QueryEditor => "query_editor",
            Command::RequestUpdate(_) => "request_update",
            Command::ApplyChange(_) => "apply_change",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Connected(ServerInitialResponse),
    StatusUpdated,
    Disconnected(Option<String>),
    EditorClosed,
    ClientState(EditorState),
    ClientEdited(InternalEdit),
    ServerChanged(EditorChangeResponse),
}

impl CommandResult {
    pub fn disconnected(reason: impl fmt::Display) -> Self {
        CommandResult::Disconnected(Some(reason.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandResult::Connected(_) => "connected",
            CommandResult::StatusUpdated => "status_updated",
            CommandResult::Disconnected(_) => "disconnected",
            CommandResult::EditorClosed => "editor_closed",
            CommandResult::ClientState(_) => "client_state",
            CommandResult::ClientEdited(_) => "client_edited",
            CommandResult::ServerChanged(_) => "server_changed",
        }
    }
}
