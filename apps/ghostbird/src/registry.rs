use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::compose::ComposePort;
use crate::editor::{ComposeWindow, PortEditor};
use crate::runner::GhostTextRunner;
use crate::runner::api::EditorError;
use crate::session::SessionStatus;

/// Identifies a compose window for the lifetime of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to attach to {id}: {source}")]
    Attach { id: DocumentId, source: EditorError },
}

/// Tracks the open session of every compose window. At most one connection
/// per document is open at a time.
pub struct SessionRegistry {
    runner: Arc<GhostTextRunner>,
    client_host_name: String,
    ports: Mutex<HashMap<DocumentId, ComposePort>>,
}

impl SessionRegistry {
    pub fn new(runner: Arc<GhostTextRunner>, client_host_name: impl Into<String>) -> Self {
        Self {
            runner,
            client_host_name: client_host_name.into(),
            ports: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_running(&self, id: DocumentId) -> bool {
        self.ports.lock().get(&id).is_some_and(|port| port.is_open())
    }

    /// Runs a session for `window` until it ends. Returns `None` without
    /// doing anything if the window already has one.
    pub async fn start(
        &self,
        window: Arc<dyn ComposeWindow>,
    ) -> Result<Option<SessionStatus>, RegistryError> {
        let id = window.id();
        if self.is_running(id) {
            info!(document = %id, "session already running");
            return Ok(None);
        }

        let attach = |source| RegistryError::Attach { id, source };
        window.prepare().await.map_err(attach)?;
        let port = window.open_port().map_err(attach)?;
        if !self.claim(id, &port) {
            port.close();
            info!(document = %id, "lost the race for the document");
            return Ok(None);
        }

        info!(document = %id, "starting session");
        let editor = PortEditor::new(window, port.clone(), self.client_host_name.clone());
        let status = self.runner.run(&editor, &editor).await;

        self.release(id, &port);
        Ok(Some(status))
    }

    /// Closes the document's connection, which ends its session.
    pub fn stop(&self, id: DocumentId) -> bool {
        let removed = self.ports.lock().remove(&id);
        match removed {
            Some(port) => {
                info!(document = %id, "stopping session");
                port.close();
                true
            }
            None => false,
        }
    }

    /// Stops a running session, or starts one. An entry whose connection
    /// already closed counts as not running.
    pub async fn toggle(
        &self,
        window: Arc<dyn ComposeWindow>,
    ) -> Result<Option<SessionStatus>, RegistryError> {
        let id = window.id();
        if self.is_running(id) {
            self.stop(id);
            return Ok(None);
        }
        self.start(window).await
    }

    /// Inserts `port` unless another open port holds the document.
    fn claim(&self, id: DocumentId, port: &ComposePort) -> bool {
        match self.ports.lock().entry(id) {
            Entry::Occupied(entry) if entry.get().is_open() => false,
            Entry::Occupied(mut entry) => {
                entry.insert(port.clone());
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(port.clone());
                true
            }
        }
    }

    /// Drops the entry only if it still belongs to this session.
    fn release(&self, id: DocumentId, port: &ComposePort) {
        {
            let mut ports = self.ports.lock();
            if ports.get(&id).is_some_and(|held| Arc::ptr_eq(held, port)) {
                ports.remove(&id);
            }
        }
        debug!(document = %id, "session released");
        port.close();
    }
}
